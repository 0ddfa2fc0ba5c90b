//! Polygon shapes attached to canonical units.
//!
//! Shapes only feed the containment fallback: "does the parent polygon contain
//! the child's centroid". Overlap areas are never computed here; they arrive
//! pre-computed through the crosswalk.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// `[longitude, latitude]`.
pub type Point = [f64; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
  pub exterior: Vec<Point>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub holes:    Vec<Vec<Point>>,
}

/// One or more polygons (a multipolygon when the unit has islands).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
  pub polygons: Vec<Polygon>,
}

impl Shape {
  pub fn polygon(exterior: Vec<Point>) -> Self {
    Self { polygons: vec![Polygon { exterior, holes: vec![] }] }
  }

  /// Parse a GeoJSON `Polygon` or `MultiPolygon` geometry object.
  pub fn from_geojson(value: &serde_json::Value) -> Result<Self> {
    let kind = value
      .get("type")
      .and_then(|t| t.as_str())
      .ok_or_else(|| Error::InvalidShape("missing geometry type".into()))?;
    let coords = value
      .get("coordinates")
      .ok_or_else(|| Error::InvalidShape("missing coordinates".into()))?;

    let polygons = match kind {
      "Polygon" => vec![parse_polygon(coords)?],
      "MultiPolygon" => coords
        .as_array()
        .ok_or_else(|| Error::InvalidShape("MultiPolygon is not an array".into()))?
        .iter()
        .map(parse_polygon)
        .collect::<Result<_>>()?,
      other => {
        return Err(Error::InvalidShape(format!("unsupported geometry {other:?}")));
      }
    };

    if polygons.is_empty() {
      return Err(Error::InvalidShape("no polygons".into()));
    }
    Ok(Self { polygons })
  }

  /// Area-weighted centroid of the largest polygon's exterior ring.
  ///
  /// Degenerate rings (zero area) fall back to the vertex average.
  pub fn centroid(&self) -> Option<Point> {
    let largest = self
      .polygons
      .iter()
      .max_by(|a, b| signed_area(&a.exterior).abs().total_cmp(&signed_area(&b.exterior).abs()))?;
    ring_centroid(&largest.exterior)
  }

  /// Even-odd containment test over every polygon, honouring holes.
  pub fn contains_point(&self, p: Point) -> bool {
    self.polygons.iter().any(|poly| {
      ring_contains(&poly.exterior, p)
        && !poly.holes.iter().any(|hole| ring_contains(hole, p))
    })
  }

  /// Whether `other`'s centroid lies inside this shape.
  pub fn contains_centroid_of(&self, other: &Shape) -> bool {
    other.centroid().is_some_and(|c| self.contains_point(c))
  }
}

fn parse_polygon(value: &serde_json::Value) -> Result<Polygon> {
  let rings: Vec<Vec<Point>> = serde_json::from_value(value.clone())
    .map_err(|e| Error::InvalidShape(format!("bad polygon rings: {e}")))?;
  let mut rings = rings.into_iter();
  let exterior = rings
    .next()
    .filter(|r| r.len() >= 3)
    .ok_or_else(|| Error::InvalidShape("polygon exterior needs 3+ points".into()))?;
  Ok(Polygon { exterior, holes: rings.collect() })
}

fn signed_area(ring: &[Point]) -> f64 {
  let n = ring.len();
  if n < 3 {
    return 0.0;
  }
  (0..n)
    .map(|i| {
      let [x0, y0] = ring[i];
      let [x1, y1] = ring[(i + 1) % n];
      x0 * y1 - x1 * y0
    })
    .sum::<f64>()
    / 2.0
}

fn ring_centroid(ring: &[Point]) -> Option<Point> {
  if ring.is_empty() {
    return None;
  }
  let area = signed_area(ring);
  if area.abs() < f64::EPSILON {
    let n = ring.len() as f64;
    let (sx, sy) = ring.iter().fold((0.0, 0.0), |(sx, sy), [x, y]| (sx + x, sy + y));
    return Some([sx / n, sy / n]);
  }

  let n = ring.len();
  let (mut cx, mut cy) = (0.0, 0.0);
  for i in 0..n {
    let [x0, y0] = ring[i];
    let [x1, y1] = ring[(i + 1) % n];
    let cross = x0 * y1 - x1 * y0;
    cx += (x0 + x1) * cross;
    cy += (y0 + y1) * cross;
  }
  Some([cx / (6.0 * area), cy / (6.0 * area)])
}

fn ring_contains(ring: &[Point], [px, py]: Point) -> bool {
  let n = ring.len();
  if n < 3 {
    return false;
  }
  let mut inside = false;
  let mut j = n - 1;
  for i in 0..n {
    let [xi, yi] = ring[i];
    let [xj, yj] = ring[j];
    if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
      inside = !inside;
    }
    j = i;
  }
  inside
}

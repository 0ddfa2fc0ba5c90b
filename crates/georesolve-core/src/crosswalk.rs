//! Crosswalk edges, the many-to-many overlap between canonical units at two
//! levels, and the rules that turn raw overlap records into them.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, geography::GeoLevel, normalize::pad_geoid};

/// Values above this are always read as percentages under
/// [`OverlapScale::Auto`].
pub const DEFAULT_AUTO_SCALE_CUTOFF: f64 = 1.5;

// ─── Relation type ───────────────────────────────────────────────────────────

/// A child level → parent level pair, e.g. `zip_county`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationType {
  pub child:  GeoLevel,
  pub parent: GeoLevel,
}

impl RelationType {
  pub fn new(child: GeoLevel, parent: GeoLevel) -> Result<Self> {
    if child == parent {
      return Err(Error::DegenerateRelation(child));
    }
    Ok(Self { child, parent })
  }
}

impl fmt::Display for RelationType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}_{}", self.child, self.parent)
  }
}

impl FromStr for RelationType {
  type Err = Error;

  /// Accepts `zip_county`, `zip-county` and `zip->county`.
  fn from_str(s: &str) -> Result<Self> {
    let (child, parent) = s
      .split_once("->")
      .or_else(|| s.split_once('_'))
      .or_else(|| s.split_once('-'))
      .ok_or_else(|| Error::UnknownRelation(s.to_owned()))?;
    let child = child
      .trim()
      .parse()
      .map_err(|_| Error::UnknownRelation(s.to_owned()))?;
    let parent = parent
      .trim()
      .parse()
      .map_err(|_| Error::UnknownRelation(s.to_owned()))?;
    Self::new(child, parent)
  }
}

impl TryFrom<String> for RelationType {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<RelationType> for String {
  fn from(r: RelationType) -> Self { r.to_string() }
}

// ─── Overlap scale ───────────────────────────────────────────────────────────

/// How a raw overlap value is expressed.
///
/// Deserialises from `true` (percentage), `false` (fraction) or the strings
/// `"auto"`, `"percent"`, `"percentage"`, `"fraction"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "ScaleRepr", rename_all = "lowercase")]
pub enum OverlapScale {
  Fraction,
  Percentage,
  #[default]
  Auto,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScaleRepr {
  Flag(bool),
  Word(String),
}

impl TryFrom<ScaleRepr> for OverlapScale {
  type Error = Error;

  fn try_from(repr: ScaleRepr) -> Result<Self> {
    match repr {
      ScaleRepr::Flag(true) => Ok(Self::Percentage),
      ScaleRepr::Flag(false) => Ok(Self::Fraction),
      ScaleRepr::Word(w) => w.parse(),
    }
  }
}

impl FromStr for OverlapScale {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "auto" | "" => Ok(Self::Auto),
      "percent" | "percentage" | "pct" | "true" => Ok(Self::Percentage),
      "fraction" | "ratio" | "false" => Ok(Self::Fraction),
      _ => Err(Error::UnknownScale(s.to_owned())),
    }
  }
}

/// The outcome of reading one overlap value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedOverlap {
  /// The overlap as a fraction in `[0, 1]`.
  pub fraction:  f64,
  /// The value fell in the band where fraction vs. percentage is uncertain.
  pub ambiguous: bool,
  /// The scaled value was outside `[0, 1]` and has been clamped.
  pub clamped:   bool,
}

impl OverlapScale {
  /// Convert `value` to a fraction.
  ///
  /// Under `Auto`, a value above 1.0 cannot be a fraction and is read as a
  /// percentage; values above 1.0 but not above `auto_cutoff` are reported as
  /// ambiguous. Values at or below 1.0 are taken as fractions.
  pub fn normalize(self, value: f64, auto_cutoff: f64) -> Result<NormalizedOverlap> {
    if !value.is_finite() || value < 0.0 {
      return Err(Error::InvalidOverlap(value));
    }

    let (raw, ambiguous) = match self {
      Self::Fraction => (value, false),
      Self::Percentage => (value / 100.0, false),
      Self::Auto if value > auto_cutoff => (value / 100.0, false),
      Self::Auto if value > 1.0 => (value / 100.0, true),
      Self::Auto => (value, false),
    };

    let fraction = raw.clamp(0.0, 1.0);
    Ok(NormalizedOverlap { fraction, ambiguous, clamped: fraction != raw })
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// An overlap record as supplied by an ingestion source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCrosswalkRow {
  pub child_geoid:   String,
  pub parent_geoid:  String,
  pub overlap_value: f64,
  #[serde(rename = "overlap_value_is_percentage", default)]
  pub scale:         OverlapScale,
}

impl RawCrosswalkRow {
  /// Normalise widths and scale. The returned edge is not yet primary; see
  /// [`assign_primary`].
  pub fn normalize(
    &self,
    relation: RelationType,
    auto_cutoff: f64,
  ) -> Result<(CrosswalkEdge, NormalizedOverlap)> {
    let overlap = self.scale.normalize(self.overlap_value, auto_cutoff)?;
    let edge = CrosswalkEdge {
      child_geoid:      pad_geoid(&self.child_geoid, relation.child),
      child_level:      relation.child,
      parent_geoid:     pad_geoid(&self.parent_geoid, relation.parent),
      parent_level:     relation.parent,
      overlap_fraction: overlap.fraction,
      is_primary:       false,
    };
    Ok((edge, overlap))
  }
}

/// Overlap between a child unit and a parent unit at a coarser level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosswalkEdge {
  pub child_geoid:      String,
  pub child_level:      GeoLevel,
  pub parent_geoid:     String,
  pub parent_level:     GeoLevel,
  /// Fraction of the child inside the parent.
  pub overlap_fraction: f64,
  pub is_primary:       bool,
}

impl CrosswalkEdge {
  pub fn relation(&self) -> RelationType {
    RelationType { child: self.child_level, parent: self.parent_level }
  }

  /// The upsert key `(child_geoid, child_level, parent_geoid, parent_level)`.
  pub fn key(&self) -> (&str, GeoLevel, &str, GeoLevel) {
    (&self.child_geoid, self.child_level, &self.parent_geoid, self.parent_level)
  }
}

/// Drop repeated keys, keeping the last occurrence of each.
pub fn dedupe_edges(edges: Vec<CrosswalkEdge>) -> Vec<CrosswalkEdge> {
  let mut position: HashMap<(String, GeoLevel, String, GeoLevel), usize> = HashMap::new();
  let mut out: Vec<CrosswalkEdge> = Vec::with_capacity(edges.len());
  for edge in edges {
    let key = (
      edge.child_geoid.clone(),
      edge.child_level,
      edge.parent_geoid.clone(),
      edge.parent_level,
    );
    match position.get(&key) {
      Some(&i) => out[i] = edge,
      None => {
        position.insert(key, out.len());
        out.push(edge);
      }
    }
  }
  out
}

/// Set `is_primary` so that, per child unit and parent level, at most one edge
/// is primary: the one with the highest overlap among those at or above the
/// relation's threshold, ties going to the smallest parent geoid.
///
/// Returns the number of primary edges.
pub fn assign_primary(
  edges: &mut [CrosswalkEdge],
  threshold_for: impl Fn(RelationType) -> f64,
) -> usize {
  let mut groups: HashMap<(&str, GeoLevel, GeoLevel), Vec<usize>> = HashMap::new();
  for (i, edge) in edges.iter().enumerate() {
    groups
      .entry((edge.child_geoid.as_str(), edge.child_level, edge.parent_level))
      .or_default()
      .push(i);
  }

  let winners: Vec<usize> = groups
    .into_values()
    .filter_map(|members| {
      let threshold = threshold_for(edges[members[0]].relation());
      members
        .into_iter()
        .filter(|&i| edges[i].overlap_fraction >= threshold)
        .max_by(|&a, &b| {
          edges[a]
            .overlap_fraction
            .total_cmp(&edges[b].overlap_fraction)
            .then_with(|| edges[b].parent_geoid.cmp(&edges[a].parent_geoid))
        })
    })
    .collect();

  for edge in edges.iter_mut() {
    edge.is_primary = false;
  }
  for &i in &winners {
    edges[i].is_primary = true;
  }
  winners.len()
}

//! Canonical geography rows.
//!
//! Accepts the reference dataset's own headers (`GEOID`, `GEOID20`, `NAME`)
//! as well as the lowercase layout. A `shape` (or `geometry`) column may carry
//! a GeoJSON `Polygon`/`MultiPolygon` geometry object.

use std::io::Read;

use georesolve_core::{
  geography::{GeoLevel, GeographyUnit},
  shape::Shape,
};
use serde::Deserialize;

use crate::{Error, Result, read_rows};

/// `geoid, level?, name, shape?`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitRow {
  #[serde(alias = "GEOID", alias = "GEOID20", alias = "GEOIDFQ")]
  pub geoid: String,
  #[serde(default)]
  pub level: Option<String>,
  #[serde(default, alias = "NAME", alias = "NAMELSAD")]
  pub name:  String,
  #[serde(default, alias = "geometry")]
  pub shape: Option<String>,
}

impl UnitRow {
  /// Build the unit. `default_level` applies when the row has no level of
  /// its own, as with single-level reference files.
  pub fn into_unit(self, line: u64, default_level: Option<GeoLevel>) -> Result<GeographyUnit> {
    let level = match self.level.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
      Some(raw) => raw
        .parse::<GeoLevel>()
        .map_err(|_| georesolve_core::Error::UnknownLevel(raw.to_owned()))?,
      None => default_level.ok_or(Error::MissingLevel { line })?,
    };
    if self.geoid.trim().is_empty() {
      return Err(Error::MissingField { line, field: "geoid" });
    }

    let mut unit = GeographyUnit::new(&self.geoid, level, self.name);
    if let Some(raw) = self.shape.filter(|s| !s.trim().is_empty()) {
      let value: serde_json::Value = serde_json::from_str(&raw)?;
      unit = unit.with_shape(Shape::from_geojson(&value)?);
    }
    Ok(unit)
  }
}

/// Read canonical units from CSV `input`.
pub fn read_units(
  input: impl Read,
  default_level: Option<GeoLevel>,
) -> Result<Vec<Result<GeographyUnit>>> {
  read_rows(input, |line, row: UnitRow| row.into_unit(line, default_level))
}

//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Enums are their lowercase names. Shapes
//! and external-identifier bags are compact JSON.

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, Utc};
use georesolve_core::{
  crosswalk::CrosswalkEdge,
  geography::{GeoLevel, GeographyUnit},
  hierarchy::{EdgeOrigin, HierarchyEdge},
  linkage::{MarketGeographyLink, MatchStrategy},
  market::{Market, RegionType},
  shape::Shape,
  store::BatchFailure,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

/// Parse a stored enum column via its `FromStr` impl.
fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode { column, value: s.to_owned() })
}

pub fn decode_level(column: &'static str, s: &str) -> Result<GeoLevel> {
  decode_enum(column, s)
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_shape(shape: Option<&Shape>) -> Result<Option<String>> {
  shape.map(serde_json::to_string).transpose().map_err(Error::from)
}

pub fn decode_shape(s: Option<&str>) -> Result<Option<Shape>> {
  s.map(serde_json::from_str).transpose().map_err(Error::from)
}

pub fn encode_external_ids(ids: &BTreeMap<String, String>) -> Result<String> {
  Ok(serde_json::to_string(ids)?)
}

pub fn decode_external_ids(s: &str) -> Result<BTreeMap<String, String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings for a `geography_units` row.
pub struct RawUnit {
  pub geoid:      String,
  pub level:      String,
  pub name:       String,
  pub shape_json: Option<String>,
}

impl RawUnit {
  pub fn from_unit(unit: &GeographyUnit) -> Result<Self> {
    Ok(Self {
      geoid:      unit.geoid.clone(),
      level:      unit.level.as_str().to_owned(),
      name:       unit.name.clone(),
      shape_json: encode_shape(unit.shape.as_ref())?,
    })
  }

  pub fn into_unit(self) -> Result<GeographyUnit> {
    Ok(GeographyUnit {
      geoid: self.geoid,
      level: decode_level("level", &self.level)?,
      name:  self.name,
      shape: decode_shape(self.shape_json.as_deref())?,
    })
  }
}

/// Raw strings for a `markets` row.
pub struct RawMarket {
  pub region_id:    String,
  pub region_name:  String,
  pub region_type:  String,
  pub state_code:   Option<String>,
  pub county_fips:  Option<String>,
  pub external_ids: String,
  pub source:       String,
}

impl RawMarket {
  pub fn from_market(m: &Market) -> Result<Self> {
    Ok(Self {
      region_id:    m.region_id.clone(),
      region_name:  m.region_name.clone(),
      region_type:  m.region_type.as_str().to_owned(),
      state_code:   m.state_code.clone(),
      county_fips:  m.county_fips.clone(),
      external_ids: encode_external_ids(&m.external_ids)?,
      source:       m.source.clone(),
    })
  }

  pub fn into_market(self) -> Result<Market> {
    Ok(Market {
      region_id:    self.region_id,
      region_name:  self.region_name,
      region_type:  decode_enum::<RegionType>("region_type", &self.region_type)?,
      state_code:   self.state_code,
      county_fips:  self.county_fips,
      external_ids: decode_external_ids(&self.external_ids)?,
      source:       self.source,
    })
  }
}

/// Raw strings for a `market_geography_links` row.
pub struct RawLink {
  pub region_id: String,
  pub geoid:     String,
  pub level:     String,
  pub strategy:  String,
  pub linked_at: String,
}

impl RawLink {
  pub fn from_link(l: &MarketGeographyLink) -> Self {
    Self {
      region_id: l.region_id.clone(),
      geoid:     l.geoid.clone(),
      level:     l.level.as_str().to_owned(),
      strategy:  l.strategy.as_str().to_owned(),
      linked_at: encode_dt(l.linked_at),
    }
  }

  pub fn into_link(self) -> Result<MarketGeographyLink> {
    Ok(MarketGeographyLink {
      region_id: self.region_id,
      geoid:     self.geoid,
      level:     decode_level("level", &self.level)?,
      strategy:  decode_enum::<MatchStrategy>("strategy", &self.strategy)?,
      linked_at: decode_dt(&self.linked_at)?,
    })
  }
}

/// Raw values for a `crosswalk_edges` row.
pub struct RawCrosswalk {
  pub child_geoid:      String,
  pub child_level:      String,
  pub parent_geoid:     String,
  pub parent_level:     String,
  pub overlap_fraction: f64,
  pub is_primary:       bool,
}

impl RawCrosswalk {
  pub fn from_edge(e: &CrosswalkEdge) -> Self {
    Self {
      child_geoid:      e.child_geoid.clone(),
      child_level:      e.child_level.as_str().to_owned(),
      parent_geoid:     e.parent_geoid.clone(),
      parent_level:     e.parent_level.as_str().to_owned(),
      overlap_fraction: e.overlap_fraction,
      is_primary:       e.is_primary,
    }
  }

  pub fn into_edge(self) -> Result<CrosswalkEdge> {
    Ok(CrosswalkEdge {
      child_geoid:      self.child_geoid,
      child_level:      decode_level("child_level", &self.child_level)?,
      parent_geoid:     self.parent_geoid,
      parent_level:     decode_level("parent_level", &self.parent_level)?,
      overlap_fraction: self.overlap_fraction,
      is_primary:       self.is_primary,
    })
  }
}

/// Raw values for a `hierarchy_edges` row.
pub struct RawHierarchyEdge {
  pub child_region_id:  String,
  pub parent_region_id: String,
  pub child_level:      String,
  pub parent_level:     String,
  pub overlap_fraction: Option<f64>,
  pub is_primary:       bool,
  pub origin:           String,
}

impl RawHierarchyEdge {
  pub fn from_edge(e: &HierarchyEdge) -> Self {
    Self {
      child_region_id:  e.child_region_id.clone(),
      parent_region_id: e.parent_region_id.clone(),
      child_level:      e.child_level.as_str().to_owned(),
      parent_level:     e.parent_level.as_str().to_owned(),
      overlap_fraction: e.overlap_fraction,
      is_primary:       e.is_primary,
      origin:           e.origin.as_str().to_owned(),
    }
  }

  pub fn into_edge(self) -> Result<HierarchyEdge> {
    Ok(HierarchyEdge {
      child_region_id:  self.child_region_id,
      parent_region_id: self.parent_region_id,
      child_level:      decode_level("child_level", &self.child_level)?,
      parent_level:     decode_level("parent_level", &self.parent_level)?,
      overlap_fraction: self.overlap_fraction,
      is_primary:       self.is_primary,
      origin:           decode_enum::<EdgeOrigin>("origin", &self.origin)?,
    })
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      child_region_id:  row.get(0)?,
      parent_region_id: row.get(1)?,
      child_level:      row.get(2)?,
      parent_level:     row.get(3)?,
      overlap_fraction: row.get(4)?,
      is_primary:       row.get(5)?,
      origin:           row.get(6)?,
    })
  }
}

/// Raw values for a `batch_failures` row.
pub struct RawBatchFailure {
  pub run_id:      String,
  pub stage:       String,
  pub table_name:  String,
  pub first_key:   String,
  pub last_key:    String,
  pub row_count:   i64,
  pub error:       String,
  pub recorded_at: String,
}

impl RawBatchFailure {
  pub fn from_failure(f: &BatchFailure) -> Self {
    Self {
      run_id:      encode_uuid(f.run_id),
      stage:       f.stage.clone(),
      table_name:  f.table.clone(),
      first_key:   f.first_key.clone(),
      last_key:    f.last_key.clone(),
      row_count:   i64::try_from(f.rows).unwrap_or(i64::MAX),
      error:       f.error.clone(),
      recorded_at: encode_dt(f.recorded_at),
    }
  }

  pub fn into_failure(self) -> Result<BatchFailure> {
    Ok(BatchFailure {
      run_id:      decode_uuid(&self.run_id)?,
      stage:       self.stage,
      table:       self.table_name,
      first_key:   self.first_key,
      last_key:    self.last_key,
      rows:        usize::try_from(self.row_count).unwrap_or_default(),
      error:       self.error,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

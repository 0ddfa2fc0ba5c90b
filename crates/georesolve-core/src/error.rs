//! Error types for `georesolve-core`.

use thiserror::Error;

use crate::geography::GeoLevel;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown geography level: {0:?}")]
  UnknownLevel(String),

  #[error("unknown region type: {0:?}")]
  UnknownRegionType(String),

  #[error("unknown relation type: {0:?}")]
  UnknownRelation(String),

  #[error("a relation must connect two different levels, got {0} -> {0}")]
  DegenerateRelation(GeoLevel),

  #[error("unknown overlap scale: {0:?}")]
  UnknownScale(String),

  #[error("overlap value {0} is not a finite, non-negative number")]
  InvalidOverlap(f64),

  #[error("invalid shape: {0}")]
  InvalidShape(String),

  /// A canonical unit cannot be removed while a hierarchy edge depends on it.
  #[error("geography unit {geoid} ({level}) is referenced by the hierarchy")]
  UnitReferenced { geoid: String, level: GeoLevel },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

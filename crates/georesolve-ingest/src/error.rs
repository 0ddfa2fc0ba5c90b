//! Error types for the georesolve ingestion readers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("CSV error: {0}")]
  Csv(#[from] csv::Error),

  #[error("missing column {0:?}")]
  MissingColumn(String),

  #[error("line {line}: invalid number in {column}: {value:?}")]
  InvalidNumber { line: u64, column: String, value: String },

  #[error("line {line}: unknown region type {value:?}")]
  UnknownRegionType { line: u64, value: String },

  #[error("line {line}: missing {field}")]
  MissingField { line: u64, field: &'static str },

  #[error("line {line}: no level given and no default level configured")]
  MissingLevel { line: u64 },

  #[error("unknown source kind: {0:?}")]
  UnknownSource(String),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Core(#[from] georesolve_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

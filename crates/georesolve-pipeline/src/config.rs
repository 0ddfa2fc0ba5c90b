//! Runtime configuration, deserialised from `georesolve.toml` layered under
//! `GEORESOLVE_*` environment variables.

use std::path::PathBuf;

use georesolve_core::{
  crosswalk::DEFAULT_AUTO_SCALE_CUTOFF,
  policy::{ExpectedParents, PrimaryThresholds},
};
use georesolve_ingest::CrosswalkColumns;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub store_path:         PathBuf,
  /// Rows per upsert batch.
  pub batch_size:         usize,
  /// Batches in flight at once.
  pub concurrency:        usize,
  /// Hop limit for ancestor traversal.
  pub max_depth:          usize,
  /// Attach still-orphaned markets by shape containment.
  pub geometric_fallback: bool,
  /// Under `auto` scale, values above this are percentages without a warning.
  pub auto_scale_cutoff:  f64,
  pub primary_thresholds: PrimaryThresholds,
  pub expected_parents:   ExpectedParents,
  pub crosswalk_columns:  CrosswalkColumns,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      store_path:         PathBuf::from("georesolve.db"),
      batch_size:         500,
      concurrency:        4,
      max_depth:          10,
      geometric_fallback: true,
      auto_scale_cutoff:  DEFAULT_AUTO_SCALE_CUTOFF,
      primary_thresholds: PrimaryThresholds::default(),
      expected_parents:   ExpectedParents::default(),
      crosswalk_columns:  CrosswalkColumns::default(),
    }
  }
}

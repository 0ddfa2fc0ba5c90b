//! Batch stages of the georesolve engine.
//!
//! A [`Pipeline`] wraps any [`GeoStore`] with its configuration. Stages are
//! methods, grouped by module:
//!
//! - [`importer`]: canonical geography, markets, crosswalk files and the
//!   structural crosswalk.
//! - [`resolver`]: market → canonical unit links.
//! - [`builder`]: market → market containment edges.
//! - [`query`]: read-only traversal.
//!
//! Every stage is safe to re-run; unchanged inputs produce no mutations.

pub mod batch;
pub mod builder;
pub mod config;
pub mod error;
pub mod importer;
pub mod query;
pub mod resolver;

use std::sync::Arc;

use georesolve_core::store::GeoStore;
use uuid::Uuid;

pub use batch::{BatchReport, BatchRunner};
pub use builder::{BuildReport, BuildState};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use importer::ImportReport;
pub use resolver::LinkReport;

/// A store plus the configuration every stage reads.
pub struct Pipeline<S: GeoStore> {
  store:  Arc<S>,
  config: Arc<PipelineConfig>,
}

impl<S: GeoStore> Clone for Pipeline<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), config: Arc::clone(&self.config) }
  }
}

impl<S: GeoStore + 'static> Pipeline<S> {
  pub fn new(store: S, config: PipelineConfig) -> Self {
    Self { store: Arc::new(store), config: Arc::new(config) }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &PipelineConfig { &self.config }

  /// A runner for one stage invocation, tagged with a fresh run id.
  fn runner(&self) -> BatchRunner {
    BatchRunner::new(self.config.batch_size, self.config.concurrency, Uuid::new_v4())
  }
}

#[cfg(test)]
mod tests;

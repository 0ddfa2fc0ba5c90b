//! Error type for the georesolve pipeline stages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The builder has nothing to join against.
  #[error("canonical geography is empty; run load-geography before building the hierarchy")]
  EmptyGeography,

  #[error("core error: {0}")]
  Core(#[from] georesolve_core::Error),

  #[error("ingest error: {0}")]
  Ingest(#[from] georesolve_ingest::Error),

  #[error("batch task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self { Self::Store(Box::new(e)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Fixed-size batches with bounded parallelism.
//!
//! A failed batch is logged, written to the store's failure log with its key
//! range, and skipped; the remaining batches still run.

use std::{future::Future, sync::Arc};

use chrono::Utc;
use georesolve_core::store::{BatchFailure, GeoStore, UpsertCounts};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Result;

/// Totals across every batch of one [`BatchRunner::run`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
  pub batches:     usize,
  pub failed:      usize,
  pub failed_rows: usize,
  pub counts:      UpsertCounts,
}

impl std::ops::AddAssign for BatchReport {
  fn add_assign(&mut self, rhs: Self) {
    self.batches += rhs.batches;
    self.failed += rhs.failed;
    self.failed_rows += rhs.failed_rows;
    self.counts += rhs.counts;
  }
}

struct Span {
  first_key: String,
  last_key:  String,
  rows:      usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchRunner {
  batch_size:  usize,
  concurrency: usize,
  run_id:      Uuid,
}

impl BatchRunner {
  pub fn new(batch_size: usize, concurrency: usize, run_id: Uuid) -> Self {
    Self {
      batch_size: batch_size.max(1),
      concurrency: concurrency.max(1),
      run_id,
    }
  }

  pub fn run_id(&self) -> Uuid { self.run_id }

  /// Split `items` into batches and apply `op` to each, at most
  /// `concurrency` at a time.
  ///
  /// `key` names a row in the failure log. Only a panicking batch task aborts
  /// the run.
  pub async fn run<S, T, F, Fut>(
    &self,
    store: &Arc<S>,
    stage: &'static str,
    table: &'static str,
    items: Vec<T>,
    key: impl Fn(&T) -> String,
    op: F,
  ) -> Result<BatchReport>
  where
    S: GeoStore + 'static,
    T: Send + 'static,
    F: Fn(Arc<S>, Vec<T>) -> Fut,
    Fut: Future<Output = Result<UpsertCounts, S::Error>> + Send + 'static,
  {
    let mut report = BatchReport::default();
    let mut tasks = JoinSet::new();
    let mut rows = items.into_iter().peekable();

    while rows.peek().is_some() {
      let chunk: Vec<T> = rows.by_ref().take(self.batch_size).collect();
      let span = Span {
        first_key: chunk.first().map(&key).unwrap_or_default(),
        last_key:  chunk.last().map(&key).unwrap_or_default(),
        rows:      chunk.len(),
      };

      if tasks.len() >= self.concurrency
        && let Some(done) = tasks.join_next().await
      {
        let (span, outcome) = done?;
        self.settle(store, stage, table, span, outcome, &mut report).await;
      }

      let fut = op(Arc::clone(store), chunk);
      tasks.spawn(async move { (span, fut.await) });
      report.batches += 1;
    }

    while let Some(done) = tasks.join_next().await {
      let (span, outcome) = done?;
      self.settle(store, stage, table, span, outcome, &mut report).await;
    }

    debug!(stage, table, batches = report.batches, failed = report.failed, "batches finished");
    Ok(report)
  }

  async fn settle<S: GeoStore>(
    &self,
    store: &Arc<S>,
    stage: &'static str,
    table: &'static str,
    span: Span,
    outcome: Result<UpsertCounts, S::Error>,
    report: &mut BatchReport,
  ) {
    let error = match outcome {
      Ok(counts) => {
        report.counts += counts;
        return;
      }
      Err(e) => e.to_string(),
    };

    warn!(
      stage,
      table,
      first_key = %span.first_key,
      last_key = %span.last_key,
      rows = span.rows,
      %error,
      "batch failed; skipping"
    );
    report.failed += 1;
    report.failed_rows += span.rows;

    let failure = BatchFailure {
      run_id: self.run_id,
      stage: stage.to_owned(),
      table: table.to_owned(),
      first_key: span.first_key,
      last_key: span.last_key,
      rows: span.rows,
      error,
      recorded_at: Utc::now(),
    };
    if let Err(e) = store.record_batch_failure(&failure).await {
      warn!(stage, table, error = %e, "could not record batch failure");
    }
  }
}

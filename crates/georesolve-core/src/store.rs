//! The `GeoStore` trait and its supporting record types.
//!
//! The trait is implemented by storage backends (e.g.
//! `georesolve-store-sqlite`). The pipeline depends on this abstraction, not
//! on a concrete backend.

use std::{future::Future, ops::AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  crosswalk::{CrosswalkEdge, RelationType},
  geography::{GeoLevel, GeographyUnit},
  hierarchy::HierarchyEdge,
  linkage::MarketGeographyLink,
  market::{Market, RegionType},
};

// ─── Records ─────────────────────────────────────────────────────────────────

/// Row counts from one keyed upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
  pub created:   usize,
  pub updated:   usize,
  pub unchanged: usize,
}

impl UpsertCounts {
  /// Rows the upsert actually changed.
  pub fn mutated(&self) -> usize { self.created + self.updated }

  pub fn total(&self) -> usize { self.created + self.updated + self.unchanged }
}

impl AddAssign for UpsertCounts {
  fn add_assign(&mut self, rhs: Self) {
    self.created += rhs.created;
    self.updated += rhs.updated;
    self.unchanged += rhs.unchanged;
  }
}

/// A batch that failed to persist, with enough context to retry it by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
  pub run_id:      Uuid,
  pub stage:       String,
  pub table:       String,
  pub first_key:   String,
  pub last_key:    String,
  pub rows:        usize,
  pub error:       String,
  pub recorded_at: DateTime<Utc>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the persisted reconciliation state.
///
/// Every write is a keyed upsert: re-sending the same rows is a no-op and
/// reports them as unchanged. Nothing is deleted implicitly.
pub trait GeoStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Canonical geography ───────────────────────────────────────────────

  /// Upsert units on `(geoid, level)`. A changed name is an update; a
  /// missing shape keeps the stored one.
  fn upsert_units<'a>(
    &'a self,
    units: &'a [GeographyUnit],
  ) -> impl Future<Output = Result<UpsertCounts, Self::Error>> + Send + 'a;

  fn upsert_unit(
    &self,
    unit: GeographyUnit,
  ) -> impl Future<Output = Result<UpsertCounts, Self::Error>> + Send + '_ {
    async move { self.upsert_units(std::slice::from_ref(&unit)).await }
  }

  fn get_unit<'a>(
    &'a self,
    geoid: &'a str,
    level: GeoLevel,
  ) -> impl Future<Output = Result<Option<GeographyUnit>, Self::Error>> + Send + 'a;

  fn list_units(
    &self,
    level: Option<GeoLevel>,
  ) -> impl Future<Output = Result<Vec<GeographyUnit>, Self::Error>> + Send + '_;

  fn count_units(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Delete a unit and any links to it. Refused while a linked market takes
  /// part in a hierarchy edge. Returns whether a row was removed.
  fn delete_unit<'a>(
    &'a self,
    geoid: &'a str,
    level: GeoLevel,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Markets ───────────────────────────────────────────────────────────

  fn upsert_markets<'a>(
    &'a self,
    markets: &'a [Market],
  ) -> impl Future<Output = Result<UpsertCounts, Self::Error>> + Send + 'a;

  fn get_market<'a>(
    &'a self,
    region_id: &'a str,
  ) -> impl Future<Output = Result<Option<Market>, Self::Error>> + Send + 'a;

  fn list_markets(
    &self,
    region_type: Option<RegionType>,
  ) -> impl Future<Output = Result<Vec<Market>, Self::Error>> + Send + '_;

  // ── Links ─────────────────────────────────────────────────────────────

  fn list_links(
    &self,
  ) -> impl Future<Output = Result<Vec<MarketGeographyLink>, Self::Error>> + Send + '_;

  /// Overwrite the link of each market in `links`.
  fn put_links<'a>(
    &'a self,
    links: &'a [MarketGeographyLink],
  ) -> impl Future<Output = Result<UpsertCounts, Self::Error>> + Send + 'a;

  fn delete_links<'a>(
    &'a self,
    region_ids: &'a [String],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  // ── Crosswalk ─────────────────────────────────────────────────────────

  /// Upsert on `(child_geoid, child_level, parent_geoid, parent_level)`.
  fn upsert_crosswalk<'a>(
    &'a self,
    edges: &'a [CrosswalkEdge],
  ) -> impl Future<Output = Result<UpsertCounts, Self::Error>> + Send + 'a;

  fn list_crosswalk(
    &self,
    relation: Option<RelationType>,
  ) -> impl Future<Output = Result<Vec<CrosswalkEdge>, Self::Error>> + Send + '_;

  /// Re-derive `is_primary` across every stored edge of `relation`. Returns
  /// the number of rows whose flag changed.
  fn normalize_primary_flags(
    &self,
    relation: RelationType,
    threshold: f64,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Hierarchy ─────────────────────────────────────────────────────────

  /// Upsert on `(child_region_id, parent_region_id)`.
  fn upsert_hierarchy_edges<'a>(
    &'a self,
    edges: &'a [HierarchyEdge],
  ) -> impl Future<Output = Result<UpsertCounts, Self::Error>> + Send + 'a;

  fn list_hierarchy_edges(
    &self,
  ) -> impl Future<Output = Result<Vec<HierarchyEdge>, Self::Error>> + Send + '_;

  /// Edges where `region_id` is the child, ordered by parent id.
  fn parents_of<'a>(
    &'a self,
    region_id: &'a str,
  ) -> impl Future<Output = Result<Vec<HierarchyEdge>, Self::Error>> + Send + 'a;

  /// Edges where `region_id` is the parent, ordered by child id.
  fn children_of<'a>(
    &'a self,
    region_id: &'a str,
  ) -> impl Future<Output = Result<Vec<HierarchyEdge>, Self::Error>> + Send + 'a;

  // ── Batch failures ────────────────────────────────────────────────────

  fn record_batch_failure<'a>(
    &'a self,
    failure: &'a BatchFailure,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn list_batch_failures(
    &self,
    run_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<BatchFailure>, Self::Error>> + Send + '_;
}

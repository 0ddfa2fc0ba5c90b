//! Hierarchy edges between markets, and the orphan report.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::geography::GeoLevel;

/// How a hierarchy edge was derived.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EdgeOrigin {
  /// Composed from links and a crosswalk edge.
  Crosswalk,
  /// From a market linked to its containing state by identifier prefix.
  StatePrefix,
  /// From shape containment; carries no overlap.
  Geometric,
}

impl EdgeOrigin {
  pub fn as_str(self) -> &'static str { self.into() }
}

/// Containment of one market inside another.
///
/// Keyed on `(child_region_id, parent_region_id)`; a child may have several
/// parents, including several at the same level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyEdge {
  pub child_region_id:  String,
  pub parent_region_id: String,
  pub child_level:      GeoLevel,
  pub parent_level:     GeoLevel,
  pub overlap_fraction: Option<f64>,
  pub is_primary:       bool,
  pub origin:           EdgeOrigin,
}

impl HierarchyEdge {
  pub fn key(&self) -> (&str, &str) { (&self.child_region_id, &self.parent_region_id) }

  pub fn is_self_edge(&self) -> bool { self.child_region_id == self.parent_region_id }
}

/// A linked market with no parent at one of its expected parent levels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Orphan {
  pub region_id:            String,
  pub level:                GeoLevel,
  pub missing_parent_level: GeoLevel,
  /// Whether any market is linked at the missing level. When false, no
  /// rerun can attach a parent until such a market is imported.
  pub fillable:             bool,
}

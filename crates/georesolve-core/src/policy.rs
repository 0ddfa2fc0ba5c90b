//! Hierarchy policy: which relations qualify a parent as primary, and which
//! parent levels every child level is expected to have.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  crosswalk::{CrosswalkEdge, RelationType, assign_primary},
  geography::GeoLevel,
};

// ─── Primary thresholds ──────────────────────────────────────────────────────

/// Minimum overlap fraction for a crosswalk edge to be eligible as primary,
/// per relation type.
///
/// Containment-style relations (zip in county, county in state) use majority
/// semantics. Metro relations use presence semantics: a zip can touch many
/// metros negligibly but still needs one primary metro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryThresholds {
  /// Used for relations missing from `relations`.
  pub default:   f64,
  pub relations: BTreeMap<RelationType, f64>,
}

impl Default for PrimaryThresholds {
  fn default() -> Self {
    use GeoLevel::*;

    let majority = [
      (Zip, County),
      (Zip, State),
      (Place, County),
      (Place, State),
      (County, State),
      (State, Nation),
    ];
    let presence = [(Zip, Metro), (County, Metro), (Place, Metro)];

    let relations = majority
      .into_iter()
      .map(|(c, p)| (RelationType { child: c, parent: p }, 0.5))
      .chain(
        presence
          .into_iter()
          .map(|(c, p)| (RelationType { child: c, parent: p }, 0.01)),
      )
      .collect();

    Self { default: 0.5, relations }
  }
}

impl PrimaryThresholds {
  pub fn threshold(&self, relation: RelationType) -> f64 {
    self.relations.get(&relation).copied().unwrap_or(self.default)
  }

  /// Apply [`assign_primary`] with these thresholds.
  pub fn assign(&self, edges: &mut [CrosswalkEdge]) -> usize {
    assign_primary(edges, |r| self.threshold(r))
  }
}

// ─── Expected parents ────────────────────────────────────────────────────────

/// The parent levels a market at a given level should end up attached to.
/// A linked market missing one of these is reported as an orphan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedParents(pub BTreeMap<GeoLevel, Vec<GeoLevel>>);

impl Default for ExpectedParents {
  fn default() -> Self {
    use GeoLevel::*;

    Self(BTreeMap::from([
      (Zip, vec![County, Metro]),
      (Place, vec![State]),
      (County, vec![State]),
      (Metro, vec![]),
      (State, vec![Nation]),
      (Nation, vec![]),
    ]))
  }
}

impl ExpectedParents {
  pub fn for_level(&self, level: GeoLevel) -> &[GeoLevel] {
    self.0.get(&level).map(Vec::as_slice).unwrap_or_default()
  }
}

//! Hierarchy stage: compose links with crosswalk edges into market → market
//! containment.
//!
//! Derivation runs in a fixed order and the first edge derived for a
//! `(child, parent)` pair wins:
//!
//! 1. crosswalk edges joined through links on both endpoints;
//! 2. state-prefix links, which point straight at the state's markets;
//! 3. the geometric fallback, for expected parent levels still uncovered.
//!
//! The orphan report is computed from the stored edges after the upsert, so it
//! reflects every earlier run as well.

use std::collections::{BTreeMap, HashMap, HashSet, btree_map::Entry};

use georesolve_core::{
  crosswalk::CrosswalkEdge,
  geography::{GeoLevel, GeographyUnit},
  hierarchy::{EdgeOrigin, HierarchyEdge, Orphan},
  linkage::{MarketGeographyLink, MatchStrategy},
  policy::ExpectedParents,
  store::{GeoStore, UpsertCounts},
};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{BatchReport, Error, Pipeline, Result};

// ─── Report ──────────────────────────────────────────────────────────────────

/// Builder progress. A run ends in `Done`, or `Partial` when a batch failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
  #[default]
  Idle,
  LinkingJoin,
  EdgeUpsert,
  Done,
  Partial,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
  pub run_id:        Uuid,
  pub state:         BuildState,
  pub edges_derived: usize,
  pub by_origin:     BTreeMap<EdgeOrigin, usize>,
  pub batches:       BatchReport,
  pub orphans:       Vec<Orphan>,
}

impl BuildReport {
  pub fn counts(&self) -> UpsertCounts { self.batches.counts }

  fn advance(&mut self, next: BuildState) {
    debug!(run_id = %self.run_id, from = ?self.state, to = ?next, "builder state");
    self.state = next;
  }
}

// ─── Derivation ──────────────────────────────────────────────────────────────

/// Links indexed by the unit they point at.
///
/// State-prefix links stand in for a missing county unit, so they are kept
/// apart: the state's markets are only the ones linked to it directly.
struct LinkTable<'a> {
  by_unit:   HashMap<(GeoLevel, &'a str), Vec<&'a str>>,
  by_prefix: Vec<&'a MarketGeographyLink>,
  direct:    Vec<&'a MarketGeographyLink>,
}

impl<'a> LinkTable<'a> {
  fn new(links: &'a [MarketGeographyLink]) -> Self {
    let mut table = Self { by_unit: HashMap::new(), by_prefix: Vec::new(), direct: Vec::new() };
    for link in links {
      if link.strategy == MatchStrategy::StatePrefix {
        table.by_prefix.push(link);
        continue;
      }
      table.direct.push(link);
      table
        .by_unit
        .entry((link.level, link.geoid.as_str()))
        .or_default()
        .push(&link.region_id);
    }
    for markets in table.by_unit.values_mut() {
      markets.sort_unstable();
    }
    table
  }

  fn markets<'b>(&'b self, level: GeoLevel, geoid: &'b str) -> &'b [&'a str] {
    self.by_unit.get(&(level, geoid)).map(Vec::as_slice).unwrap_or_default()
  }

  /// Levels with at least one directly linked market.
  fn populated_levels(&self) -> HashSet<GeoLevel> {
    self.by_unit.keys().map(|(level, _)| *level).collect()
  }

  /// Every linked market with the level it sits at.
  fn linked_markets(&self) -> impl Iterator<Item = (&'a str, GeoLevel)> + '_ {
    let direct = self.direct.iter().map(|&l| (l.region_id.as_str(), l.level));
    let prefixed = self.by_prefix.iter().map(|&l| (l.region_id.as_str(), GeoLevel::County));
    direct.chain(prefixed)
  }
}

#[derive(Default)]
struct Derived {
  edges: BTreeMap<(String, String), HierarchyEdge>,
}

impl Derived {
  fn insert(&mut self, edge: HierarchyEdge) {
    if edge.is_self_edge() {
      return;
    }
    let key = (edge.child_region_id.clone(), edge.parent_region_id.clone());
    if let Entry::Vacant(slot) = self.edges.entry(key) {
      slot.insert(edge);
    }
  }

  fn covers(&self) -> HashSet<(String, GeoLevel)> {
    self
      .edges
      .values()
      .map(|e| (e.child_region_id.clone(), e.parent_level))
      .collect()
  }
}

fn join_crosswalk(table: &LinkTable<'_>, crosswalk: &[CrosswalkEdge], out: &mut Derived) {
  for cw in crosswalk {
    let children = table.markets(cw.child_level, &cw.child_geoid);
    if children.is_empty() {
      continue;
    }
    for &parent in table.markets(cw.parent_level, &cw.parent_geoid) {
      for &child in children {
        out.insert(HierarchyEdge {
          child_region_id:  child.to_owned(),
          parent_region_id: parent.to_owned(),
          child_level:      cw.child_level,
          parent_level:     cw.parent_level,
          overlap_fraction: Some(cw.overlap_fraction),
          is_primary:       cw.is_primary,
          origin:           EdgeOrigin::Crosswalk,
        });
      }
    }
  }
}

fn join_state_prefix(table: &LinkTable<'_>, out: &mut Derived) {
  for link in &table.by_prefix {
    for &parent in table.markets(GeoLevel::State, &link.geoid) {
      out.insert(HierarchyEdge {
        child_region_id:  link.region_id.clone(),
        parent_region_id: parent.to_owned(),
        child_level:      GeoLevel::County,
        parent_level:     GeoLevel::State,
        overlap_fraction: None,
        is_primary:       true,
        origin:           EdgeOrigin::StatePrefix,
      });
    }
  }
}

/// Attach linked markets to parents whose shape contains the child shape's
/// centroid, for every expected parent level the earlier steps left empty.
/// Candidates are taken in geoid order and the first one is primary.
fn join_geometric(
  table: &LinkTable<'_>,
  units: &[GeographyUnit],
  expected: &ExpectedParents,
  out: &mut Derived,
) {
  let shapes: HashMap<(GeoLevel, &str), &GeographyUnit> = units
    .iter()
    .filter(|u| u.shape.is_some())
    .map(|u| ((u.level, u.geoid.as_str()), u))
    .collect();
  let mut candidates: BTreeMap<GeoLevel, Vec<&GeographyUnit>> = BTreeMap::new();
  for &unit in shapes.values() {
    if !table.markets(unit.level, &unit.geoid).is_empty() {
      candidates.entry(unit.level).or_default().push(unit);
    }
  }
  for level in candidates.values_mut() {
    level.sort_by(|a, b| a.geoid.cmp(&b.geoid));
  }

  let covered = out.covers();
  for link in &table.direct {
    let Some(centroid) = shapes
      .get(&(link.level, link.geoid.as_str()))
      .and_then(|u| u.shape.as_ref())
      .and_then(|s| s.centroid())
    else {
      continue;
    };

    for &parent_level in expected.for_level(link.level) {
      if covered.contains(&(link.region_id.clone(), parent_level)) {
        continue;
      }
      let containing = candidates
        .get(&parent_level)
        .into_iter()
        .flatten()
        .filter(|u| u.shape.as_ref().is_some_and(|s| s.contains_point(centroid)));

      for (rank, unit) in containing.enumerate() {
        for &parent in table.markets(unit.level, &unit.geoid) {
          out.insert(HierarchyEdge {
            child_region_id:  link.region_id.clone(),
            parent_region_id: parent.to_owned(),
            child_level:      link.level,
            parent_level,
            overlap_fraction: None,
            is_primary:       rank == 0,
            origin:           EdgeOrigin::Geometric,
          });
        }
      }
    }
  }
}

/// Linked markets with no stored edge at one of their expected parent levels.
fn find_orphans(
  table: &LinkTable<'_>,
  stored: &[HierarchyEdge],
  expected: &ExpectedParents,
) -> Vec<Orphan> {
  let populated = &table.populated_levels();
  let have: &HashSet<(&str, GeoLevel)> = &stored
    .iter()
    .map(|e| (e.child_region_id.as_str(), e.parent_level))
    .collect();

  let mut orphans: Vec<Orphan> = table
    .linked_markets()
    .flat_map(|(region_id, level)| {
      expected
        .for_level(level)
        .iter()
        .filter(move |&&pl| !have.contains(&(region_id, pl)))
        .map(move |&missing_parent_level| Orphan {
          region_id: region_id.to_owned(),
          level,
          missing_parent_level,
          fillable: populated.contains(&missing_parent_level),
        })
    })
    .collect();
  orphans.sort();
  orphans
}

// ─── Stage ───────────────────────────────────────────────────────────────────

impl<S: GeoStore + 'static> Pipeline<S> {
  /// Derive and upsert every hierarchy edge the current links, crosswalk and
  /// shapes support. Unchanged inputs leave the store untouched.
  pub async fn build_hierarchy(&self) -> Result<BuildReport> {
    let runner = self.runner();
    let mut report = BuildReport { run_id: runner.run_id(), ..BuildReport::default() };

    if self.store.count_units().await.map_err(Error::store)? == 0 {
      error!(run_id = %report.run_id, "canonical geography is empty; nothing to build against");
      return Err(Error::EmptyGeography);
    }

    report.advance(BuildState::LinkingJoin);
    let links = self.store.list_links().await.map_err(Error::store)?;
    let crosswalk = self.store.list_crosswalk(None).await.map_err(Error::store)?;
    let table = LinkTable::new(&links);

    let mut derived = Derived::default();
    join_crosswalk(&table, &crosswalk, &mut derived);
    join_state_prefix(&table, &mut derived);
    if self.config.geometric_fallback {
      let units = self.store.list_units(None).await.map_err(Error::store)?;
      join_geometric(&table, &units, &self.config.expected_parents, &mut derived);
    }

    let edges: Vec<HierarchyEdge> = derived.edges.into_values().collect();
    report.edges_derived = edges.len();
    for edge in &edges {
      *report.by_origin.entry(edge.origin).or_default() += 1;
    }
    debug!(
      run_id = %report.run_id,
      links = links.len(),
      crosswalk = crosswalk.len(),
      edges = report.edges_derived,
      "edges derived"
    );

    report.advance(BuildState::EdgeUpsert);
    report.batches = runner
      .run(
        &self.store,
        "build",
        "hierarchy_edges",
        edges,
        |e| format!("{}->{}", e.child_region_id, e.parent_region_id),
        |s, chunk| async move { s.upsert_hierarchy_edges(&chunk).await },
      )
      .await?;

    let stored = self.store.list_hierarchy_edges().await.map_err(Error::store)?;
    report.orphans = find_orphans(&table, &stored, &self.config.expected_parents);
    for orphan in &report.orphans {
      debug!(
        region_id = %orphan.region_id,
        level = %orphan.level,
        missing = %orphan.missing_parent_level,
        "orphan"
      );
    }
    if !report.orphans.is_empty() {
      warn!(run_id = %report.run_id, orphans = report.orphans.len(), "linked markets missing expected parents");
    }

    report.advance(if report.batches.failed == 0 { BuildState::Done } else { BuildState::Partial });
    info!(
      run_id = %report.run_id,
      state = ?report.state,
      derived = report.edges_derived,
      created = report.batches.counts.created,
      updated = report.batches.counts.updated,
      unchanged = report.batches.counts.unchanged,
      orphans = report.orphans.len(),
      failed_batches = report.batches.failed,
      "hierarchy built"
    );
    Ok(report)
  }
}

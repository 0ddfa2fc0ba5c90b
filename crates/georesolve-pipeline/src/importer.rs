//! Loading stages: canonical geography, the market registry, crosswalk files,
//! and the structural crosswalk implied by geoid prefixes.

use std::{
  collections::{BTreeMap, HashMap, HashSet, hash_map::Entry},
  hash::Hash,
  io::Read,
};

use georesolve_core::{
  crosswalk::{CrosswalkEdge, OverlapScale, RawCrosswalkRow, RelationType, assign_primary, dedupe_edges},
  geography::{GeoLevel, GeographyUnit, NATION_GEOID},
  market::Market,
  store::GeoStore,
};
use georesolve_ingest::{SourceKind, read_crosswalk, read_markets, read_units};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{BatchReport, BatchRunner, Error, Pipeline, Result};

/// Outcome of one loading stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
  pub run_id:                Uuid,
  pub rows_read:             usize,
  pub rows_rejected:         usize,
  /// Overlap values read as percentages from the ambiguous band.
  pub ambiguous_scale:       usize,
  pub clamped:               usize,
  pub primary_flags_changed: usize,
  pub batches:               BatchReport,
}

impl ImportReport {
  fn new(run_id: Uuid) -> Self { Self { run_id, ..Self::default() } }
}

/// Keep the successfully parsed rows, counting and logging the rest.
fn accept_rows<T>(
  stage: &'static str,
  rows: Vec<georesolve_ingest::Result<T>>,
  report: &mut ImportReport,
) -> Vec<T> {
  report.rows_read += rows.len();
  rows
    .into_iter()
    .filter_map(|row| match row {
      Ok(v) => Some(v),
      Err(e) => {
        warn!(stage, error = %e, "row rejected");
        report.rows_rejected += 1;
        None
      }
    })
    .collect()
}

/// Drop earlier duplicates of the same key; the last occurrence wins but keeps
/// the first one's position.
fn last_wins<T, K: Eq + Hash>(items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
  let mut seen: HashMap<K, usize> = HashMap::new();
  let mut out: Vec<T> = Vec::with_capacity(items.len());
  for item in items {
    match seen.entry(key(&item)) {
      Entry::Occupied(e) => out[*e.get()] = item,
      Entry::Vacant(e) => {
        e.insert(out.len());
        out.push(item);
      }
    }
  }
  out
}

/// Crosswalk rows of one relation after width and scale normalisation.
#[derive(Debug, Default)]
struct NormalizedRows {
  edges:     Vec<CrosswalkEdge>,
  rejected:  usize,
  ambiguous: usize,
  clamped:   usize,
}

fn normalize_rows(relation: RelationType, rows: &[RawCrosswalkRow], cutoff: f64) -> NormalizedRows {
  let mut out = NormalizedRows { edges: Vec::with_capacity(rows.len()), ..NormalizedRows::default() };
  for row in rows {
    match row.normalize(relation, cutoff) {
      Ok((edge, overlap)) => {
        if overlap.ambiguous {
          out.ambiguous += 1;
          debug!(
            child = %edge.child_geoid,
            parent = %edge.parent_geoid,
            value = row.overlap_value,
            "ambiguous overlap scale; read as a percentage"
          );
        }
        if overlap.clamped {
          out.clamped += 1;
        }
        out.edges.push(edge);
      }
      Err(e) => {
        warn!(%relation, child = %row.child_geoid, parent = %row.parent_geoid, error = %e, "crosswalk row rejected");
        out.rejected += 1;
      }
    }
  }
  out
}

impl<S: GeoStore + 'static> Pipeline<S> {
  // ── Canonical geography ───────────────────────────────────────────────────

  /// Read a geography CSV and load it. `default_level` applies to rows
  /// without a level column.
  pub async fn load_geography_csv(
    &self,
    input: impl Read,
    default_level: Option<GeoLevel>,
  ) -> Result<ImportReport> {
    let rows = read_units(input, default_level)?;
    let mut report = ImportReport::default();
    let units = accept_rows("load_geography", rows, &mut report);
    let loaded = self.load_geography(units).await?;
    Ok(ImportReport { rows_read: report.rows_read, rows_rejected: report.rows_rejected, ..loaded })
  }

  /// Upsert canonical units. Rerunnable; a changed name is an update.
  pub async fn load_geography(&self, units: Vec<GeographyUnit>) -> Result<ImportReport> {
    let runner = self.runner();
    let mut report = ImportReport::new(runner.run_id());
    report.rows_read = units.len();

    let units = last_wins(units, |u| (u.level, u.geoid.clone()));
    report.batches = runner
      .run(
        &self.store,
        "load_geography",
        "geography_units",
        units,
        |u| format!("{}:{}", u.level, u.geoid),
        |s, chunk| async move { s.upsert_units(&chunk).await },
      )
      .await?;

    info!(
      run_id = %report.run_id,
      created = report.batches.counts.created,
      updated = report.batches.counts.updated,
      failed_batches = report.batches.failed,
      "canonical geography loaded"
    );
    Ok(report)
  }

  // ── Markets ───────────────────────────────────────────────────────────────

  pub async fn import_markets_csv(&self, kind: SourceKind, input: impl Read) -> Result<ImportReport> {
    let rows = read_markets(kind, input)?;
    let mut report = ImportReport::default();
    let markets = accept_rows("import_markets", rows, &mut report);
    let loaded = self.import_markets(markets).await?;
    Ok(ImportReport { rows_read: report.rows_read, rows_rejected: report.rows_rejected, ..loaded })
  }

  /// Upsert markets into the registry. Markets are never deleted here.
  pub async fn import_markets(&self, markets: Vec<Market>) -> Result<ImportReport> {
    let runner = self.runner();
    let mut report = ImportReport::new(runner.run_id());
    report.rows_read = markets.len();

    let markets = last_wins(markets, |m| m.region_id.clone());
    report.batches = runner
      .run(
        &self.store,
        "import_markets",
        "markets",
        markets,
        |m| m.region_id.clone(),
        |s, chunk| async move { s.upsert_markets(&chunk).await },
      )
      .await?;

    info!(
      run_id = %report.run_id,
      created = report.batches.counts.created,
      updated = report.batches.counts.updated,
      failed_batches = report.batches.failed,
      "markets imported"
    );
    Ok(report)
  }

  // ── Crosswalk ─────────────────────────────────────────────────────────────

  pub async fn import_crosswalk_csv(
    &self,
    relation: RelationType,
    input: impl Read,
    default_scale: OverlapScale,
  ) -> Result<ImportReport> {
    let rows = read_crosswalk(input, &self.config.crosswalk_columns, default_scale)?;
    let mut report = ImportReport::default();
    let rows = accept_rows("import_crosswalk", rows, &mut report);
    let loaded = self.import_crosswalk(relation, rows).await?;
    Ok(ImportReport {
      rows_read: report.rows_read,
      rows_rejected: report.rows_rejected + loaded.rows_rejected,
      ..loaded
    })
  }

  /// Normalise raw overlap rows for `relation` and upsert them, then
  /// re-derive primary flags across every stored edge of the relation.
  pub async fn import_crosswalk(
    &self,
    relation: RelationType,
    rows: Vec<RawCrosswalkRow>,
  ) -> Result<ImportReport> {
    let runner = self.runner();
    let mut report = ImportReport::new(runner.run_id());
    self.import_edges(&runner, relation, rows, &mut report).await?;

    info!(
      run_id = %report.run_id,
      %relation,
      created = report.batches.counts.created,
      updated = report.batches.counts.updated,
      rejected = report.rows_rejected,
      failed_batches = report.batches.failed,
      "crosswalk imported"
    );
    Ok(report)
  }

  async fn import_edges(
    &self,
    runner: &BatchRunner,
    relation: RelationType,
    rows: Vec<RawCrosswalkRow>,
    report: &mut ImportReport,
  ) -> Result<()> {
    let cutoff = self.config.auto_scale_cutoff;
    let normalized = normalize_rows(relation, &rows, cutoff);
    report.rows_read += rows.len();
    report.rows_rejected += normalized.rejected;
    report.ambiguous_scale += normalized.ambiguous;
    report.clamped += normalized.clamped;
    if normalized.ambiguous > 0 {
      warn!(
        %relation,
        rows = normalized.ambiguous,
        cutoff,
        "overlap values between 1.0 and the auto-scale cutoff were read as percentages"
      );
    }
    if normalized.clamped > 0 {
      warn!(%relation, rows = normalized.clamped, "overlap values outside [0, 1] were clamped");
    }

    // Pick primaries against what is already stored so a re-import does not
    // flip flags that the store-side pass would flip back.
    let incoming = dedupe_edges(normalized.edges);
    let keys: HashSet<_> = incoming
      .iter()
      .map(|e| (e.child_geoid.clone(), e.parent_geoid.clone()))
      .collect();
    let stored = self
      .store
      .list_crosswalk(Some(relation))
      .await
      .map_err(Error::store)?;
    let mut merged = dedupe_edges(stored.into_iter().chain(incoming).collect());
    let threshold = self.config.primary_thresholds.threshold(relation);
    assign_primary(&mut merged, |_| threshold);
    merged.retain(|e| keys.contains(&(e.child_geoid.clone(), e.parent_geoid.clone())));

    report.batches += runner
      .run(
        &self.store,
        "import_crosswalk",
        "crosswalk_edges",
        merged,
        |e| format!("{}->{}", e.child_geoid, e.parent_geoid),
        |s, chunk| async move { s.upsert_crosswalk(&chunk).await },
      )
      .await?;

    report.primary_flags_changed += self
      .store
      .normalize_primary_flags(relation, threshold)
      .await
      .map_err(Error::store)?;
    Ok(())
  }

  /// Derive `county→state`, `place→state` and `state→nation` edges from the
  /// canonical geography itself, each with full overlap.
  pub async fn derive_structural(&self) -> Result<ImportReport> {
    let units = self.store.list_units(None).await.map_err(Error::store)?;
    let states: HashSet<&str> = units
      .iter()
      .filter(|u| u.level == GeoLevel::State)
      .map(|u| u.geoid.as_str())
      .collect();
    let has_nation = units
      .iter()
      .any(|u| u.level == GeoLevel::Nation && u.geoid == NATION_GEOID);

    let mut by_relation: BTreeMap<RelationType, Vec<RawCrosswalkRow>> = BTreeMap::new();
    let mut push = |child: GeoLevel, parent: GeoLevel, child_geoid: &str, parent_geoid: &str| {
      by_relation
        .entry(RelationType { child, parent })
        .or_default()
        .push(RawCrosswalkRow {
          child_geoid:   child_geoid.to_owned(),
          parent_geoid:  parent_geoid.to_owned(),
          overlap_value: 1.0,
          scale:         OverlapScale::Fraction,
        });
    };
    for unit in &units {
      match unit.level {
        GeoLevel::County | GeoLevel::Place => {
          if let Some(state) = unit.state_geoid()
            && states.contains(state)
          {
            push(unit.level, GeoLevel::State, &unit.geoid, state);
          }
        }
        GeoLevel::State if has_nation => {
          push(GeoLevel::State, GeoLevel::Nation, &unit.geoid, NATION_GEOID);
        }
        _ => {}
      }
    }

    let runner = self.runner();
    let mut report = ImportReport::new(runner.run_id());
    for (relation, rows) in by_relation {
      self.import_edges(&runner, relation, rows, &mut report).await?;
    }

    info!(
      run_id = %report.run_id,
      edges = report.rows_read,
      created = report.batches.counts.created,
      updated = report.batches.counts.updated,
      "structural crosswalk derived"
    );
    Ok(report)
  }
}

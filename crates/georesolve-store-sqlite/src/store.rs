//! [`SqliteStore`], the SQLite implementation of [`GeoStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{OptionalExtension as _, ToSql, Transaction};
use uuid::Uuid;

use georesolve_core::{
  crosswalk::{CrosswalkEdge, RelationType, assign_primary},
  geography::{GeoLevel, GeographyUnit},
  hierarchy::HierarchyEdge,
  linkage::MarketGeographyLink,
  market::{Market, RegionType},
  store::{BatchFailure, GeoStore, UpsertCounts},
};

use crate::{
  Error, Result,
  encode::{
    RawBatchFailure, RawCrosswalk, RawHierarchyEdge, RawLink, RawMarket, RawUnit, encode_dt,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Upsert plumbing ─────────────────────────────────────────────────────────

enum Upserted {
  Created,
  Updated,
  Unchanged,
}

impl std::ops::AddAssign<Upserted> for UpsertCounts {
  fn add_assign(&mut self, rhs: Upserted) {
    match rhs {
      Upserted::Created => self.created += 1,
      Upserted::Updated => self.updated += 1,
      Upserted::Unchanged => self.unchanged += 1,
    }
  }
}

/// Insert a row, or update it only when a non-key column differs.
///
/// `insert` must end in `ON CONFLICT DO NOTHING`; `update` must carry a
/// `WHERE` clause that matches only when something changed. Both statements
/// bind the same positional parameters.
fn upsert_row(
  tx: &Transaction<'_>,
  insert: &str,
  update: &str,
  params: &[&dyn ToSql],
) -> rusqlite::Result<Upserted> {
  if tx.prepare_cached(insert)?.execute(params)? == 1 {
    return Ok(Upserted::Created);
  }
  if tx.prepare_cached(update)?.execute(params)? == 1 {
    return Ok(Upserted::Updated);
  }
  Ok(Upserted::Unchanged)
}

const UNIT_INSERT: &str = "
  INSERT INTO geography_units (geoid, level, name, shape_json, updated_at)
  VALUES (?1, ?2, ?3, ?4, ?5)
  ON CONFLICT (geoid, level) DO NOTHING";

const UNIT_UPDATE: &str = "
  UPDATE geography_units
     SET name = ?3, shape_json = COALESCE(?4, shape_json), updated_at = ?5
   WHERE geoid = ?1 AND level = ?2
     AND (name IS NOT ?3 OR (?4 IS NOT NULL AND shape_json IS NOT ?4))";

const MARKET_INSERT: &str = "
  INSERT INTO markets (
    region_id, region_name, region_type, state_code, county_fips,
    external_ids, source, updated_at
  ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
  ON CONFLICT (region_id) DO NOTHING";

const MARKET_UPDATE: &str = "
  UPDATE markets
     SET region_name = ?2, region_type = ?3, state_code = ?4, county_fips = ?5,
         external_ids = ?6, source = ?7, updated_at = ?8
   WHERE region_id = ?1
     AND (region_name IS NOT ?2 OR region_type IS NOT ?3 OR state_code IS NOT ?4
          OR county_fips IS NOT ?5 OR external_ids IS NOT ?6 OR source IS NOT ?7)";

const LINK_INSERT: &str = "
  INSERT INTO market_geography_links (region_id, geoid, level, strategy, linked_at)
  VALUES (?1, ?2, ?3, ?4, ?5)
  ON CONFLICT (region_id) DO NOTHING";

const LINK_UPDATE: &str = "
  UPDATE market_geography_links
     SET geoid = ?2, level = ?3, strategy = ?4, linked_at = ?5
   WHERE region_id = ?1
     AND (geoid IS NOT ?2 OR level IS NOT ?3 OR strategy IS NOT ?4)";

const CROSSWALK_INSERT: &str = "
  INSERT INTO crosswalk_edges (
    child_geoid, child_level, parent_geoid, parent_level, overlap_fraction, is_primary
  ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
  ON CONFLICT (child_geoid, child_level, parent_geoid, parent_level) DO NOTHING";

const CROSSWALK_UPDATE: &str = "
  UPDATE crosswalk_edges
     SET overlap_fraction = ?5, is_primary = ?6
   WHERE child_geoid = ?1 AND child_level = ?2 AND parent_geoid = ?3 AND parent_level = ?4
     AND (overlap_fraction IS NOT ?5 OR is_primary IS NOT ?6)";

const HIERARCHY_INSERT: &str = "
  INSERT INTO hierarchy_edges (
    child_region_id, parent_region_id, child_level, parent_level,
    overlap_fraction, is_primary, origin, updated_at
  ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
  ON CONFLICT (child_region_id, parent_region_id) DO NOTHING";

const HIERARCHY_UPDATE: &str = "
  UPDATE hierarchy_edges
     SET child_level = ?3, parent_level = ?4, overlap_fraction = ?5,
         is_primary = ?6, origin = ?7, updated_at = ?8
   WHERE child_region_id = ?1 AND parent_region_id = ?2
     AND (child_level IS NOT ?3 OR parent_level IS NOT ?4 OR overlap_fraction IS NOT ?5
          OR is_primary IS NOT ?6 OR origin IS NOT ?7)";

const CROSSWALK_COLUMNS: &str =
  "child_geoid, child_level, parent_geoid, parent_level, overlap_fraction, is_primary";

const HIERARCHY_COLUMNS: &str = "child_region_id, parent_region_id, child_level, parent_level, \
                                 overlap_fraction, is_primary, origin";

fn raw_crosswalk(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCrosswalk> {
  Ok(RawCrosswalk {
    child_geoid:      row.get(0)?,
    child_level:      row.get(1)?,
    parent_geoid:     row.get(2)?,
    parent_level:     row.get(3)?,
    overlap_fraction: row.get(4)?,
    is_primary:       row.get(5)?,
  })
}

fn raw_unit(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUnit> {
  Ok(RawUnit {
    geoid:      row.get(0)?,
    level:      row.get(1)?,
    name:       row.get(2)?,
    shape_json: row.get(3)?,
  })
}

fn raw_market(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMarket> {
  Ok(RawMarket {
    region_id:    row.get(0)?,
    region_name:  row.get(1)?,
    region_type:  row.get(2)?,
    state_code:   row.get(3)?,
    county_fips:  row.get(4)?,
    external_ids: row.get(5)?,
    source:       row.get(6)?,
  })
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A georesolve store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── GeoStore impl ───────────────────────────────────────────────────────────

impl GeoStore for SqliteStore {
  type Error = Error;

  // ── Canonical geography ───────────────────────────────────────────────────

  async fn upsert_units<'a>(&'a self, units: &'a [GeographyUnit]) -> Result<UpsertCounts> {
    let raws = units.iter().map(RawUnit::from_unit).collect::<Result<Vec<_>>>()?;
    let now = encode_dt(Utc::now());

    let counts = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut counts = UpsertCounts::default();
        for r in &raws {
          counts += upsert_row(
            &tx,
            UNIT_INSERT,
            UNIT_UPDATE,
            rusqlite::params![r.geoid, r.level, r.name, r.shape_json, now],
          )?;
        }
        tx.commit()?;
        Ok(counts)
      })
      .await?;
    Ok(counts)
  }

  async fn get_unit<'a>(&'a self, geoid: &'a str, level: GeoLevel) -> Result<Option<GeographyUnit>> {
    let geoid = geoid.to_owned();
    let level = level.as_str();

    let raw: Option<RawUnit> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT geoid, level, name, shape_json FROM geography_units
             WHERE geoid = ?1 AND level = ?2",
            rusqlite::params![geoid, level],
            raw_unit,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawUnit::into_unit).transpose()
  }

  async fn list_units(&self, level: Option<GeoLevel>) -> Result<Vec<GeographyUnit>> {
    let level = level.map(GeoLevel::as_str);

    let raws: Vec<RawUnit> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT geoid, level, name, shape_json FROM geography_units
           WHERE ?1 IS NULL OR level = ?1
           ORDER BY level, geoid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![level], raw_unit)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUnit::into_unit).collect()
  }

  async fn count_units(&self) -> Result<u64> {
    let n: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM geography_units", [], |r| r.get(0))?)
      })
      .await?;
    Ok(u64::try_from(n).unwrap_or_default())
  }

  async fn delete_unit<'a>(&'a self, geoid: &'a str, level: GeoLevel) -> Result<bool> {
    let geoid_owned = geoid.to_owned();
    let level_str = level.as_str();

    // `None` means the unit is still referenced by the hierarchy.
    let outcome: Option<bool> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let referenced: i64 = tx.query_row(
          "SELECT COUNT(*) FROM market_geography_links l
           JOIN hierarchy_edges h
             ON h.child_region_id = l.region_id OR h.parent_region_id = l.region_id
           WHERE l.geoid = ?1 AND l.level = ?2",
          rusqlite::params![geoid_owned, level_str],
          |r| r.get(0),
        )?;
        if referenced > 0 {
          return Ok(None);
        }
        tx.execute(
          "DELETE FROM market_geography_links WHERE geoid = ?1 AND level = ?2",
          rusqlite::params![geoid_owned, level_str],
        )?;
        let deleted = tx.execute(
          "DELETE FROM geography_units WHERE geoid = ?1 AND level = ?2",
          rusqlite::params![geoid_owned, level_str],
        )?;
        tx.commit()?;
        Ok(Some(deleted > 0))
      })
      .await?;

    outcome.ok_or_else(|| {
      Error::Core(georesolve_core::Error::UnitReferenced { geoid: geoid.to_owned(), level })
    })
  }

  // ── Markets ───────────────────────────────────────────────────────────────

  async fn upsert_markets<'a>(&'a self, markets: &'a [Market]) -> Result<UpsertCounts> {
    let raws = markets.iter().map(RawMarket::from_market).collect::<Result<Vec<_>>>()?;
    let now = encode_dt(Utc::now());

    let counts = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut counts = UpsertCounts::default();
        for r in &raws {
          counts += upsert_row(
            &tx,
            MARKET_INSERT,
            MARKET_UPDATE,
            rusqlite::params![
              r.region_id,
              r.region_name,
              r.region_type,
              r.state_code,
              r.county_fips,
              r.external_ids,
              r.source,
              now,
            ],
          )?;
        }
        tx.commit()?;
        Ok(counts)
      })
      .await?;
    Ok(counts)
  }

  async fn get_market<'a>(&'a self, region_id: &'a str) -> Result<Option<Market>> {
    let region_id = region_id.to_owned();

    let raw: Option<RawMarket> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT region_id, region_name, region_type, state_code, county_fips,
                    external_ids, source
             FROM markets WHERE region_id = ?1",
            rusqlite::params![region_id],
            raw_market,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawMarket::into_market).transpose()
  }

  async fn list_markets(&self, region_type: Option<RegionType>) -> Result<Vec<Market>> {
    let region_type = region_type.map(RegionType::as_str);

    let raws: Vec<RawMarket> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT region_id, region_name, region_type, state_code, county_fips,
                  external_ids, source
           FROM markets
           WHERE ?1 IS NULL OR region_type = ?1
           ORDER BY region_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![region_type], raw_market)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMarket::into_market).collect()
  }

  // ── Links ─────────────────────────────────────────────────────────────────

  async fn list_links(&self) -> Result<Vec<MarketGeographyLink>> {
    let raws: Vec<RawLink> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT region_id, geoid, level, strategy, linked_at
           FROM market_geography_links ORDER BY region_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawLink {
              region_id: row.get(0)?,
              geoid:     row.get(1)?,
              level:     row.get(2)?,
              strategy:  row.get(3)?,
              linked_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLink::into_link).collect()
  }

  async fn put_links<'a>(&'a self, links: &'a [MarketGeographyLink]) -> Result<UpsertCounts> {
    let raws: Vec<RawLink> = links.iter().map(RawLink::from_link).collect();

    let counts = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut counts = UpsertCounts::default();
        for r in &raws {
          counts += upsert_row(
            &tx,
            LINK_INSERT,
            LINK_UPDATE,
            rusqlite::params![r.region_id, r.geoid, r.level, r.strategy, r.linked_at],
          )?;
        }
        tx.commit()?;
        Ok(counts)
      })
      .await?;
    Ok(counts)
  }

  async fn delete_links<'a>(&'a self, region_ids: &'a [String]) -> Result<usize> {
    let ids = region_ids.to_vec();

    let n = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut n = 0;
        {
          let mut stmt =
            tx.prepare_cached("DELETE FROM market_geography_links WHERE region_id = ?1")?;
          for id in &ids {
            n += stmt.execute(rusqlite::params![id])?;
          }
        }
        tx.commit()?;
        Ok(n)
      })
      .await?;
    Ok(n)
  }

  // ── Crosswalk ─────────────────────────────────────────────────────────────

  async fn upsert_crosswalk<'a>(&'a self, edges: &'a [CrosswalkEdge]) -> Result<UpsertCounts> {
    let raws: Vec<RawCrosswalk> = edges.iter().map(RawCrosswalk::from_edge).collect();

    let counts = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut counts = UpsertCounts::default();
        for r in &raws {
          counts += upsert_row(
            &tx,
            CROSSWALK_INSERT,
            CROSSWALK_UPDATE,
            rusqlite::params![
              r.child_geoid,
              r.child_level,
              r.parent_geoid,
              r.parent_level,
              r.overlap_fraction,
              r.is_primary,
            ],
          )?;
        }
        tx.commit()?;
        Ok(counts)
      })
      .await?;
    Ok(counts)
  }

  async fn list_crosswalk(&self, relation: Option<RelationType>) -> Result<Vec<CrosswalkEdge>> {
    let levels = relation.map(|r| (r.child.as_str(), r.parent.as_str()));

    let raws: Vec<RawCrosswalk> = self
      .conn
      .call(move |conn| {
        let rows = if let Some((child, parent)) = levels {
          let mut stmt = conn.prepare(&format!(
            "SELECT {CROSSWALK_COLUMNS} FROM crosswalk_edges
             WHERE child_level = ?1 AND parent_level = ?2
             ORDER BY child_geoid, parent_geoid"
          ))?;
          stmt
            .query_map(rusqlite::params![child, parent], raw_crosswalk)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {CROSSWALK_COLUMNS} FROM crosswalk_edges
             ORDER BY child_level, parent_level, child_geoid, parent_geoid"
          ))?;
          stmt
            .query_map([], raw_crosswalk)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCrosswalk::into_edge).collect()
  }

  async fn normalize_primary_flags(&self, relation: RelationType, threshold: f64) -> Result<usize> {
    let mut edges = self.list_crosswalk(Some(relation)).await?;
    let before: Vec<bool> = edges.iter().map(|e| e.is_primary).collect();
    assign_primary(&mut edges, |_| threshold);

    let changed: Vec<RawCrosswalk> = edges
      .iter()
      .zip(before)
      .filter(|(e, was)| e.is_primary != *was)
      .map(|(e, _)| RawCrosswalk::from_edge(e))
      .collect();
    if changed.is_empty() {
      return Ok(0);
    }

    let n = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut n = 0;
        {
          let mut stmt = tx.prepare_cached(
            "UPDATE crosswalk_edges SET is_primary = ?5
             WHERE child_geoid = ?1 AND child_level = ?2
               AND parent_geoid = ?3 AND parent_level = ?4",
          )?;
          for r in &changed {
            n += stmt.execute(rusqlite::params![
              r.child_geoid,
              r.child_level,
              r.parent_geoid,
              r.parent_level,
              r.is_primary,
            ])?;
          }
        }
        tx.commit()?;
        Ok(n)
      })
      .await?;
    Ok(n)
  }

  // ── Hierarchy ─────────────────────────────────────────────────────────────

  async fn upsert_hierarchy_edges<'a>(&'a self, edges: &'a [HierarchyEdge]) -> Result<UpsertCounts> {
    let raws: Vec<RawHierarchyEdge> = edges.iter().map(RawHierarchyEdge::from_edge).collect();
    let now = encode_dt(Utc::now());

    let counts = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut counts = UpsertCounts::default();
        for r in &raws {
          counts += upsert_row(
            &tx,
            HIERARCHY_INSERT,
            HIERARCHY_UPDATE,
            rusqlite::params![
              r.child_region_id,
              r.parent_region_id,
              r.child_level,
              r.parent_level,
              r.overlap_fraction,
              r.is_primary,
              r.origin,
              now,
            ],
          )?;
        }
        tx.commit()?;
        Ok(counts)
      })
      .await?;
    Ok(counts)
  }

  async fn list_hierarchy_edges(&self) -> Result<Vec<HierarchyEdge>> {
    let raws: Vec<RawHierarchyEdge> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {HIERARCHY_COLUMNS} FROM hierarchy_edges
           ORDER BY child_region_id, parent_region_id"
        ))?;
        let rows = stmt
          .query_map([], RawHierarchyEdge::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHierarchyEdge::into_edge).collect()
  }

  async fn parents_of<'a>(&'a self, region_id: &'a str) -> Result<Vec<HierarchyEdge>> {
    let region_id = region_id.to_owned();

    let raws: Vec<RawHierarchyEdge> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {HIERARCHY_COLUMNS} FROM hierarchy_edges
           WHERE child_region_id = ?1
           ORDER BY parent_region_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![region_id], RawHierarchyEdge::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHierarchyEdge::into_edge).collect()
  }

  async fn children_of<'a>(&'a self, region_id: &'a str) -> Result<Vec<HierarchyEdge>> {
    let region_id = region_id.to_owned();

    let raws: Vec<RawHierarchyEdge> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {HIERARCHY_COLUMNS} FROM hierarchy_edges
           WHERE parent_region_id = ?1
           ORDER BY child_region_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![region_id], RawHierarchyEdge::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHierarchyEdge::into_edge).collect()
  }

  // ── Batch failures ────────────────────────────────────────────────────────

  async fn record_batch_failure<'a>(&'a self, failure: &'a BatchFailure) -> Result<()> {
    let r = RawBatchFailure::from_failure(failure);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO batch_failures (
             run_id, stage, table_name, first_key, last_key, row_count, error, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            r.run_id,
            r.stage,
            r.table_name,
            r.first_key,
            r.last_key,
            r.row_count,
            r.error,
            r.recorded_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_batch_failures(&self, run_id: Option<Uuid>) -> Result<Vec<BatchFailure>> {
    let run_id = run_id.map(encode_uuid);

    let raws: Vec<RawBatchFailure> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT run_id, stage, table_name, first_key, last_key, row_count, error, recorded_at
           FROM batch_failures
           WHERE ?1 IS NULL OR run_id = ?1
           ORDER BY failure_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![run_id], |row| {
            Ok(RawBatchFailure {
              run_id:      row.get(0)?,
              stage:       row.get(1)?,
              table_name:  row.get(2)?,
              first_key:   row.get(3)?,
              last_key:    row.get(4)?,
              row_count:   row.get(5)?,
              error:       row.get(6)?,
              recorded_at: row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawBatchFailure::into_failure).collect()
  }
}

//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::Utc;
use georesolve_core::{
  crosswalk::{CrosswalkEdge, RelationType},
  geography::{GeoLevel, GeographyUnit},
  hierarchy::{EdgeOrigin, HierarchyEdge},
  linkage::{MarketGeographyLink, MatchStrategy},
  market::{Market, RegionType},
  shape::Shape,
  store::{BatchFailure, GeoStore, UpsertCounts},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn la_units() -> Vec<GeographyUnit> {
  vec![
    GeographyUnit::new("06", GeoLevel::State, "California"),
    GeographyUnit::new("06037", GeoLevel::County, "Los Angeles County"),
    GeographyUnit::new("90001", GeoLevel::Zip, "90001"),
  ]
}

fn la_markets() -> Vec<Market> {
  vec![
    Market::new("zillow:9", "California", RegionType::State, "zillow"),
    Market::new("zillow:3101", "Los Angeles County", RegionType::County, "zillow").with_state("CA"),
    Market::new("zillow:95982", "90001", RegionType::Zip, "zillow"),
  ]
}

fn link(region_id: &str, geoid: &str, level: GeoLevel) -> MarketGeographyLink {
  MarketGeographyLink {
    region_id: region_id.into(),
    geoid: geoid.into(),
    level,
    strategy: MatchStrategy::ExactId,
    linked_at: Utc::now(),
  }
}

fn edge(child: &str, parent: &str, overlap: Option<f64>, primary: bool) -> HierarchyEdge {
  HierarchyEdge {
    child_region_id:  child.into(),
    parent_region_id: parent.into(),
    child_level:      GeoLevel::Zip,
    parent_level:     GeoLevel::County,
    overlap_fraction: overlap,
    is_primary:       primary,
    origin:           EdgeOrigin::Crosswalk,
  }
}

// ─── Geography units ─────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_units_reports_created_then_unchanged() {
  let s = store().await;

  let first = s.upsert_units(&la_units()).await.unwrap();
  assert_eq!(first, UpsertCounts { created: 3, updated: 0, unchanged: 0 });

  let second = s.upsert_units(&la_units()).await.unwrap();
  assert_eq!(second, UpsertCounts { created: 0, updated: 0, unchanged: 3 });
  assert_eq!(s.count_units().await.unwrap(), 3);
}

#[tokio::test]
async fn renamed_unit_is_an_update() {
  let s = store().await;
  s.upsert_units(&la_units()).await.unwrap();

  let counts = s
    .upsert_unit(GeographyUnit::new("06037", GeoLevel::County, "Los Angeles"))
    .await
    .unwrap();
  assert_eq!(counts.updated, 1);

  let unit = s.get_unit("06037", GeoLevel::County).await.unwrap().unwrap();
  assert_eq!(unit.name, "Los Angeles");
}

#[tokio::test]
async fn missing_shape_keeps_stored_shape() {
  let s = store().await;
  let square = Shape::polygon(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]);
  s.upsert_unit(GeographyUnit::new("06", GeoLevel::State, "California").with_shape(square.clone()))
    .await
    .unwrap();

  let counts = s
    .upsert_unit(GeographyUnit::new("06", GeoLevel::State, "California"))
    .await
    .unwrap();
  assert_eq!(counts.unchanged, 1);

  let unit = s.get_unit("06", GeoLevel::State).await.unwrap().unwrap();
  assert_eq!(unit.shape, Some(square));
}

#[tokio::test]
async fn same_geoid_at_two_levels_are_distinct_units() {
  let s = store().await;
  s.upsert_units(&[
    GeographyUnit::new("31080", GeoLevel::Metro, "Los Angeles-Long Beach-Anaheim, CA"),
    GeographyUnit::new("31080", GeoLevel::Zip, "31080"),
  ])
  .await
  .unwrap();

  assert_eq!(s.list_units(None).await.unwrap().len(), 2);
  assert_eq!(s.list_units(Some(GeoLevel::Metro)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_unit_refused_while_hierarchy_depends_on_it() {
  let s = store().await;
  s.upsert_units(&la_units()).await.unwrap();
  s.upsert_markets(&la_markets()).await.unwrap();
  s.put_links(&[
    link("zillow:95982", "90001", GeoLevel::Zip),
    link("zillow:3101", "06037", GeoLevel::County),
  ])
  .await
  .unwrap();
  s.upsert_hierarchy_edges(&[edge("zillow:95982", "zillow:3101", Some(0.92), true)])
    .await
    .unwrap();

  let err = s.delete_unit("06037", GeoLevel::County).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Core(georesolve_core::Error::UnitReferenced { level: GeoLevel::County, .. })
  ));

  assert!(s.delete_unit("06", GeoLevel::State).await.unwrap());
  assert!(!s.delete_unit("06", GeoLevel::State).await.unwrap());
  assert!(s.get_unit("06037", GeoLevel::County).await.unwrap().is_some());
}

// ─── Markets and links ───────────────────────────────────────────────────────

#[tokio::test]
async fn markets_round_trip_with_external_ids() {
  let s = store().await;
  let m = Market::new("fred:msa:31080", "Los Angeles", RegionType::Metro, "fred")
    .with_state("CA")
    .with_external_id("series_id", "LXXRSA");
  s.upsert_markets(std::slice::from_ref(&m)).await.unwrap();

  let fetched = s.get_market("fred:msa:31080").await.unwrap().unwrap();
  assert_eq!(fetched, m);
  assert!(s.get_market("nope").await.unwrap().is_none());

  let metros = s.list_markets(Some(RegionType::Metro)).await.unwrap();
  assert_eq!(metros.len(), 1);
  assert!(s.list_markets(Some(RegionType::Zip)).await.unwrap().is_empty());
}

#[tokio::test]
async fn relinking_same_unit_is_unchanged() {
  let s = store().await;
  s.upsert_units(&la_units()).await.unwrap();
  s.upsert_markets(&la_markets()).await.unwrap();

  let l = link("zillow:95982", "90001", GeoLevel::Zip);
  assert_eq!(s.put_links(std::slice::from_ref(&l)).await.unwrap().created, 1);

  let again = link("zillow:95982", "90001", GeoLevel::Zip);
  assert_eq!(s.put_links(&[again]).await.unwrap().unchanged, 1);

  let links = s.list_links().await.unwrap();
  assert_eq!(links.len(), 1);
  assert_eq!(links[0].linked_at.timestamp(), l.linked_at.timestamp());

  assert_eq!(s.delete_links(&["zillow:95982".to_owned()]).await.unwrap(), 1);
  assert!(s.list_links().await.unwrap().is_empty());
}

#[tokio::test]
async fn link_to_missing_unit_is_rejected() {
  let s = store().await;
  s.upsert_markets(&la_markets()).await.unwrap();
  let result = s.put_links(&[link("zillow:95982", "90001", GeoLevel::Zip)]).await;
  assert!(matches!(result, Err(Error::Database(_))));
}

// ─── Crosswalk ───────────────────────────────────────────────────────────────

fn cw(child: &str, parent: &str, overlap: f64) -> CrosswalkEdge {
  CrosswalkEdge {
    child_geoid:      child.into(),
    child_level:      GeoLevel::Zip,
    parent_geoid:     parent.into(),
    parent_level:     GeoLevel::County,
    overlap_fraction: overlap,
    is_primary:       false,
  }
}

#[tokio::test]
async fn normalize_primary_flags_picks_one_per_child() {
  let s = store().await;
  s.upsert_crosswalk(&[
    cw("90001", "06037", 0.92),
    cw("90001", "06059", 0.08),
    cw("90002", "06037", 0.40),
    cw("90002", "06059", 0.45),
  ])
  .await
  .unwrap();

  let relation = RelationType::new(GeoLevel::Zip, GeoLevel::County).unwrap();
  let changed = s.normalize_primary_flags(relation, 0.5).await.unwrap();
  assert_eq!(changed, 1);

  let edges = s.list_crosswalk(Some(relation)).await.unwrap();
  let primaries: Vec<_> = edges
    .iter()
    .filter(|e| e.is_primary)
    .map(|e| (e.child_geoid.as_str(), e.parent_geoid.as_str()))
    .collect();
  assert_eq!(primaries, vec![("90001", "06037")]);

  // Rerunning changes nothing.
  assert_eq!(s.normalize_primary_flags(relation, 0.5).await.unwrap(), 0);
}

#[tokio::test]
async fn crosswalk_overlap_change_is_an_update() {
  let s = store().await;
  s.upsert_crosswalk(&[cw("90001", "06037", 0.92)]).await.unwrap();
  let counts = s.upsert_crosswalk(&[cw("90001", "06037", 0.95)]).await.unwrap();
  assert_eq!(counts.updated, 1);

  let other = RelationType::new(GeoLevel::Zip, GeoLevel::Metro).unwrap();
  assert!(s.list_crosswalk(Some(other)).await.unwrap().is_empty());
  assert_eq!(s.list_crosswalk(None).await.unwrap()[0].overlap_fraction, 0.95);
}

// ─── Hierarchy ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn hierarchy_upsert_is_idempotent() {
  let s = store().await;
  s.upsert_markets(&la_markets()).await.unwrap();

  let edges = [
    edge("zillow:95982", "zillow:3101", Some(0.92), true),
    HierarchyEdge {
      child_level: GeoLevel::County,
      parent_level: GeoLevel::State,
      origin: EdgeOrigin::StatePrefix,
      ..edge("zillow:3101", "zillow:9", None, true)
    },
  ];
  assert_eq!(s.upsert_hierarchy_edges(&edges).await.unwrap().created, 2);
  let again = s.upsert_hierarchy_edges(&edges).await.unwrap();
  assert_eq!(again.mutated(), 0);
  assert_eq!(again.unchanged, 2);

  let parents = s.parents_of("zillow:95982").await.unwrap();
  assert_eq!(parents.len(), 1);
  assert_eq!(parents[0].overlap_fraction, Some(0.92));

  let children = s.children_of("zillow:9").await.unwrap();
  assert_eq!(children[0].origin, EdgeOrigin::StatePrefix);
  assert_eq!(children[0].overlap_fraction, None);
}

#[tokio::test]
async fn self_edges_are_rejected() {
  let s = store().await;
  s.upsert_markets(&la_markets()).await.unwrap();
  let result = s
    .upsert_hierarchy_edges(&[edge("zillow:3101", "zillow:3101", None, true)])
    .await;
  assert!(result.is_err());
  assert!(s.list_hierarchy_edges().await.unwrap().is_empty());
}

// ─── Batch failures ──────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_failures_filter_by_run() {
  let s = store().await;
  let run = Uuid::new_v4();
  let failure = BatchFailure {
    run_id:      run,
    stage:       "build".into(),
    table:       "hierarchy_edges".into(),
    first_key:   "a".into(),
    last_key:    "z".into(),
    rows:        500,
    error:       "disk I/O error".into(),
    recorded_at: Utc::now(),
  };
  s.record_batch_failure(&failure).await.unwrap();
  s.record_batch_failure(&BatchFailure { run_id: Uuid::new_v4(), ..failure.clone() })
    .await
    .unwrap();

  assert_eq!(s.list_batch_failures(None).await.unwrap().len(), 2);
  let mine = s.list_batch_failures(Some(run)).await.unwrap();
  assert_eq!(mine.len(), 1);
  assert_eq!(mine[0].rows, 500);
  assert_eq!(mine[0].table, "hierarchy_edges");
}

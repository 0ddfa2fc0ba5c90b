//! End-to-end stage tests over an in-memory SQLite store.

use georesolve_core::{
  crosswalk::{OverlapScale, RawCrosswalkRow, RelationType},
  geography::{GeoLevel, GeographyUnit, NATION_GEOID},
  hierarchy::{EdgeOrigin, HierarchyEdge, Orphan},
  linkage::MatchStrategy,
  market::{Market, RegionType},
  shape::Shape,
  store::GeoStore,
};
use georesolve_store_sqlite::SqliteStore;

use crate::{BuildState, Error, Pipeline, PipelineConfig};

async fn pipeline() -> Pipeline<SqliteStore> {
  let store = SqliteStore::open_in_memory()
    .await
    .expect("in-memory store");
  Pipeline::new(store, PipelineConfig::default())
}

fn relation(child: GeoLevel, parent: GeoLevel) -> RelationType {
  RelationType::new(child, parent).unwrap()
}

fn row(child: &str, parent: &str, value: f64, scale: OverlapScale) -> RawCrosswalkRow {
  RawCrosswalkRow {
    child_geoid: child.into(),
    parent_geoid: parent.into(),
    overlap_value: value,
    scale,
  }
}

fn square(x: f64, y: f64, size: f64) -> Shape {
  Shape::polygon(vec![[x, y], [x + size, y], [x + size, y + size], [x, y + size]])
}

fn orphan(region_id: &str, level: GeoLevel, missing_parent_level: GeoLevel, fillable: bool) -> Orphan {
  Orphan { region_id: region_id.into(), level, missing_parent_level, fillable }
}

fn ids(markets: &[Market]) -> Vec<&str> { markets.iter().map(|m| m.region_id.as_str()).collect() }

/// California, Los Angeles County and zip 90001, each with one market, and
/// the zip 92% inside the county.
async fn los_angeles(p: &Pipeline<SqliteStore>) {
  p.load_geography(vec![
    GeographyUnit::new("06", GeoLevel::State, "California"),
    GeographyUnit::new("06037", GeoLevel::County, "Los Angeles County"),
    GeographyUnit::new("90001", GeoLevel::Zip, "90001"),
  ])
  .await
  .unwrap();
  p.import_markets(vec![
    Market::new("zip:90001", "90001", RegionType::Zip, "zillow"),
    Market::new("county:la", "Los Angeles County", RegionType::County, "zillow").with_state("CA"),
    Market::new("state:ca", "California", RegionType::State, "zillow"),
  ])
  .await
  .unwrap();
  p.import_crosswalk(relation(GeoLevel::Zip, GeoLevel::County), vec![row(
    "90001",
    "06037",
    0.92,
    OverlapScale::Fraction,
  )])
  .await
  .unwrap();
}

// ─── Building ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn la_scenario_yields_one_primary_edge() {
  let p = pipeline().await;
  los_angeles(&p).await;

  let links = p.resolve_links().await.unwrap();
  assert_eq!(links.linked(), 3);
  assert_eq!(links.by_strategy[&MatchStrategy::ExactId], 2);
  assert_eq!(links.by_strategy[&MatchStrategy::CompositeKey], 1);

  let report = p.build_hierarchy().await.unwrap();
  assert_eq!(report.state, BuildState::Done);
  assert_eq!(report.counts().created, 1);

  let edges = p.store().list_hierarchy_edges().await.unwrap();
  assert_eq!(edges.len(), 1);
  let edge = &edges[0];
  assert_eq!(edge.key(), ("zip:90001", "county:la"));
  assert_eq!(edge.overlap_fraction, Some(0.92));
  assert!(edge.is_primary);
  assert_eq!(edge.origin, EdgeOrigin::Crosswalk);

  // Only the county could be attached by a rerun: a state market exists.
  assert_eq!(report.orphans, vec![
    orphan("county:la", GeoLevel::County, GeoLevel::State, true),
    orphan("state:ca", GeoLevel::State, GeoLevel::Nation, false),
    orphan("zip:90001", GeoLevel::Zip, GeoLevel::Metro, false),
  ]);
  assert!(p.parents("county:la", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_build_changes_nothing() {
  let p = pipeline().await;
  los_angeles(&p).await;
  p.derive_structural().await.unwrap();
  p.resolve_links().await.unwrap();

  let first = p.build_hierarchy().await.unwrap();
  assert_eq!(first.counts().created, 2);

  let second = p.build_hierarchy().await.unwrap();
  assert_eq!(second.counts().mutated(), 0);
  assert_eq!(second.counts().unchanged, 2);
  assert_eq!(second.edges_derived, first.edges_derived);

  let relink = p.resolve_links().await.unwrap();
  assert_eq!(relink.kept, 3);
  assert_eq!(relink.newly_linked, 0);
}

#[tokio::test]
async fn zip_without_crosswalk_is_an_orphan() {
  let p = pipeline().await;
  p.load_geography(vec![
    GeographyUnit::new("06", GeoLevel::State, "California"),
    GeographyUnit::new("90001", GeoLevel::Zip, "90001"),
  ])
  .await
  .unwrap();
  p.import_markets(vec![
    Market::new("zip:90001", "90001", RegionType::Zip, "zillow"),
    Market::new("state:ca", "California", RegionType::State, "zillow"),
  ])
  .await
  .unwrap();

  let links = p.resolve_links().await.unwrap();
  assert_eq!(links.linked(), 2);
  let report = p.build_hierarchy().await.unwrap();

  assert_eq!(report.edges_derived, 0);
  assert!(p.store().list_hierarchy_edges().await.unwrap().is_empty());
  assert_eq!(report.orphans, vec![
    orphan("state:ca", GeoLevel::State, GeoLevel::Nation, false),
    orphan("zip:90001", GeoLevel::Zip, GeoLevel::Metro, false),
    orphan("zip:90001", GeoLevel::Zip, GeoLevel::County, false),
  ]);
}

#[tokio::test]
async fn build_refuses_empty_geography() {
  let p = pipeline().await;
  p.import_markets(vec![Market::new("zip:90001", "90001", RegionType::Zip, "zillow")])
    .await
    .unwrap();
  let err = p.build_hierarchy().await.unwrap_err();
  assert!(matches!(err, Error::EmptyGeography));
}

#[tokio::test]
async fn markets_on_the_same_unit_never_contain_each_other() {
  let p = pipeline().await;
  los_angeles(&p).await;
  p.import_markets(vec![Market::new("redfin:la", "06037", RegionType::County, "redfin")])
    .await
    .unwrap();
  p.derive_structural().await.unwrap();
  p.resolve_links().await.unwrap();
  p.build_hierarchy().await.unwrap();

  let edges = p.store().list_hierarchy_edges().await.unwrap();
  assert!(edges.iter().all(|e| !e.is_self_edge()));
  // Both county markets are crosswalk parents of the zip and children of the state.
  assert_eq!(p.children("county:la", None).await.unwrap().len(), 1);
  assert_eq!(p.children("redfin:la", None).await.unwrap().len(), 1);
  let counties = p.children("state:ca", Some(GeoLevel::County)).await.unwrap();
  assert_eq!(ids(&counties), vec!["county:la", "redfin:la"]);
  let parents = p.parents("zip:90001", None).await.unwrap();
  assert_eq!(ids(&parents), vec!["county:la", "redfin:la"]);
}

#[tokio::test]
async fn new_unit_adds_links_without_losing_edges() {
  let p = pipeline().await;
  los_angeles(&p).await;
  p.store().delete_unit("90001", GeoLevel::Zip).await.unwrap();
  p.derive_structural().await.unwrap();

  let before = p.resolve_links().await.unwrap();
  assert_eq!(before.unresolved, vec!["zip:90001".to_owned()]);
  p.build_hierarchy().await.unwrap();
  let edges_before = p.store().list_hierarchy_edges().await.unwrap().len();

  p.load_geography(vec![GeographyUnit::new("90001", GeoLevel::Zip, "90001")])
    .await
    .unwrap();
  let after = p.resolve_links().await.unwrap();
  assert!(after.linked() > before.linked());
  assert_eq!(after.newly_linked, 1);

  p.build_hierarchy().await.unwrap();
  let edges_after = p.store().list_hierarchy_edges().await.unwrap().len();
  assert!(edges_after > edges_before);
}

#[tokio::test]
async fn state_prefix_markets_attach_to_the_state() {
  let p = pipeline().await;
  p.load_geography(vec![GeographyUnit::new("06", GeoLevel::State, "California")])
    .await
    .unwrap();
  p.import_markets(vec![
    Market::new("state:ca", "California", RegionType::State, "fred"),
    Market::new("county:oc", "Orange County", RegionType::County, "fred").with_county_fips("06059"),
  ])
  .await
  .unwrap();

  let links = p.resolve_links().await.unwrap();
  assert_eq!(links.by_strategy[&MatchStrategy::StatePrefix], 1);

  let report = p.build_hierarchy().await.unwrap();
  assert!(report.orphans.iter().all(|o| o.region_id != "county:oc"));
  let parents = p.parents_edges("county:oc", None).await.unwrap();
  assert_eq!(parents.len(), 1);
  assert_eq!(parents[0].parent_region_id, "state:ca");
  assert_eq!(parents[0].origin, EdgeOrigin::StatePrefix);
  assert_eq!(parents[0].overlap_fraction, None);
  assert!(parents[0].is_primary);

  // Once the county unit exists the market links to it directly.
  p.load_geography(vec![GeographyUnit::new("06059", GeoLevel::County, "Orange County")])
    .await
    .unwrap();
  let relink = p.resolve_links().await.unwrap();
  assert_eq!(relink.newly_linked, 1);
  assert_eq!(relink.by_strategy.get(&MatchStrategy::StatePrefix), None);
}

#[tokio::test]
async fn shapes_fill_in_missing_parents() {
  let p = pipeline().await;
  p.load_geography(vec![
    GeographyUnit::new("06037", GeoLevel::County, "Los Angeles County").with_shape(square(0.0, 0.0, 10.0)),
    GeographyUnit::new("06059", GeoLevel::County, "Orange County").with_shape(square(10.0, 0.0, 10.0)),
    GeographyUnit::new("90001", GeoLevel::Zip, "90001").with_shape(square(2.0, 2.0, 1.0)),
  ])
  .await
  .unwrap();
  p.import_markets(vec![
    Market::new("zip:90001", "90001", RegionType::Zip, "zillow"),
    Market::new("county:la", "06037", RegionType::County, "zillow"),
    Market::new("county:oc", "06059", RegionType::County, "zillow"),
  ])
  .await
  .unwrap();
  p.resolve_links().await.unwrap();

  let report = p.build_hierarchy().await.unwrap();
  assert_eq!(report.by_origin[&EdgeOrigin::Geometric], 1);
  let parents = p.parents_edges("zip:90001", Some(GeoLevel::County)).await.unwrap();
  assert_eq!(parents.len(), 1);
  assert_eq!(parents[0].parent_region_id, "county:la");
  assert_eq!(parents[0].overlap_fraction, None);
  assert!(parents[0].is_primary);
}

#[tokio::test]
async fn geometric_fallback_can_be_disabled() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let p = Pipeline::new(store, PipelineConfig { geometric_fallback: false, ..PipelineConfig::default() });
  p.load_geography(vec![
    GeographyUnit::new("06037", GeoLevel::County, "Los Angeles County").with_shape(square(0.0, 0.0, 10.0)),
    GeographyUnit::new("90001", GeoLevel::Zip, "90001").with_shape(square(2.0, 2.0, 1.0)),
  ])
  .await
  .unwrap();
  p.import_markets(vec![
    Market::new("zip:90001", "90001", RegionType::Zip, "zillow"),
    Market::new("county:la", "06037", RegionType::County, "zillow"),
  ])
  .await
  .unwrap();
  p.resolve_links().await.unwrap();

  let report = p.build_hierarchy().await.unwrap();
  assert_eq!(report.edges_derived, 0);
  let fillable: Vec<_> = report.orphans.iter().filter(|o| o.fillable).collect();
  assert_eq!(fillable.len(), 1);
  assert_eq!(fillable[0].region_id, "zip:90001");
  assert_eq!(fillable[0].missing_parent_level, GeoLevel::County);
}

// ─── Crosswalk import ────────────────────────────────────────────────────────

#[tokio::test]
async fn ambiguous_auto_value_is_a_percentage() {
  let p = pipeline().await;
  let zip_county = relation(GeoLevel::Zip, GeoLevel::County);
  let report = p
    .import_crosswalk(zip_county, vec![row("90001", "06037", 1.2, OverlapScale::Auto)])
    .await
    .unwrap();
  assert_eq!(report.ambiguous_scale, 1);

  let stored = p.store().list_crosswalk(Some(zip_county)).await.unwrap();
  assert!((stored[0].overlap_fraction - 0.012).abs() < 1e-12);
}

#[tokio::test]
async fn percentages_come_back_as_fractions() {
  let p = pipeline().await;
  let zip_county = relation(GeoLevel::Zip, GeoLevel::County);
  let fractions = [0.0, 0.05, 0.37, 0.5, 1.0];
  let rows = fractions
    .iter()
    .enumerate()
    .map(|(i, f)| row(&format!("9000{i}"), "06037", f * 100.0, OverlapScale::Percentage))
    .collect();
  p.import_crosswalk(zip_county, rows).await.unwrap();

  let stored = p.store().list_crosswalk(Some(zip_county)).await.unwrap();
  for (edge, f) in stored.iter().zip(fractions) {
    assert!((edge.overlap_fraction - f).abs() < 1e-12, "{} != {f}", edge.overlap_fraction);
  }
}

#[tokio::test]
async fn primary_stays_unique_across_imports() {
  let p = pipeline().await;
  let zip_county = relation(GeoLevel::Zip, GeoLevel::County);
  p.import_crosswalk(zip_county, vec![
    row("90001", "06037", 0.6, OverlapScale::Fraction),
    row("90001", "06059", 0.4, OverlapScale::Fraction),
  ])
  .await
  .unwrap();
  let report = p
    .import_crosswalk(zip_county, vec![row("90001", "06111", 0.7, OverlapScale::Fraction)])
    .await
    .unwrap();
  assert_eq!(report.primary_flags_changed, 1);

  let stored = p.store().list_crosswalk(Some(zip_county)).await.unwrap();
  let primaries: Vec<_> = stored.iter().filter(|e| e.is_primary).collect();
  assert_eq!(primaries.len(), 1);
  assert_eq!(primaries[0].parent_geoid, "06111");

  // Re-importing the same file flips nothing.
  let again = p
    .import_crosswalk(zip_county, vec![row("90001", "06111", 0.7, OverlapScale::Fraction)])
    .await
    .unwrap();
  assert_eq!(again.primary_flags_changed, 0);
  assert_eq!(again.batches.counts.mutated(), 0);
}

#[tokio::test]
async fn crosswalk_csv_rejects_bad_rows_and_keeps_the_rest() {
  let p = pipeline().await;
  let csv = "child_geoid,parent_geoid,overlap_value\n\
             90001,06037,92\n\
             90002,06037,-4\n\
             90003,06037,n/a\n";
  let report = p
    .import_crosswalk_csv(relation(GeoLevel::Zip, GeoLevel::County), csv.as_bytes(), OverlapScale::Auto)
    .await
    .unwrap();
  assert_eq!(report.rows_read, 3);
  assert_eq!(report.rows_rejected, 2);
  assert_eq!(p.store().list_crosswalk(None).await.unwrap().len(), 1);
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// The LA fixture plus the nation, Orange County and a second zip_county
/// edge into Orange County.
async fn two_counties(p: &Pipeline<SqliteStore>) {
  los_angeles(p).await;
  p.load_geography(vec![
    GeographyUnit::new(NATION_GEOID, GeoLevel::Nation, "United States"),
    GeographyUnit::new("06059", GeoLevel::County, "Orange County"),
  ])
  .await
  .unwrap();
  p.import_markets(vec![
    Market::new("nation:us", "United States", RegionType::Country, "zillow"),
    Market::new("county:oc", "06059", RegionType::County, "zillow"),
  ])
  .await
  .unwrap();
  p.import_crosswalk(relation(GeoLevel::Zip, GeoLevel::County), vec![row(
    "90001",
    "06059",
    0.08,
    OverlapScale::Fraction,
  )])
  .await
  .unwrap();
  p.derive_structural().await.unwrap();
  p.resolve_links().await.unwrap();
  p.build_hierarchy().await.unwrap();
}

#[tokio::test]
async fn primary_chain_reaches_the_nation() {
  let p = pipeline().await;
  two_counties(&p).await;

  let chain = p.primary_chain("zip:90001").await.unwrap();
  assert_eq!(ids(&chain), vec!["zip:90001", "county:la", "state:ca", "nation:us"]);
  assert!(p.primary_chain("nope").await.unwrap().is_empty());
}

#[tokio::test]
async fn primary_chain_respects_max_depth() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let p = Pipeline::new(store, PipelineConfig { max_depth: 1, ..PipelineConfig::default() });
  two_counties(&p).await;

  let chain = p.primary_chain("zip:90001").await.unwrap();
  assert_eq!(ids(&chain), vec!["zip:90001", "county:la"]);
}

#[tokio::test]
async fn full_path_lists_every_chain() {
  let p = pipeline().await;
  two_counties(&p).await;

  let paths = p.full_path("zip:90001").await.unwrap();
  let paths: Vec<Vec<&str>> = paths.iter().map(|path| ids(path)).collect();
  assert_eq!(paths, vec![
    vec!["zip:90001", "county:la", "state:ca", "nation:us"],
    vec!["zip:90001", "county:oc", "state:ca", "nation:us"],
  ]);

  let non_primary = p.parents_edges("zip:90001", Some(GeoLevel::County)).await.unwrap();
  assert_eq!(non_primary.len(), 2);
  assert!(!non_primary[1].is_primary);
}

#[tokio::test]
async fn traversal_survives_cycles() {
  let p = pipeline().await;
  p.import_markets(vec![
    Market::new("a", "a", RegionType::County, "t"),
    Market::new("b", "b", RegionType::State, "t"),
  ])
  .await
  .unwrap();
  let edge = |child: &str, parent: &str| HierarchyEdge {
    child_region_id:  child.into(),
    parent_region_id: parent.into(),
    child_level:      GeoLevel::County,
    parent_level:     GeoLevel::State,
    overlap_fraction: Some(1.0),
    is_primary:       true,
    origin:           EdgeOrigin::Crosswalk,
  };
  p.store()
    .upsert_hierarchy_edges(&[edge("a", "b"), edge("b", "a")])
    .await
    .unwrap();

  let chain = p.primary_chain("a").await.unwrap();
  assert_eq!(ids(&chain), vec!["a", "b"]);

  let paths = p.full_path("a").await.unwrap();
  assert_eq!(paths.len(), 1);
  assert_eq!(ids(&paths[0]), vec!["a", "b"]);
}

#[tokio::test]
async fn traversal_stops_at_max_depth() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let p = Pipeline::new(store, PipelineConfig { max_depth: 3, ..PipelineConfig::default() });
  let names: Vec<String> = (0..8).map(|i| format!("m{i}")).collect();
  let markets = names
    .iter()
    .map(|n| Market::new(n.as_str(), n.as_str(), RegionType::County, "t"))
    .collect();
  p.import_markets(markets).await.unwrap();
  let ring: Vec<HierarchyEdge> = (0..names.len())
    .map(|i| HierarchyEdge {
      child_region_id:  names[i].clone(),
      parent_region_id: names[(i + 1) % names.len()].clone(),
      child_level:      GeoLevel::County,
      parent_level:     GeoLevel::State,
      overlap_fraction: None,
      is_primary:       true,
      origin:           EdgeOrigin::Geometric,
    })
    .collect();
  p.store().upsert_hierarchy_edges(&ring).await.unwrap();

  let chain = p.primary_chain("m0").await.unwrap();
  assert_eq!(ids(&chain), vec!["m0", "m1", "m2", "m3"]);
  let paths = p.full_path("m0").await.unwrap();
  assert_eq!(paths.len(), 1);
  assert_eq!(ids(&paths[0]), vec!["m0", "m1", "m2", "m3"]);
}

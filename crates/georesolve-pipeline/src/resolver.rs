//! Linkage stage: attach every market to at most one canonical unit.
//!
//! Links whose unit still exists are kept untouched, except state-prefix
//! links, which are replaced once the market's own unit resolves. Stale links
//! are dropped and the market goes back through the cascade with everything
//! else that is unlinked. Unmatched markets are only logged; the next run
//! retries them.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use georesolve_core::{
  geography::GeoLevel,
  linkage::{GeographyIndex, LinkOutcome, MarketGeographyLink, MatchStrategy},
  store::GeoStore,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{BatchReport, Error, Pipeline, Result};

/// Outcome of one resolver run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkReport {
  pub run_id:       Uuid,
  pub markets:      usize,
  /// Valid links carried over from earlier runs.
  pub kept:         usize,
  pub newly_linked: usize,
  pub stale:        usize,
  /// Every linked market after this run, per strategy.
  pub by_strategy:  BTreeMap<MatchStrategy, usize>,
  pub ambiguous:    Vec<String>,
  pub unresolved:   Vec<String>,
  /// Markets whose region type has no canonical level.
  pub unsupported:  usize,
  pub batches:      BatchReport,
}

impl LinkReport {
  pub fn linked(&self) -> usize { self.by_strategy.values().sum() }
}

/// A stored link is still valid when its unit exists at the level the
/// strategy implies for the market.
fn link_is_valid(
  link: &MarketGeographyLink,
  market_level: Option<GeoLevel>,
  index: &GeographyIndex,
) -> bool {
  let level_ok = match link.strategy {
    MatchStrategy::StatePrefix => {
      link.level == GeoLevel::State && market_level == Some(GeoLevel::County)
    }
    MatchStrategy::ExactId | MatchStrategy::CompositeKey => market_level == Some(link.level),
  };
  level_ok && index.contains(&link.geoid, link.level)
}

impl<S: GeoStore + 'static> Pipeline<S> {
  /// Run every market lacking a valid link through the match cascade.
  pub async fn resolve_links(&self) -> Result<LinkReport> {
    let runner = self.runner();
    let mut report = LinkReport { run_id: runner.run_id(), ..LinkReport::default() };

    let units = self.store.list_units(None).await.map_err(Error::store)?;
    let index = GeographyIndex::new(&units);
    let markets = self.store.list_markets(None).await.map_err(Error::store)?;
    let existing: HashMap<String, MarketGeographyLink> = self
      .store
      .list_links()
      .await
      .map_err(Error::store)?
      .into_iter()
      .map(|l| (l.region_id.clone(), l))
      .collect();
    report.markets = markets.len();

    let mut stale = Vec::new();
    let mut fresh = Vec::new();
    let now = Utc::now();

    for market in &markets {
      let current = existing.get(&market.region_id);
      let valid = current.filter(|l| link_is_valid(l, market.level(), &index));
      if let Some(link) = current
        && valid.is_none()
      {
        debug!(region_id = %market.region_id, geoid = %link.geoid, "dropping stale link");
        stale.push(market.region_id.clone());
      }
      if let Some(link) = valid
        && link.strategy != MatchStrategy::StatePrefix
      {
        report.kept += 1;
        *report.by_strategy.entry(link.strategy).or_default() += 1;
        continue;
      }

      let outcome = index.resolve(market);
      // A state-prefix link gives way once the market's own unit appears.
      if let Some(link) = valid
        && !matches!(&outcome, LinkOutcome::Linked(r) if r.strategy != MatchStrategy::StatePrefix)
      {
        report.kept += 1;
        *report.by_strategy.entry(link.strategy).or_default() += 1;
        continue;
      }

      match outcome {
        LinkOutcome::Linked(resolution) => {
          debug!(
            region_id = %market.region_id,
            geoid = %resolution.geoid,
            strategy = %resolution.strategy,
            "linked"
          );
          *report.by_strategy.entry(resolution.strategy).or_default() += 1;
          fresh.push(resolution.into_link(market.region_id.clone(), now));
        }
        LinkOutcome::Ambiguous { candidates } => {
          warn!(
            region_id = %market.region_id,
            name = %market.region_name,
            candidates = ?candidates,
            "ambiguous match; left unlinked"
          );
          report.ambiguous.push(market.region_id.clone());
        }
        LinkOutcome::Unresolved => {
          info!(
            region_id = %market.region_id,
            name = %market.region_name,
            region_type = %market.region_type,
            "no canonical unit; left unlinked"
          );
          report.unresolved.push(market.region_id.clone());
        }
        LinkOutcome::Unsupported => report.unsupported += 1,
      }
    }

    if !stale.is_empty() {
      report.stale = self.store.delete_links(&stale).await.map_err(Error::store)?;
    }

    report.newly_linked = fresh.len();
    report.batches = runner
      .run(
        &self.store,
        "resolve",
        "market_geography_links",
        fresh,
        |l| l.region_id.clone(),
        |s, chunk| async move { s.put_links(&chunk).await },
      )
      .await?;

    for (strategy, count) in &report.by_strategy {
      info!(run_id = %report.run_id, %strategy, count, "linked markets");
    }
    info!(
      run_id = %report.run_id,
      markets = report.markets,
      kept = report.kept,
      newly_linked = report.newly_linked,
      stale = report.stale,
      ambiguous = report.ambiguous.len(),
      unresolved = report.unresolved.len(),
      unsupported = report.unsupported,
      failed_batches = report.batches.failed,
      "linkage resolved"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use georesolve_core::geography::GeographyUnit;

  use super::*;

  fn link(geoid: &str, level: GeoLevel, strategy: MatchStrategy) -> MarketGeographyLink {
    MarketGeographyLink {
      region_id: "m".into(),
      geoid: geoid.into(),
      level,
      strategy,
      linked_at: Utc::now(),
    }
  }

  #[test]
  fn validity_tracks_unit_and_level() {
    let units = [
      GeographyUnit::new("06", GeoLevel::State, "California"),
      GeographyUnit::new("06037", GeoLevel::County, "Los Angeles County"),
    ];
    let index = GeographyIndex::new(units.iter());

    let county = link("06037", GeoLevel::County, MatchStrategy::ExactId);
    assert!(link_is_valid(&county, Some(GeoLevel::County), &index));
    assert!(!link_is_valid(&county, Some(GeoLevel::Zip), &index));

    let gone = link("06059", GeoLevel::County, MatchStrategy::CompositeKey);
    assert!(!link_is_valid(&gone, Some(GeoLevel::County), &index));

    let prefix = link("06", GeoLevel::State, MatchStrategy::StatePrefix);
    assert!(link_is_valid(&prefix, Some(GeoLevel::County), &index));
  }
}

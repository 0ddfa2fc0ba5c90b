//! Market → canonical unit linkage.
//!
//! A [`GeographyIndex`] is built once per resolver run from every canonical
//! unit; each market is then pushed through the cascade in
//! [`GeographyIndex::resolve`]. The first strategy that produces a unique unit
//! wins.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
  geography::{GeoLevel, GeographyUnit},
  market::Market,
  normalize::{normalize_name, principal_city, state_abbreviation, trailing_states},
};

// ─── Link records ────────────────────────────────────────────────────────────

/// Which cascade step produced a link.
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
pub enum MatchStrategy {
  /// A geoid carried by the market equals the unit's geoid.
  ExactId,
  /// State plus normalised name.
  CompositeKey,
  /// A county-level identifier whose first two digits name a state unit.
  /// The linked unit is the containing state, not the county itself.
  StatePrefix,
}

impl MatchStrategy {
  pub fn as_str(self) -> &'static str { self.into() }
}

/// A market's current link to a canonical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketGeographyLink {
  pub region_id: String,
  pub geoid:     String,
  pub level:     GeoLevel,
  pub strategy:  MatchStrategy,
  pub linked_at: DateTime<Utc>,
}

/// A unit chosen by the cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
  pub geoid:    String,
  pub level:    GeoLevel,
  pub strategy: MatchStrategy,
}

impl Resolution {
  pub fn into_link(self, region_id: impl Into<String>, linked_at: DateTime<Utc>) -> MarketGeographyLink {
    MarketGeographyLink {
      region_id: region_id.into(),
      geoid: self.geoid,
      level: self.level,
      strategy: self.strategy,
      linked_at,
    }
  }
}

/// Result of running one market through the cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
  Linked(Resolution),
  /// The name matched several units and no later step decided.
  Ambiguous { candidates: Vec<String> },
  Unresolved,
  /// The market's region type has no canonical level.
  Unsupported,
}

// ─── Index ───────────────────────────────────────────────────────────────────

struct MetroEntry {
  geoid:  String,
  states: Vec<String>,
}

/// Lookup tables over the canonical geography.
#[derive(Default)]
pub struct GeographyIndex {
  keys:          HashSet<(GeoLevel, String)>,
  by_name:       HashMap<(GeoLevel, String), Vec<String>>,
  metro_by_city: HashMap<String, Vec<MetroEntry>>,
}

impl GeographyIndex {
  pub fn new<'a>(units: impl IntoIterator<Item = &'a GeographyUnit>) -> Self {
    let mut index = Self::default();
    for unit in units {
      index.insert(unit);
    }
    index
  }

  pub fn insert(&mut self, unit: &GeographyUnit) {
    self.keys.insert((unit.level, unit.geoid.clone()));

    let name = normalize_name(&unit.name);
    if !name.is_empty() {
      self
        .by_name
        .entry((unit.level, name))
        .or_default()
        .push(unit.geoid.clone());
    }

    if unit.level == GeoLevel::Metro {
      let city = principal_city(&unit.name);
      if !city.is_empty() {
        self.metro_by_city.entry(city).or_default().push(MetroEntry {
          geoid:  unit.geoid.clone(),
          states: trailing_states(&unit.name),
        });
      }
    }
  }

  pub fn len(&self) -> usize { self.keys.len() }

  pub fn is_empty(&self) -> bool { self.keys.is_empty() }

  pub fn contains(&self, geoid: &str, level: GeoLevel) -> bool {
    self.keys.contains(&(level, geoid.to_owned()))
  }

  /// Run `market` through the cascade: exact geoid, composite key, state
  /// prefix.
  pub fn resolve(&self, market: &Market) -> LinkOutcome {
    let Some(level) = market.level() else {
      return LinkOutcome::Unsupported;
    };

    if let Some(geoid) = market
      .candidate_geoids()
      .into_iter()
      .find(|g| self.contains(g, level))
    {
      return LinkOutcome::Linked(Resolution { geoid, level, strategy: MatchStrategy::ExactId });
    }

    let composite = self.composite_candidates(market, level);
    if let [geoid] = composite.as_slice() {
      return LinkOutcome::Linked(Resolution {
        geoid: geoid.clone(),
        level,
        strategy: MatchStrategy::CompositeKey,
      });
    }

    if level == GeoLevel::County
      && let Some(id) = market.five_digit_identifier()
      && self.contains(&id[..2], GeoLevel::State)
    {
      return LinkOutcome::Linked(Resolution {
        geoid:    id[..2].to_owned(),
        level:    GeoLevel::State,
        strategy: MatchStrategy::StatePrefix,
      });
    }

    if composite.len() > 1 {
      LinkOutcome::Ambiguous { candidates: composite }
    } else {
      LinkOutcome::Unresolved
    }
  }

  /// Units whose normalised name matches the market's, restricted to the
  /// market's state where the level allows it.
  fn composite_candidates(&self, market: &Market, level: GeoLevel) -> Vec<String> {
    let name = normalize_name(&market.region_name);
    if name.is_empty() {
      return Vec::new();
    }
    let state = market.state_fips();
    let by_name = self.by_name.get(&(level, name.clone()));

    if level.is_state_prefixed() {
      let Some(state) = state else {
        return Vec::new();
      };
      return by_name
        .into_iter()
        .flatten()
        .filter(|g| g.starts_with(state))
        .cloned()
        .collect();
    }

    let exact: Vec<String> = by_name.cloned().unwrap_or_default();
    if level != GeoLevel::Metro || exact.len() == 1 {
      return exact;
    }

    // Metro names from sources usually carry only the principal city.
    let abbr = state.and_then(state_abbreviation);
    self
      .metro_by_city
      .get(&name)
      .into_iter()
      .flatten()
      .filter(|m| abbr.is_none_or(|a| m.states.iter().any(|s| s == a)))
      .map(|m| m.geoid.clone())
      .collect()
  }
}

//! Markets: regions as known to one ingestion source.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
  geography::{GeoLevel, NATION_GEOID},
  normalize::{is_numeric, pad_geoid, state_fips, trailing_states},
};

/// The region type a source reports. Aligned to, but not the same as,
/// [`GeoLevel`]: sources also publish regions with no canonical counterpart.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RegionType {
  #[strum(to_string = "country", serialize = "nation", serialize = "national")]
  Country,
  State,
  #[strum(to_string = "metro", serialize = "msa", serialize = "cbsa")]
  Metro,
  County,
  #[strum(to_string = "city", serialize = "place")]
  City,
  #[strum(to_string = "zip", serialize = "zip code", serialize = "zcta", serialize = "zipcode")]
  Zip,
  Neighborhood,
}

impl RegionType {
  /// The canonical level markets of this type link to, if any.
  pub fn level(self) -> Option<GeoLevel> {
    match self {
      Self::Country => Some(GeoLevel::Nation),
      Self::State => Some(GeoLevel::State),
      Self::Metro => Some(GeoLevel::Metro),
      Self::County => Some(GeoLevel::County),
      Self::City => Some(GeoLevel::Place),
      Self::Zip => Some(GeoLevel::Zip),
      Self::Neighborhood => None,
    }
  }

  pub fn as_str(self) -> &'static str { self.into() }
}

/// External identifier keys that carry a canonical geoid.
const GEOID_KEYS: &[&str] = &["geoid", "fips", "cbsa", "zcta"];

/// A region record owned by one ingestion source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
  /// Globally unique across all sources.
  pub region_id:    String,
  pub region_name:  String,
  pub region_type:  RegionType,
  pub state_code:   Option<String>,
  pub county_fips:  Option<String>,
  /// Source-specific identifiers (e.g. `geoid`, `series_id`, `table_id`).
  #[serde(default)]
  pub external_ids: BTreeMap<String, String>,
  /// Name of the ingestion source that owns this record.
  pub source:       String,
}

impl Market {
  pub fn new(
    region_id: impl Into<String>,
    region_name: impl Into<String>,
    region_type: RegionType,
    source: impl Into<String>,
  ) -> Self {
    Self {
      region_id: region_id.into(),
      region_name: region_name.into(),
      region_type,
      state_code: None,
      county_fips: None,
      external_ids: BTreeMap::new(),
      source: source.into(),
    }
  }

  pub fn with_state(mut self, state_code: impl Into<String>) -> Self {
    self.state_code = Some(state_code.into());
    self
  }

  pub fn with_county_fips(mut self, county_fips: impl Into<String>) -> Self {
    self.county_fips = Some(county_fips.into());
    self
  }

  pub fn with_external_id(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.external_ids.insert(key.into(), value.into());
    self
  }

  pub fn level(&self) -> Option<GeoLevel> { self.region_type.level() }

  /// The 2-digit state FIPS for this market, from `state_code` or the
  /// state qualifier in the region name.
  pub fn state_fips(&self) -> Option<&'static str> {
    self
      .state_code
      .as_deref()
      .and_then(state_fips)
      .or_else(|| {
        trailing_states(&self.region_name)
          .first()
          .and_then(|s| state_fips(s))
      })
  }

  /// Geoids this market directly claims, most authoritative first, already
  /// padded to the width of the market's level.
  pub fn candidate_geoids(&self) -> Vec<String> {
    let Some(level) = self.level() else {
      return Vec::new();
    };

    let mut out: Vec<String> = GEOID_KEYS
      .iter()
      .filter_map(|k| {
        self
          .external_ids
          .iter()
          .find(|(key, _)| key.eq_ignore_ascii_case(k))
          .map(|(_, v)| pad_geoid(v, level))
      })
      .collect();

    match level {
      GeoLevel::Nation => out.push(NATION_GEOID.to_owned()),
      GeoLevel::State => {
        if let Some(fips) = self.state_code.as_deref().and_then(state_fips) {
          out.push(fips.to_owned());
        }
        if let Some(fips) = state_fips(&self.region_name) {
          out.push(fips.to_owned());
        }
      }
      GeoLevel::County => {
        if let Some(county) = self.county_fips.as_deref().map(str::trim) {
          if county.len() <= 3 && is_numeric(county) {
            if let Some(state) = self.state_fips() {
              out.push(format!("{state}{county:0>3}"));
            }
          } else {
            out.push(pad_geoid(county, level));
          }
        }
      }
      _ => {}
    }

    let name = self.region_name.trim();
    if is_numeric(name) {
      out.push(pad_geoid(name, level));
    }

    let mut seen = HashSet::new();
    out.retain(|g| !g.is_empty() && seen.insert(g.clone()));
    out
  }

  /// A 5-digit numeric identifier carried by a county-level market, used by
  /// the state-prefix fallback.
  pub fn five_digit_identifier(&self) -> Option<String> {
    self
      .candidate_geoids()
      .into_iter()
      .find(|g| g.len() == 5 && is_numeric(g))
  }
}

//! Per-source market rows.
//!
//! Each source publishes regions in its own column layout. Rows are read into
//! the matching [`SourceRecord`] variant and normalised into a [`Market`] at
//! this boundary; nothing downstream knows which source a row came from except
//! through `Market::source` and the external-id bag.

use std::io::Read;

use georesolve_core::{
  geography::NATION_GEOID,
  market::{Market, RegionType},
};
use serde::Deserialize;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{Error, Result, read_rows};

// ─── Source kinds ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SourceKind {
  /// Already in the registry's own column layout.
  Generic,
  Census,
  Fred,
  Zillow,
  Redfin,
}

impl SourceKind {
  pub fn as_str(self) -> &'static str { self.into() }
}

// ─── Row shapes ──────────────────────────────────────────────────────────────

/// `region_id, region_name, region_type, state_code?, county_fips?, geoid?`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketRow {
  pub region_id:   String,
  pub region_name: String,
  pub region_type: String,
  #[serde(default)]
  pub state_code:  Option<String>,
  #[serde(default)]
  pub county_fips: Option<String>,
  #[serde(default)]
  pub geoid:       Option<String>,
  #[serde(default)]
  pub source:      Option<String>,
}

/// A row from a Census-style API extract: a `NAME` column plus one column per
/// geography component.
#[derive(Debug, Clone, Deserialize)]
pub struct CensusRow {
  #[serde(rename = "NAME")]
  pub name:   String,
  #[serde(default)]
  pub us:     Option<String>,
  #[serde(default)]
  pub state:  Option<String>,
  #[serde(default)]
  pub county: Option<String>,
  #[serde(default)]
  pub place:  Option<String>,
  #[serde(
    default,
    rename = "metropolitan statistical area/micropolitan statistical area",
    alias = "cbsa"
  )]
  pub metro:  Option<String>,
  #[serde(default, rename = "zip code tabulation area", alias = "zcta")]
  pub zcta:   Option<String>,
}

/// A series descriptor from a macroeconomic time-series catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct FredRow {
  pub series_id:   String,
  pub region_name: String,
  pub region_type: String,
  /// FIPS or CBSA code of the region, when the catalogue carries one.
  #[serde(default)]
  pub region_code: Option<String>,
  #[serde(default)]
  pub state_code:  Option<String>,
}

/// A row from a market-report download keyed by `RegionID`.
#[derive(Debug, Clone, Deserialize)]
pub struct ZillowRow {
  #[serde(rename = "RegionID")]
  pub region_id:   String,
  #[serde(rename = "RegionName")]
  pub region_name: String,
  #[serde(rename = "RegionType")]
  pub region_type: String,
  #[serde(rename = "State", default)]
  pub state:       Option<String>,
  #[serde(rename = "StateName", default)]
  pub state_name:  Option<String>,
  #[serde(rename = "StateCodeFIPS", default)]
  pub state_fips:  Option<String>,
  #[serde(rename = "MunicipalCodeFIPS", default)]
  pub county_fips: Option<String>,
}

/// A row from a market-report download keyed by region type and table id.
#[derive(Debug, Clone, Deserialize)]
pub struct RedfinRow {
  #[serde(alias = "REGION_TYPE")]
  pub region_type: String,
  #[serde(alias = "REGION")]
  pub region:      String,
  #[serde(default, alias = "STATE_CODE")]
  pub state_code:  Option<String>,
  #[serde(default, alias = "TABLE_ID")]
  pub table_id:    Option<String>,
}

/// One market row in its source's layout.
#[derive(Debug, Clone)]
pub enum SourceRecord {
  Generic(MarketRow),
  Census(CensusRow),
  Fred(FredRow),
  Zillow(ZillowRow),
  Redfin(RedfinRow),
}

// ─── Normalisation ───────────────────────────────────────────────────────────

fn region_type(line: u64, raw: &str) -> Result<RegionType> {
  raw
    .trim()
    .parse()
    .map_err(|_| Error::UnknownRegionType { line, value: raw.to_owned() })
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}

/// Strip Redfin's decorations: `"Zip Code: 90001"`, `"Los Angeles, CA metro area"`.
fn redfin_region_name(raw: &str) -> &str {
  let name = raw.trim();
  let name = name.strip_prefix("Zip Code:").unwrap_or(name);
  let name = name.strip_suffix("metro area").unwrap_or(name);
  name.trim()
}

impl SourceRecord {
  pub fn kind(&self) -> SourceKind {
    match self {
      Self::Generic(_) => SourceKind::Generic,
      Self::Census(_) => SourceKind::Census,
      Self::Fred(_) => SourceKind::Fred,
      Self::Zillow(_) => SourceKind::Zillow,
      Self::Redfin(_) => SourceKind::Redfin,
    }
  }

  /// Normalise into a registry [`Market`]. `line` only feeds diagnostics.
  pub fn into_market(self, line: u64) -> Result<Market> {
    let source = self.kind().as_str();
    match self {
      Self::Generic(r) => {
        let mut m = Market::new(
          r.region_id,
          r.region_name,
          region_type(line, &r.region_type)?,
          non_empty(r.source).unwrap_or_else(|| source.to_owned()),
        );
        m.state_code = non_empty(r.state_code);
        m.county_fips = non_empty(r.county_fips);
        if let Some(geoid) = non_empty(r.geoid) {
          m = m.with_external_id("geoid", geoid);
        }
        Ok(m)
      }

      Self::Census(r) => {
        let state = non_empty(r.state);
        let (kind, geoid) = match (
          non_empty(r.zcta),
          non_empty(r.place),
          non_empty(r.county),
          non_empty(r.metro),
          state.as_deref(),
        ) {
          (Some(zcta), ..) => (RegionType::Zip, zcta),
          (None, Some(place), _, _, Some(st)) => (RegionType::City, format!("{st}{place}")),
          (None, None, Some(county), _, Some(st)) => (RegionType::County, format!("{st}{county}")),
          (None, None, None, Some(metro), _) => (RegionType::Metro, metro),
          (None, None, None, None, Some(st)) => (RegionType::State, st.to_owned()),
          _ if r.us.as_deref().is_some_and(|u| !u.trim().is_empty()) => {
            (RegionType::Country, NATION_GEOID.to_owned())
          }
          _ => return Err(Error::MissingField { line, field: "geography component" }),
        };
        let mut m = Market::new(format!("census:{kind}:{geoid}"), r.name, kind, source)
          .with_external_id("geoid", geoid);
        m.state_code = state;
        Ok(m)
      }

      Self::Fred(r) => {
        let mut m = Market::new(
          format!("fred:{}", r.series_id),
          r.region_name,
          region_type(line, &r.region_type)?,
          source,
        )
        .with_external_id("series_id", r.series_id);
        m.state_code = non_empty(r.state_code);
        if let Some(code) = non_empty(r.region_code) {
          m = m.with_external_id("geoid", code);
        }
        Ok(m)
      }

      Self::Zillow(r) => {
        let mut m = Market::new(
          format!("zillow:{}", r.region_id),
          r.region_name,
          region_type(line, &r.region_type)?,
          source,
        )
        .with_external_id("zillow_region_id", r.region_id);
        m.state_code = non_empty(r.state_fips)
          .or(non_empty(r.state))
          .or(non_empty(r.state_name));
        m.county_fips = non_empty(r.county_fips);
        Ok(m)
      }

      Self::Redfin(r) => {
        let kind = region_type(line, &r.region_type)?;
        let name = redfin_region_name(&r.region).to_owned();
        let table_id = non_empty(r.table_id);
        let key = table_id.clone().unwrap_or_else(|| name.to_lowercase());
        let mut m = Market::new(format!("redfin:{kind}:{key}"), name, kind, source);
        m.state_code = non_empty(r.state_code);
        if let Some(id) = table_id {
          m = m.with_external_id("table_id", id);
        }
        Ok(m)
      }
    }
  }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Read market rows of `kind` from CSV `input`.
pub fn read_markets(kind: SourceKind, input: impl Read) -> Result<Vec<Result<Market>>> {
  match kind {
    SourceKind::Generic => {
      read_rows(input, |line, r: MarketRow| SourceRecord::Generic(r).into_market(line))
    }
    SourceKind::Census => {
      read_rows(input, |line, r: CensusRow| SourceRecord::Census(r).into_market(line))
    }
    SourceKind::Fred => {
      read_rows(input, |line, r: FredRow| SourceRecord::Fred(r).into_market(line))
    }
    SourceKind::Zillow => {
      read_rows(input, |line, r: ZillowRow| SourceRecord::Zillow(r).into_market(line))
    }
    SourceKind::Redfin => {
      read_rows(input, |line, r: RedfinRow| SourceRecord::Redfin(r).into_market(line))
    }
  }
}

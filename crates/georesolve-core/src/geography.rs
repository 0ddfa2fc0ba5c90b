//! Canonical geography: one [`GeographyUnit`] per official region.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{normalize::pad_geoid, shape::Shape};

/// The geoid used for the single nation-level unit.
pub const NATION_GEOID: &str = "US";

/// Official geography levels, coarsest first.
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
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GeoLevel {
  #[strum(to_string = "nation", serialize = "country", serialize = "national")]
  Nation,
  State,
  #[strum(to_string = "metro", serialize = "cbsa", serialize = "msa")]
  Metro,
  County,
  #[strum(to_string = "place", serialize = "city")]
  Place,
  #[strum(to_string = "zip", serialize = "zcta", serialize = "zipcode")]
  Zip,
}

impl GeoLevel {
  /// Fixed digit width of a geoid at this level, if the level uses numeric
  /// identifiers.
  pub fn geoid_width(self) -> Option<usize> {
    match self {
      Self::Nation => None,
      Self::State => Some(2),
      Self::Metro | Self::County | Self::Zip => Some(5),
      Self::Place => Some(7),
    }
  }

  /// Whether geoids at this level begin with the 2-digit state geoid.
  pub fn is_state_prefixed(self) -> bool {
    matches!(self, Self::County | Self::Place)
  }

  /// Granularity rank; larger is finer.
  pub fn rank(self) -> u8 {
    match self {
      Self::Nation => 0,
      Self::State => 1,
      Self::Metro => 2,
      Self::County => 3,
      Self::Place => 4,
      Self::Zip => 5,
    }
  }

  pub fn as_str(self) -> &'static str { self.into() }
}

/// A canonical region from the authoritative reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyUnit {
  pub geoid: String,
  pub level: GeoLevel,
  pub name:  String,
  pub shape: Option<Shape>,
}

impl GeographyUnit {
  /// Build a unit, normalising the geoid to the level's width.
  pub fn new(geoid: &str, level: GeoLevel, name: impl Into<String>) -> Self {
    Self {
      geoid: pad_geoid(geoid, level),
      level,
      name: name.into(),
      shape: None,
    }
  }

  pub fn with_shape(mut self, shape: Shape) -> Self {
    self.shape = Some(shape);
    self
  }

  /// The 2-digit state geoid this unit sits in, for state-prefixed levels.
  pub fn state_geoid(&self) -> Option<&str> {
    match self.level {
      GeoLevel::State => Some(&self.geoid),
      l if l.is_state_prefixed() => self.geoid.get(..2),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn level_parses_aliases() {
    assert_eq!("ZCTA".parse::<GeoLevel>().unwrap(), GeoLevel::Zip);
    assert_eq!("msa".parse::<GeoLevel>().unwrap(), GeoLevel::Metro);
    assert_eq!("country".parse::<GeoLevel>().unwrap(), GeoLevel::Nation);
    assert_eq!(GeoLevel::Metro.to_string(), "metro");
    assert_eq!(GeoLevel::Zip.as_str(), "zip");
    assert!("galaxy".parse::<GeoLevel>().is_err());
  }

  #[test]
  fn new_unit_pads_geoid() {
    let county = GeographyUnit::new("6037", GeoLevel::County, "Los Angeles");
    assert_eq!(county.geoid, "06037");
    assert_eq!(county.state_geoid(), Some("06"));

    let zip = GeographyUnit::new("501", GeoLevel::Zip, "");
    assert_eq!(zip.geoid, "00501");
    assert_eq!(zip.state_geoid(), None);
  }
}

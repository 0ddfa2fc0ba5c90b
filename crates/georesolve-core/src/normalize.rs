//! Identifier and name normalisation shared by the importer and the linkage
//! cascade.

use crate::geography::{GeoLevel, NATION_GEOID};

// ─── Geoids ──────────────────────────────────────────────────────────────────

/// Normalise a raw geoid to the canonical width for `level`.
///
/// Numeric identifiers are left-padded with zeros (spreadsheet exports drop
/// leading zeros, e.g. `6037` for Los Angeles County) and a trailing `.0`
/// from float-typed columns is removed. Non-numeric identifiers are trimmed
/// and otherwise left alone.
pub fn pad_geoid(raw: &str, level: GeoLevel) -> String {
  let trimmed = raw.trim();
  let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);

  if level == GeoLevel::Nation {
    return if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("us") {
      NATION_GEOID.to_owned()
    } else {
      trimmed.to_owned()
    };
  }

  match level.geoid_width() {
    Some(width) if is_numeric(trimmed) && trimmed.len() < width => {
      format!("{trimmed:0>width$}")
    }
    _ => trimmed.to_owned(),
  }
}

pub fn is_numeric(s: &str) -> bool {
  !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

// ─── Names ───────────────────────────────────────────────────────────────────

/// Trailing words that describe the kind of unit rather than naming it.
/// Longer phrases come first so "city and borough" wins over "borough".
const SUFFIXES: &[&str] = &[
  "city and borough",
  "metropolitan statistical area",
  "micropolitan statistical area",
  "metro area",
  "micro area",
  "census area",
  "municipality",
  "municipio",
  "township",
  "borough",
  "parish",
  "county",
  "village",
  "city",
  "town",
  "cdp",
  "msa",
];

/// Abbreviations expanded so "St. Louis" and "Saint Louis" compare equal.
const ABBREVIATIONS: &[(&str, &str)] = &[
  ("st", "saint"),
  ("ste", "sainte"),
  ("ft", "fort"),
  ("mt", "mount"),
];

/// Normalise a region name for comparison.
///
/// Lowercases, drops everything after the first comma (state qualifiers such
/// as `", CA"`), turns `&` into `and`, replaces punctuation with spaces,
/// expands common abbreviations and strips one trailing unit-kind suffix.
pub fn normalize_name(raw: &str) -> String {
  let head = raw.split(',').next().unwrap_or_default();
  let lowered = head.to_lowercase().replace('&', " and ");

  let cleaned: String = lowered
    .chars()
    .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
    .collect();

  let words: Vec<&str> = cleaned
    .split_whitespace()
    .map(|w| {
      ABBREVIATIONS
        .iter()
        .find(|(short, _)| *short == w)
        .map_or(w, |(_, long)| *long)
    })
    .collect();

  let mut joined = words.join(" ");
  for suffix in SUFFIXES {
    if let Some(stripped) = joined.strip_suffix(suffix)
      && stripped.ends_with(' ')
      && !stripped.trim().is_empty()
    {
      joined = stripped.trim_end().to_owned();
      break;
    }
  }
  joined
}

/// The state qualifier after the last comma of a name, e.g. `"CA"` from
/// `"Los Angeles County, CA"`, or each state of a multi-state metro.
pub fn trailing_states(raw: &str) -> Vec<String> {
  match raw.rsplit_once(',') {
    Some((_, tail)) => tail
      .split('-')
      .map(|s| s.trim().to_ascii_uppercase())
      .filter(|s| s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()))
      .collect(),
    None => Vec::new(),
  }
}

/// The principal city of a metro name: the first hyphen-separated segment
/// before the state qualifier, normalised.
/// `"Los Angeles-Long Beach-Anaheim, CA"` gives `"los angeles"`.
pub fn principal_city(raw: &str) -> String {
  let head = raw.split(',').next().unwrap_or_default();
  normalize_name(head.split('-').next().unwrap_or_default())
}

// ─── States ──────────────────────────────────────────────────────────────────

/// `(abbreviation, FIPS, name)` for the states, DC and Puerto Rico.
pub const STATES: &[(&str, &str, &str)] = &[
  ("AL", "01", "Alabama"),
  ("AK", "02", "Alaska"),
  ("AZ", "04", "Arizona"),
  ("AR", "05", "Arkansas"),
  ("CA", "06", "California"),
  ("CO", "08", "Colorado"),
  ("CT", "09", "Connecticut"),
  ("DE", "10", "Delaware"),
  ("DC", "11", "District of Columbia"),
  ("FL", "12", "Florida"),
  ("GA", "13", "Georgia"),
  ("HI", "15", "Hawaii"),
  ("ID", "16", "Idaho"),
  ("IL", "17", "Illinois"),
  ("IN", "18", "Indiana"),
  ("IA", "19", "Iowa"),
  ("KS", "20", "Kansas"),
  ("KY", "21", "Kentucky"),
  ("LA", "22", "Louisiana"),
  ("ME", "23", "Maine"),
  ("MD", "24", "Maryland"),
  ("MA", "25", "Massachusetts"),
  ("MI", "26", "Michigan"),
  ("MN", "27", "Minnesota"),
  ("MS", "28", "Mississippi"),
  ("MO", "29", "Missouri"),
  ("MT", "30", "Montana"),
  ("NE", "31", "Nebraska"),
  ("NV", "32", "Nevada"),
  ("NH", "33", "New Hampshire"),
  ("NJ", "34", "New Jersey"),
  ("NM", "35", "New Mexico"),
  ("NY", "36", "New York"),
  ("NC", "37", "North Carolina"),
  ("ND", "38", "North Dakota"),
  ("OH", "39", "Ohio"),
  ("OK", "40", "Oklahoma"),
  ("OR", "41", "Oregon"),
  ("PA", "42", "Pennsylvania"),
  ("RI", "44", "Rhode Island"),
  ("SC", "45", "South Carolina"),
  ("SD", "46", "South Dakota"),
  ("TN", "47", "Tennessee"),
  ("TX", "48", "Texas"),
  ("UT", "49", "Utah"),
  ("VT", "50", "Vermont"),
  ("VA", "51", "Virginia"),
  ("WA", "53", "Washington"),
  ("WV", "54", "West Virginia"),
  ("WI", "55", "Wisconsin"),
  ("WY", "56", "Wyoming"),
  ("PR", "72", "Puerto Rico"),
];

/// Resolve a state given as abbreviation, FIPS code (with or without the
/// leading zero) or full name to its 2-digit FIPS code.
pub fn state_fips(code: &str) -> Option<&'static str> {
  let code = code.trim();
  if is_numeric(code) {
    let padded = pad_geoid(code, GeoLevel::State);
    return STATES
      .iter()
      .find(|(_, fips, _)| *fips == padded)
      .map(|(_, fips, _)| *fips);
  }
  STATES
    .iter()
    .find(|(abbr, _, name)| {
      abbr.eq_ignore_ascii_case(code) || name.eq_ignore_ascii_case(code)
    })
    .map(|(_, fips, _)| *fips)
}

pub fn state_abbreviation(fips: &str) -> Option<&'static str> {
  STATES
    .iter()
    .find(|(_, f, _)| *f == fips)
    .map(|(abbr, _, _)| *abbr)
}

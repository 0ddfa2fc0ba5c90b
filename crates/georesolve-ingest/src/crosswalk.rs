//! Raw crosswalk rows.
//!
//! Overlap files come from several publishers with their own header names
//! (`ZIP`, `COUNTY`, `RES_RATIO`, ...), so columns are looked up by name
//! through [`CrosswalkColumns`] rather than deserialised into a fixed struct.

use std::io::Read;

use georesolve_core::crosswalk::{OverlapScale, RawCrosswalkRow};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Header names of the columns a crosswalk reader needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrosswalkColumns {
  pub child:  String,
  pub parent: String,
  pub value:  String,
  /// Optional per-row scale column. When absent, or for empty cells, the
  /// reader's default scale applies.
  pub scale:  Option<String>,
}

impl Default for CrosswalkColumns {
  fn default() -> Self {
    Self {
      child:  "child_geoid".into(),
      parent: "parent_geoid".into(),
      value:  "overlap_value".into(),
      scale:  Some("overlap_value_is_percentage".into()),
    }
  }
}

fn column(headers: &csv::StringRecord, name: &str) -> Result<usize> {
  headers
    .iter()
    .position(|h| h.eq_ignore_ascii_case(name))
    .ok_or_else(|| Error::MissingColumn(name.to_owned()))
}

/// Read raw overlap rows from CSV `input`.
///
/// A missing child, parent or value column fails the whole read; a missing
/// scale column just means every row uses `default_scale`.
pub fn read_crosswalk(
  input: impl Read,
  columns: &CrosswalkColumns,
  default_scale: OverlapScale,
) -> Result<Vec<Result<RawCrosswalkRow>>> {
  let mut reader = csv::ReaderBuilder::new()
    .has_headers(true)
    .trim(csv::Trim::All)
    .flexible(true)
    .from_reader(input);
  let headers = reader.headers()?.clone();

  let child = column(&headers, &columns.child)?;
  let parent = column(&headers, &columns.parent)?;
  let value = column(&headers, &columns.value)?;
  let scale = columns
    .scale
    .as_deref()
    .and_then(|name| column(&headers, name).ok());

  let rows = reader
    .records()
    .map(|record| {
      let record = record?;
      let line = record.position().map_or(0, |p| p.line());
      let field = |idx: usize, name: &'static str| {
        record
          .get(idx)
          .filter(|v| !v.is_empty())
          .ok_or(Error::MissingField { line, field: name })
      };

      let raw_value = field(value, "overlap value")?;
      let overlap_value = raw_value.parse::<f64>().map_err(|_| Error::InvalidNumber {
        line,
        column: columns.value.clone(),
        value: raw_value.to_owned(),
      })?;
      let scale = match scale.and_then(|idx| record.get(idx)).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<OverlapScale>()?,
        None => default_scale,
      };

      Ok(RawCrosswalkRow {
        child_geoid: field(child, "child geoid")?.to_owned(),
        parent_geoid: field(parent, "parent geoid")?.to_owned(),
        overlap_value,
        scale,
      })
    })
    .collect();
  Ok(rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_columns_with_per_row_scale() {
    let csv = "child_geoid,parent_geoid,overlap_value,overlap_value_is_percentage\n\
               90001,06037,92,true\n\
               90001,06059,0.08,false\n\
               90002,06037,1.2,auto\n";
    let rows: Vec<_> = read_crosswalk(csv.as_bytes(), &CrosswalkColumns::default(), OverlapScale::Auto)
      .unwrap()
      .into_iter()
      .map(|r| r.unwrap())
      .collect();
    assert_eq!(rows[0].scale, OverlapScale::Percentage);
    assert_eq!(rows[1].scale, OverlapScale::Fraction);
    assert_eq!(rows[2].scale, OverlapScale::Auto);
    assert_eq!(rows[2].overlap_value, 1.2);
  }

  #[test]
  fn custom_columns_without_scale_use_default() {
    let columns = CrosswalkColumns {
      child:  "ZIP".into(),
      parent: "COUNTY".into(),
      value:  "RES_RATIO".into(),
      scale:  None,
    };
    let csv = "ZIP,COUNTY,RES_RATIO,BUS_RATIO\n501,36103,1.0,1.0\n";
    let rows = read_crosswalk(csv.as_bytes(), &columns, OverlapScale::Fraction).unwrap();
    let row = rows[0].as_ref().unwrap();
    assert_eq!(row.child_geoid, "501");
    assert_eq!(row.scale, OverlapScale::Fraction);
  }

  #[test]
  fn missing_required_column_fails_the_read() {
    let csv = "zip,county\n90001,06037\n";
    let err = read_crosswalk(csv.as_bytes(), &CrosswalkColumns::default(), OverlapScale::Auto)
      .unwrap_err();
    assert!(matches!(err, Error::MissingColumn(c) if c == "child_geoid"));
  }

  #[test]
  fn bad_values_are_row_errors() {
    let csv = "child_geoid,parent_geoid,overlap_value\n\
               90001,06037,n/a\n\
               90001,,0.5\n\
               90002,06037,0.5\n";
    let rows = read_crosswalk(csv.as_bytes(), &CrosswalkColumns::default(), OverlapScale::Auto)
      .unwrap();
    assert!(matches!(rows[0], Err(Error::InvalidNumber { line: 2, .. })));
    assert!(matches!(rows[1], Err(Error::MissingField { field: "parent geoid", .. })));
    assert!(rows[2].is_ok());
  }
}

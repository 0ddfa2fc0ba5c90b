//! CSV readers for georesolve.
//!
//! Turns source files into [`georesolve_core`] domain types: market rows per
//! source kind, canonical geography rows, and raw crosswalk rows. Pure
//! synchronous; no database dependencies.
//!
//! Every reader returns one `Result` per data row so a malformed row does not
//! abort the rest of the file. Header problems fail the whole read.

pub mod error;
mod crosswalk;
mod geography;
mod records;

use std::io::Read;

use serde::de::DeserializeOwned;

pub use crosswalk::{CrosswalkColumns, read_crosswalk};
pub use error::{Error, Result};
pub use geography::{UnitRow, read_units};
pub use records::{
  CensusRow, FredRow, MarketRow, RedfinRow, SourceKind, SourceRecord, ZillowRow, read_markets,
};

/// Deserialise every data row of `input` as `T` and hand it, with its 1-based
/// line number, to `convert`.
pub(crate) fn read_rows<T, U>(
  input: impl Read,
  convert: impl Fn(u64, T) -> Result<U>,
) -> Result<Vec<Result<U>>>
where
  T: DeserializeOwned,
{
  let mut reader = csv::ReaderBuilder::new()
    .has_headers(true)
    .trim(csv::Trim::All)
    .flexible(true)
    .from_reader(input);
  let headers = reader.headers()?.clone();

  let rows = reader
    .records()
    .map(|record| {
      let record = record?;
      let line = record.position().map_or(0, |p| p.line());
      let row: T = record.deserialize(Some(&headers))?;
      convert(line, row)
    })
    .collect();
  Ok(rows)
}

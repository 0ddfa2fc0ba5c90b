//! Core types and pure algorithms for the georesolve reconciliation engine.
//!
//! This crate is deliberately free of database and file I/O. The storage
//! backends, the ingestion readers and the pipeline all depend on it.

// Native `async fn` in traits; see `store::GeoStore`.
#![allow(async_fn_in_trait)]

pub mod crosswalk;
pub mod error;
pub mod geography;
pub mod hierarchy;
pub mod linkage;
pub mod market;
pub mod normalize;
pub mod policy;
pub mod shape;
pub mod store;

pub use error::{Error, Result};

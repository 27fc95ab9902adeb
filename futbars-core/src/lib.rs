//! futbars core — domain types, gateway session, checkpoint store, contract files.
//!
//! This crate holds everything the fetch loop touches on either side:
//! - Contracts and minute bars, with broker timestamp formats
//! - The `MarketDataApi` session trait and its REST gateway implementation
//! - The JSON checkpoint store of per-contract resume cursors
//! - Append-only per-contract CSV files and the Parquet export
//! - Run configuration

pub mod config;
pub mod data;
pub mod domain;
pub mod pacing;

pub use config::{ConfigError, FetchConfig};

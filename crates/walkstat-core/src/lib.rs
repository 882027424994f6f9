//! walkstat-core — walk-and-aggregate engine of the walkstat exporter.
//!
//! Provides:
//! - `walker` — the `Backend` trait, the shared aggregation pipeline and the
//!   filesystem / object-store backends
//! - `source` — storage access traits with real and in-memory implementations
//! - `prefix` — path to aggregation-key derivation
//! - `filter` — regex exclusion lists
//! - `histogram` — geometric size buckets
//! - `stats` — per-walk aggregates
//! - `metrics` — double-buffered Prometheus publication
//! - `config` — configuration structs and `ConfigError`
//! - `fmt` — byte and duration formatting

pub mod config;
pub mod filter;
pub mod fmt;
pub mod histogram;
pub mod metrics;
pub mod prefix;
pub mod source;
pub mod stats;
pub mod walker;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

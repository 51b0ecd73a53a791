//! # fdm-store
//!
//! Crash-safe persistence for optimization runs: a Parquet history archive
//! and a JSON optimizer blob per run, plus the static baseline catalog used
//! for warm starts.

pub mod archive;
pub mod catalog;
pub mod checkpoint;

pub use archive::*;
pub use catalog::*;
pub use checkpoint::*;

//! Structured logging setup for Picscribe.
//!
//! Console output (plain or JSON) plus optional daily-rotated NDJSON files.

pub mod logger;

pub use logger::{init_logger, LogGuard};

//! Background services
//!
//! Runs as a tokio task that replots the configured queries on a fixed
//! interval until shutdown.

pub mod periodic;

pub use periodic::{load_queries, CycleReport, PeriodicGrapher, QueriesFileError, MIDNIGHT_DELAY};

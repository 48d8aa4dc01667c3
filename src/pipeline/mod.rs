//! Per-job streaming pipeline
//!
//! ```text
//! DataSource ─records─▶ Decompressor ─samples─▶ Packager ─bins─▶ Processor+Averager
//!            └────────────samples──────────────┘
//! ```
//!
//! Stages are connected by bounded channels carrying [`StreamItem`]s. A
//! channel that closes without [`StreamItem::End`] means its producer failed.

pub mod coordinator;
mod decompressor;
mod packager;

pub use coordinator::{run_job, run_query, JobOptions, JobOutcome};
pub use decompressor::{count_samples, Decompressor, DecompressorStats, Flow};
pub use packager::Packager;

use thiserror::Error;

use crate::acquisition::SourceError;
use crate::output::OutputError;
use crate::types::QueryError;

/// One unit on an inter-stage channel.
#[derive(Debug)]
pub enum StreamItem<T> {
    Data(T),
    End,
}

/// The single failure surfaced for a job. `Display` is the user-facing
/// reason.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("{0} server is not configured")]
    NotConfigured(&'static str),

    #[error("{0}")]
    NoData(String),

    #[error("Failed to connect to server")]
    Connect(#[source] SourceError),

    #[error("Server returned no data")]
    ServerNoData,

    #[error("The query has no data to be processed")]
    NothingToProcess,

    #[error("Failed to make output folder for query results")]
    OutputFolder(#[source] OutputError),

    #[error("Failed to write query results to disk")]
    WriteFailed(#[source] OutputError),

    #[error("Failed to make graph")]
    Graph(#[source] OutputError),

    #[error("Query was cancelled")]
    Cancelled,

    #[error("Query timed out")]
    TimedOut,

    #[error("{0} stage aborted")]
    StageAborted(&'static str),
}

impl JobError {
    /// Classify a failure to open the data source.
    pub fn from_open(error: SourceError) -> Self {
        match error {
            SourceError::NoData(reason) => Self::NoData(reason),
            SourceError::NotConfigured(source) => Self::NotConfigured(source),
            other => Self::Connect(other),
        }
    }
}

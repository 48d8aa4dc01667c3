//! Result serialization, file output and graph rendering
//!
//! - `formatter`: the four text artifacts of a job
//! - `writer`: output directory and file writes
//! - `plotter`: gnuplot invocation

mod formatter;
mod plotter;
mod writer;

pub use formatter::{format_series, format_timestamp, format_value, Artifacts};
pub use plotter::{GraphFiles, Plotter};
pub use writer::{ensure_dir, write_artifacts, write_file, WrittenFiles};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("query has no stream metadata")]
    MissingMetadata,

    #[error("failed to create {}: {}", .0.display(), .1)]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("failed to write {}: {}", .0.display(), .1)]
    Write(PathBuf, #[source] std::io::Error),

    #[error("refusing to write empty file {}", .0.display())]
    EmptyContent(PathBuf),

    #[error("failed to run gnuplot: {0}")]
    PlotSpawn(#[source] std::io::Error),

    #[error("gnuplot exited with {status}: {stderr}")]
    PlotFailed { status: String, stderr: String },
}

//! RSAM-SSAM: seismic amplitude and spectral products
//!
//! Streams waveform data from an FDSN, SeedLink or Winston server (or local
//! miniSEED files) and turns it into per-interval RSAM values, SSAM spectra
//! and dominant-frequency series, written as text tables and rendered with
//! gnuplot.
//!
//! ## Architecture
//!
//! - **Acquisition**: protocol clients behind the [`acquisition::DataSource`] trait
//! - **miniSEED**: record framing and libmseed decoding
//! - **Pipeline**: Decompressor, Packager and Processor stages over bounded channels
//! - **Processing**: median removal, windowing, FFT, dB spectra and averaging
//! - **Output**: formatter, writer and plotter
//! - **Background**: periodic replotting of a configured query list
//! - **API**: Axum routes for web queries

pub mod acquisition;
pub mod api;
pub mod background;
pub mod config;
pub mod mseed;
pub mod output;
pub mod pipeline;
pub mod processing;
pub mod types;

// Re-export service configuration
pub use config::ServiceConfig;

// Re-export commonly used types
pub use types::{
    AveragedSeries, BinResult, GraphFormat, MaxFreq, Metadata, Query, QueryError, QueryRequest,
    QueryType, WindowFunction,
};

// Re-export the job entry points
pub use pipeline::{run_job, run_query, JobError, JobOptions, JobOutcome};

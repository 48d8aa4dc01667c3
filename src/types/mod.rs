//! Shared data structures for the RSAM / SSAM pipeline
//!
//! - `Query`: channel, time range and DSP parameters of one job
//! - `Metadata`: sample rate and first-sample time reported by a source
//! - `BinResult`: RSAM value, spectrum and dominant frequency per bin

mod query;
mod result;

pub use query::*;
pub use result::*;

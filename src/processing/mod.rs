//! Signal processing: window functions, per-bin RSAM/FFT and averaging

mod averager;
mod processor;
pub mod window;

pub use averager::{remap_average_ssam, Averager};
pub use processor::{Processor, ProcessorParams};

use thiserror::Error;

/// Errors in signal processing
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Bin length mismatch: expected {expected}, got {got}")]
    BinLength { expected: usize, got: usize },

    #[error("Spectrum length mismatch: expected {expected}, got {got}")]
    SpectrumLength { expected: usize, got: usize },

    #[error("Invalid processing parameters: {0}")]
    InvalidParameters(String),
}

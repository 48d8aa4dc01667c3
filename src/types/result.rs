//! Per-bin and averaged DSP results.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Frequency with the greatest power in an averaged spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaxFreq {
    pub frequency_hz: f64,
    pub power: f64,
}

impl MaxFreq {
    /// Placeholder row for padded single-day results.
    pub const GAP: Self = Self {
        frequency_hz: f64::NAN,
        power: f64::NAN,
    };
}

/// Output of the Processor for one bin, or of the Averager for one row.
///
/// A NaN `rsam` marks a gap. Gap spectra from the Processor share one
/// all-ones array, so the spectrum is held behind an `Arc`.
#[derive(Debug, Clone)]
pub struct BinResult {
    pub rsam: f64,
    pub spectrum: Arc<[f64]>,
    pub max_freq: Option<MaxFreq>,
}

impl BinResult {
    pub fn new(rsam: f64, spectrum: impl Into<Arc<[f64]>>) -> Self {
        Self {
            rsam,
            spectrum: spectrum.into(),
            max_freq: None,
        }
    }

    pub fn is_gap(&self) -> bool {
        self.rsam.is_nan()
    }
}

/// Everything the Formatter needs from a finished averaging run.
#[derive(Debug, Clone)]
pub struct AveragedSeries {
    pub rows: Vec<BinResult>,
    /// Remapped grand average spectrum, `50^(x / max)` per entry.
    pub average_ssam: Vec<f64>,
}

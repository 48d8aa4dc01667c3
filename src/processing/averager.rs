//! Collapses consecutive bin results into output rows and accumulates the
//! grand average spectrum.
//!
//! Single-day queries (`factor == 1`) always produce exactly one day of rows:
//! missing bins at the end are padded with gap rows, extra bins are dropped.

use std::sync::Arc;
use tracing::{info, warn};

use super::ProcessingError;
use crate::config::defaults::AVERAGE_SSAM_REMAP_BASE;
use crate::types::{AveragedSeries, BinResult, MaxFreq, Query};

const SECONDS_PER_DAY: f64 = 86_400.0;

pub struct Averager {
    factor: usize,
    cutoff_window: usize,
    frequency_resolution: f64,
    results_per_day: Option<usize>,
    group: Vec<BinResult>,
    rows: Vec<BinResult>,
    accumulator: Vec<f64>,
    dropped: usize,
    zeros: Arc<[f64]>,
}

impl Averager {
    pub fn new(factor: usize, cutoff_window: usize, sps: u32, window_size: usize) -> Self {
        let factor = factor.max(1);
        let results_per_day = (factor == 1)
            .then(|| (SECONDS_PER_DAY * f64::from(sps) / window_size as f64).ceil() as usize);
        Self {
            factor,
            cutoff_window,
            frequency_resolution: f64::from(sps) / window_size as f64,
            results_per_day,
            group: Vec::with_capacity(factor),
            rows: Vec::new(),
            accumulator: vec![0.0; cutoff_window],
            dropped: 0,
            zeros: vec![0.0; cutoff_window].into(),
        }
    }

    pub fn for_query(query: &Query) -> Result<Self, ProcessingError> {
        let metadata = query
            .metadata()
            .ok_or_else(|| ProcessingError::InvalidParameters("query has no metadata".into()))?;
        let cutoff_window = query
            .cutoff_window()
            .ok_or_else(|| ProcessingError::InvalidParameters("query has no metadata".into()))?;
        Ok(Self::new(
            query.averaging_factor(),
            cutoff_window,
            metadata.sps,
            query.window_size,
        ))
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Rows a single-day query is padded or truncated to.
    pub fn results_per_day(&self) -> Option<usize> {
        self.results_per_day
    }

    pub fn rows_emitted(&self) -> usize {
        self.rows.len()
    }

    pub fn push(&mut self, result: BinResult) -> Result<(), ProcessingError> {
        if result.spectrum.len() != self.cutoff_window {
            return Err(ProcessingError::SpectrumLength {
                expected: self.cutoff_window,
                got: result.spectrum.len(),
            });
        }

        if let Some(limit) = self.results_per_day {
            if self.rows.len() >= limit {
                self.dropped += 1;
                return Ok(());
            }
        }

        self.group.push(result);
        if self.group.len() >= self.factor {
            self.average_group();
        }
        Ok(())
    }

    fn average_group(&mut self) {
        let k = self.factor as f64;
        let mut rsam_sum = 0.0;
        let mut valid = 0usize;
        let mut spectrum = vec![0.0; self.cutoff_window];

        for result in self.group.drain(..) {
            if !result.rsam.is_nan() {
                rsam_sum += result.rsam;
                valid += 1;
            }
            for (acc, v) in spectrum.iter_mut().zip(result.spectrum.iter()) {
                *acc += v;
            }
        }

        // a group made only of gaps stays a gap
        let rsam = if valid == 0 { f64::NAN } else { rsam_sum / k };

        let mut max_freq = MaxFreq {
            frequency_hz: 0.0,
            power: 0.0,
        };
        for (i, v) in spectrum.iter_mut().enumerate() {
            *v /= k;
            self.accumulator[i] += *v;
            if *v > max_freq.power {
                max_freq = MaxFreq {
                    frequency_hz: i as f64 * self.frequency_resolution,
                    power: *v,
                };
            }
        }

        self.rows.push(BinResult {
            rsam,
            spectrum: spectrum.into(),
            max_freq: Some(max_freq),
        });
    }

    fn gap_result(&self) -> BinResult {
        BinResult::new(f64::NAN, Arc::clone(&self.zeros))
    }

    /// Flush the trailing group, pad a single day and finalise the average
    /// spectrum.
    pub fn complete(mut self) -> AveragedSeries {
        if self.factor > 1 && !self.group.is_empty() {
            let pad = self.factor - self.group.len();
            info!(pad, "Padding last averaging group");
            for _ in 0..pad {
                let gap = self.gap_result();
                self.group.push(gap);
            }
            self.average_group();
        }

        if let Some(limit) = self.results_per_day {
            if self.dropped > 0 {
                warn!(dropped = self.dropped, limit, "Dropped results beyond one day");
            }
            let pad = limit.saturating_sub(self.rows.len());
            if pad > 0 {
                info!(pad, "Padding results to complete the day");
            }
            for _ in 0..pad {
                let mut gap = self.gap_result();
                gap.max_freq = Some(MaxFreq::GAP);
                self.rows.push(gap);
            }
        }

        AveragedSeries {
            average_ssam: remap_average_ssam(&self.accumulator),
            rows: self.rows,
        }
    }
}

/// Contrast remap of the accumulated spectrum: `50^(x / max)`.
pub fn remap_average_ssam(accumulator: &[f64]) -> Vec<f64> {
    let Some(&first) = accumulator.first() else {
        return Vec::new();
    };
    let max = accumulator.iter().copied().fold(first, f64::max);
    accumulator
        .iter()
        .map(|x| AVERAGE_SSAM_REMAP_BASE.powf(x / max))
        .collect()
}

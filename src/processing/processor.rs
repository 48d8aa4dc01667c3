//! Per-bin DSP: median removal, gap detection, windowing, RSAM and
//! the dB magnitude spectrum up to the cutoff bin.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::warn;

use super::{window, ProcessingError};
use crate::types::{BinResult, Query};

/// Fixed parameters of a [`Processor`].
#[derive(Debug, Clone)]
pub struct ProcessorParams {
    pub window_size: usize,
    pub window_function: crate::types::WindowFunction,
    pub cutoff_window: usize,
    pub response_factor: f64,
    pub zero_tolerance: usize,
}

impl ProcessorParams {
    /// Parameters for a query whose metadata is already known.
    pub fn for_query(query: &Query, zero_tolerance: usize) -> Result<Self, ProcessingError> {
        let cutoff_window = query
            .cutoff_window()
            .ok_or_else(|| ProcessingError::InvalidParameters("query has no metadata".into()))?;
        Ok(Self {
            window_size: query.window_size,
            window_function: query.window_function,
            cutoff_window,
            response_factor: query.response_factor,
            zero_tolerance,
        })
    }
}

pub struct Processor {
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    params: ProcessorParams,
    /// Spectrum returned for every gap bin.
    unit: Arc<[f64]>,
    sorted: Vec<f64>,
    buffer: Vec<Complex<f64>>,
}

impl Processor {
    pub fn new(params: ProcessorParams) -> Result<Self, ProcessingError> {
        if params.window_size == 0 {
            return Err(ProcessingError::InvalidParameters("window size is zero".into()));
        }
        if params.cutoff_window > params.window_size {
            return Err(ProcessingError::InvalidParameters(format!(
                "cutoff window {} exceeds window size {}",
                params.cutoff_window, params.window_size
            )));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(params.window_size);

        Ok(Self {
            fft,
            window: window::coefficients(params.window_function, params.window_size),
            unit: vec![1.0; params.cutoff_window].into(),
            sorted: Vec::with_capacity(params.window_size),
            buffer: Vec::with_capacity(params.window_size),
            params,
        })
    }

    pub fn cutoff_window(&self) -> usize {
        self.params.cutoff_window
    }

    /// The shared all-ones gap spectrum.
    pub fn unit_spectrum(&self) -> Arc<[f64]> {
        Arc::clone(&self.unit)
    }

    /// Process one bin in place.
    pub fn process(&mut self, bin: &mut [f64]) -> Result<BinResult, ProcessingError> {
        if bin.len() != self.params.window_size {
            return Err(ProcessingError::BinLength {
                expected: self.params.window_size,
                got: bin.len(),
            });
        }

        self.remove_median(bin);

        if !self.apply_window(bin) {
            return Ok(BinResult::new(f64::NAN, Arc::clone(&self.unit)));
        }

        let rsam = bin.iter().map(|x| x.abs()).sum::<f64>() / bin.len() as f64;
        let spectrum = self.spectrum(bin);
        Ok(BinResult::new(rsam, spectrum))
    }

    fn remove_median(&mut self, bin: &mut [f64]) {
        self.sorted.clear();
        self.sorted.extend_from_slice(bin);
        self.sorted.sort_unstable_by(f64::total_cmp);
        let median = self.sorted[self.sorted.len() / 2];
        for x in bin.iter_mut() {
            *x -= median;
        }
    }

    /// Returns false when a zero run reaches the tolerance.
    fn apply_window(&self, bin: &mut [f64]) -> bool {
        let mut zeros = 0;
        for (x, w) in bin.iter_mut().zip(&self.window) {
            if *x == 0.0 {
                zeros += 1;
            } else {
                zeros = 0;
            }
            if zeros >= self.params.zero_tolerance {
                return false;
            }
            *x *= w * self.params.response_factor;
        }
        true
    }

    fn spectrum(&mut self, bin: &[f64]) -> Vec<f64> {
        self.buffer.clear();
        self.buffer.extend(bin.iter().map(|&x| Complex::new(x, 0.0)));
        self.fft.process(&mut self.buffer);

        let spectrum: Vec<f64> = self.buffer[..self.params.cutoff_window]
            .iter()
            .map(|c| 20.0 * c.norm().log10())
            .collect();

        let infinite = spectrum.iter().filter(|v| v.is_infinite()).count();
        if infinite > 0 {
            warn!(infinite, "Spectrum contains infinite magnitudes");
        }
        spectrum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WindowFunction;

    fn processor(size: usize, cutoff: usize, function: WindowFunction) -> Processor {
        Processor::new(ProcessorParams {
            window_size: size,
            window_function: function,
            cutoff_window: cutoff,
            response_factor: 1.0,
            zero_tolerance: 10,
        })
        .unwrap()
    }

    fn alternating(n: usize) -> Vec<f64> {
        (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect()
    }

    #[test]
    fn test_spectrum_length_is_cutoff_window() {
        let mut p = processor(64, 20, WindowFunction::Hann);
        let mut bin: Vec<f64> = (0..64).map(|i| (f64::from(i) * 0.3).sin() * 100.0).collect();
        let r = p.process(&mut bin).unwrap();
        assert_eq!(r.spectrum.len(), 20);
        assert!(!r.is_gap());
    }

    #[test]
    fn test_rsam_of_alternating_signal() {
        let mut p = processor(32, 8, WindowFunction::Uniform);
        let mut bin = alternating(32);
        let r = p.process(&mut bin).unwrap();
        assert!((r.rsam - 1.0).abs() < 1e-12);
        assert_eq!(r.spectrum.len(), 8);
    }

    #[test]
    fn test_zero_run_marks_gap() {
        let mut p = processor(32, 8, WindowFunction::Uniform);
        let mut bin = alternating(32);
        for x in &mut bin[5..15] {
            *x = 0.0;
        }
        let r = p.process(&mut bin).unwrap();
        assert!(r.rsam.is_nan());
        assert!(r.max_freq.is_none());
        assert_eq!(r.spectrum.len(), 8);
        assert!(r.spectrum.iter().all(|v| *v == 1.0));
        assert!(Arc::ptr_eq(&r.spectrum, &p.unit_spectrum()));
    }

    #[test]
    fn test_nine_zeros_are_tolerated() {
        let mut p = processor(32, 8, WindowFunction::Uniform);
        let mut bin = alternating(32);
        for x in &mut bin[5..14] {
            *x = 0.0;
        }
        assert!(!p.process(&mut bin).unwrap().is_gap());
    }

    #[test]
    fn test_median_removal_is_idempotent_on_centered_bin() {
        let mut p = processor(8, 2, WindowFunction::Uniform);
        let mut bin = vec![-3.0, 2.0, 0.0, -1.0, 5.0, 1.0, -2.0, 4.0];
        // sorted: -3 -2 -1 0 1 2 4 5, sorted[4] = 1 -> shift once
        p.remove_median(&mut bin);
        let once = bin.clone();
        p.remove_median(&mut bin);
        for (a, b) in once.iter().zip(&bin) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pure_tone_peaks_at_its_bin() {
        let n = 256;
        let mut p = processor(n, 64, WindowFunction::Hann);
        let mut bin: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * 10.0 * i as f64 / n as f64).sin() * 1000.0)
            .collect();
        let r = p.process(&mut bin).unwrap();
        let peak = r
            .spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 10);
    }

    #[test]
    fn test_wrong_bin_length_is_rejected() {
        let mut p = processor(32, 8, WindowFunction::Uniform);
        let mut bin = vec![1.0; 31];
        assert!(matches!(
            p.process(&mut bin),
            Err(ProcessingError::BinLength { expected: 32, got: 31 })
        ));
    }
}

//! Window function coefficients.

use crate::types::WindowFunction;

/// Coefficients of `function` for a bin of `size` samples.
pub fn coefficients(function: WindowFunction, size: usize) -> Vec<f64> {
    match function {
        WindowFunction::Uniform => vec![1.0; size],
        WindowFunction::Hann if size > 1 => {
            let denom = (size - 1) as f64;
            (0..size)
                .map(|i| (1.0 - (2.0 * std::f64::consts::PI * i as f64 / denom).cos()) / 2.0)
                .collect()
        }
        WindowFunction::Hann => vec![1.0; size],
    }
}

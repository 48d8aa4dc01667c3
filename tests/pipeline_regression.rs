//! Pipeline Regression Tests
//!
//! Drives the Decompressor, Packager, Processor, Averager and Formatter
//! through their public API with hand-built records and bins, and checks the
//! row counts and values a complete job depends on.

use chrono::{TimeZone, Utc};
use rsam_ssam::mseed::{DataRecord, RecordBuilder};
use rsam_ssam::output::format_series;
use rsam_ssam::pipeline::{count_samples, Decompressor, Flow, Packager};
use rsam_ssam::processing::{remap_average_ssam, Averager, Processor, ProcessorParams};
use rsam_ssam::types::{BinResult, Metadata, Query, WindowFunction};

fn query(from_ms: i64, to_ms: i64) -> Query {
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
    Query::new("NZ", "WIZ", "HHZ", "10", now).with_range(from_ms, to_ms)
}

fn record(start_ms: i64, samples: &[f64]) -> DataRecord {
    let bytes = RecordBuilder::new("NZ", "WIZ", "10", "HHZ")
        .sample_rate(100)
        .build(start_ms * 1_000, samples)
        .unwrap();
    DataRecord::parse(&bytes).unwrap()
}

fn alternating(n: usize) -> Vec<f64> {
    (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect()
}

fn processor(window_size: usize, cutoff_window: usize) -> Processor {
    Processor::new(ProcessorParams {
        window_size,
        window_function: WindowFunction::Uniform,
        cutoff_window,
        response_factor: 1.0,
        zero_tolerance: 10,
    })
    .unwrap()
}

// ============================================================================
// Decompressor
// ============================================================================

#[test]
fn gap_between_records_is_zero_filled() {
    let first: Vec<f64> = (1..=100).map(f64::from).collect();
    let second: Vec<f64> = (201..=300).map(f64::from).collect();
    let q = query(0, 3_000);
    let mut d = Decompressor::new(&q);

    let mut out = Vec::new();
    assert_eq!(d.push(&record(0, &first), &mut out), Flow::Continue);
    d.push(&record(2_000, &second), &mut out);

    assert_eq!(out.len(), 300);
    assert_eq!(out.len() as i64, count_samples(0, 3_000_000, 100.0));
    assert_eq!(&out[..100], first.as_slice());
    assert!(out[100..200].iter().all(|v| *v == 0.0));
    assert_eq!(&out[200..], second.as_slice());
    assert_eq!(d.stats().padded_zeros, 100);
}

#[test]
fn output_length_matches_range_with_internal_gaps() {
    let q = query(0, 10_000);
    let mut d = Decompressor::new(&q);
    let block: Vec<f64> = (0..100).map(f64::from).collect();

    let mut out = Vec::new();
    for start in [0, 1_000, 3_500, 4_500, 7_000, 9_000, 10_000] {
        if d.push(&record(start, &block), &mut out) == Flow::Stop {
            break;
        }
    }
    assert_eq!(out.len() as i64, count_samples(0, 10_000_000, 100.0));
    assert!(d.is_finished());
}

// ============================================================================
// Packager
// ============================================================================

#[test]
fn packager_preserves_order_and_values() {
    let samples: Vec<f64> = (0..1_000).map(|i| f64::from(i) * 0.5).collect();
    let mut p = Packager::new(64);
    let mut bins = Vec::new();
    for chunk in samples.chunks(37) {
        p.extend(chunk, &mut bins);
    }
    bins.extend(p.finish());

    assert_eq!(bins.len(), 1_000usize.div_ceil(64));
    assert!(bins.iter().all(|b| b.len() == 64));
    let flat: Vec<f64> = bins.concat();
    assert_eq!(&flat[..1_000], samples.as_slice());
    assert!(flat[1_000..].iter().all(|v| *v == 0.0));
}

#[test]
fn exact_multiple_of_window_has_no_pad() {
    let mut p = Packager::new(16);
    let mut bins = Vec::new();
    p.extend(&vec![3.0; 16 * 5], &mut bins);
    assert_eq!(bins.len(), 5);
    assert!(p.finish().is_none());
}

// ============================================================================
// Processor
// ============================================================================

#[test]
fn ten_zero_run_is_a_gap() {
    let mut p = processor(32, 8);
    let mut bin = alternating(32);
    bin[11..21].fill(0.0);
    let r = p.process(&mut bin).unwrap();
    assert!(r.rsam.is_nan());
    assert!(r.max_freq.is_none());
    assert_eq!(r.spectrum.len(), 8);
    assert!(r.spectrum.iter().all(|v| *v == 1.0));
}

#[test]
fn alternating_unit_signal_has_rsam_one() {
    let mut p = processor(32, 16);
    let mut bin = alternating(32);
    let r = p.process(&mut bin).unwrap();
    assert!((r.rsam - 1.0).abs() < 1e-12);
    assert_eq!(r.spectrum.len(), 16);
}

// ============================================================================
// Averager and Formatter
// ============================================================================

#[test]
fn single_day_at_100_sps_has_2110_rows() {
    let mut q = query(0, 86_400_000).with_window(4096, WindowFunction::Hann);
    q.set_metadata(Metadata::new(100, 0));
    let cutoff_window = q.cutoff_window().unwrap();

    let mut averager = Averager::for_query(&q).unwrap();
    assert_eq!(averager.results_per_day(), Some(2110));
    for _ in 0..10 {
        averager
            .push(BinResult::new(1.0, vec![5.0; cutoff_window]))
            .unwrap();
    }
    let series = averager.complete();
    let artifacts = format_series(&q, &series).unwrap();

    assert_eq!(artifacts.rsam.lines().count(), 2110);
    assert_eq!(artifacts.max_freqs.lines().count(), 2110);
    assert_eq!(artifacts.average_ssam.lines().count(), cutoff_window);
    let last = artifacts.rsam.lines().last().unwrap();
    assert!(last.ends_with(",NaN"), "{last}");
}

#[test]
fn two_day_constant_spectrum_peaks_at_4_hz() {
    let mut q = query(0, 2 * 86_400_000)
        .with_window(16, WindowFunction::Uniform)
        .with_cutoff(8);
    q.set_metadata(Metadata::new(16, 0));
    assert_eq!(q.averaging_factor(), 2);
    assert_eq!(q.cutoff_window(), Some(8));

    let full = [2.0, 1.0, 2.0, 0.0, 4.0, 2.0, 2.0, 0.0, 18.0, 1.0, 2.0, 0.0, 12.0, 1.0, 2.0, 3.0];
    let truncated = &full[..8];

    let mut averager = Averager::for_query(&q).unwrap();
    for _ in 0..6 {
        averager.push(BinResult::new(1.0, truncated.to_vec())).unwrap();
    }
    let series = averager.complete();

    assert_eq!(series.rows.len(), 3);
    for row in &series.rows {
        assert_eq!(&*row.spectrum, truncated);
        let max = row.max_freq.unwrap();
        assert_eq!(max.frequency_hz, 4.0);
        assert_eq!(max.power, 4.0);
    }

    let artifacts = format_series(&q, &series).unwrap();
    // 2 × 16 / 16 sps = one row every 2 s
    let second_row = artifacts.rsam.lines().nth(1).unwrap();
    assert!(second_row.starts_with("1970-01-01 00:00:02.0,"), "{second_row}");
}

#[test]
fn average_ssam_remap_is_exponential_in_relative_power() {
    let accumulator = [3.0, 12.0, 0.5, 7.25, 12.0, 0.0];
    let max = 12.0;
    let remapped = remap_average_ssam(&accumulator);
    assert_eq!(remapped.len(), accumulator.len());
    for (x, y) in accumulator.iter().zip(&remapped) {
        assert!((y - 50f64.powf(x / max)).abs() < 1e-12);
    }
    assert!((remapped[1] - 50.0).abs() < 1e-12);
    assert!((remapped[5] - 1.0).abs() < 1e-12);
}

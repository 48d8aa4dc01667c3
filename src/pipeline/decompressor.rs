//! Turns an ordered stream of miniSEED records into a continuous sample
//! stream covering `[from, to)`.
//!
//! Gaps between records become zeros, retransmitted records are discarded
//! and the first and last records are trimmed to the query bounds.

use tracing::{debug, info, warn};

use crate::mseed::DataRecord;
use crate::types::Query;

/// Whether the Decompressor wants more records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The query end has been reached; later records are not needed.
    Stop,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecompressorStats {
    pub records: usize,
    pub dropped_before_from: usize,
    pub discarded_overlaps: usize,
    pub decode_failures: usize,
    pub padded_zeros: usize,
    pub samples: usize,
}

/// Samples between `from` (inclusive) and `until` (exclusive):
/// `floor(ms / (1000 / sps))`.
pub fn count_samples(from_micros: i64, until_micros: i64, sps: f64) -> i64 {
    let millis = (until_micros - from_micros) / 1_000;
    let count = (millis as f64 / (1000.0 / sps)).floor();
    if count > f64::from(i32::MAX) {
        warn!(count, "Sample count exceeds 32-bit range");
    }
    count as i64
}

pub struct Decompressor {
    from_micros: i64,
    to_micros: i64,
    sps: f64,
    tolerance_micros: i64,
    next_start: Option<i64>,
    finished: bool,
    stats: DecompressorStats,
    query_id: String,
}

impl Decompressor {
    pub fn new(query: &Query) -> Self {
        Self {
            from_micros: query.from_ms * 1_000,
            to_micros: query.to_ms * 1_000,
            sps: 0.0,
            tolerance_micros: 0,
            next_start: None,
            finished: false,
            stats: DecompressorStats::default(),
            query_id: query.id(),
        }
    }

    pub fn stats(&self) -> DecompressorStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Append the samples `record` contributes to `out`.
    pub fn push(&mut self, record: &DataRecord, out: &mut Vec<f64>) -> Flow {
        if self.finished {
            return Flow::Stop;
        }
        self.stats.records += 1;

        let start = record.start_micros();
        if record.last_sample_micros() < self.from_micros {
            self.stats.dropped_before_from += 1;
            return Flow::Continue;
        }
        if start >= self.to_micros {
            debug!(query = %self.query_id, start, "Record begins after query end");
            self.finished = true;
            return Flow::Stop;
        }

        let mut skip = 0usize;
        match self.next_start {
            None => {
                self.sps = record.sample_rate();
                self.tolerance_micros = (1_000_000.0 / self.sps).round() as i64;
                if start < self.from_micros {
                    skip = usize::try_from(count_samples(start, self.from_micros, self.sps))
                        .unwrap_or(0);
                } else if start > self.from_micros {
                    let pad = count_samples(self.from_micros, start, self.sps);
                    info!(query = %self.query_id, pad, "Padding before first record");
                    self.pad(pad, out);
                }
            }
            Some(predicted) if start > predicted => {
                let pad = count_samples(predicted, start, self.sps);
                debug!(query = %self.query_id, pad, "Filling gap");
                self.pad(pad, out);
            }
            Some(predicted) if predicted - start > self.tolerance_micros => {
                // retransmission of data already emitted
                self.stats.discarded_overlaps += 1;
                return Flow::Continue;
            }
            Some(_) => {}
        }

        let samples = self.decode(record);
        let straddles_end = record.last_sample_micros() >= self.to_micros;
        let keep = if straddles_end {
            usize::try_from(count_samples(start, self.to_micros, self.sps))
                .unwrap_or(0)
                .min(samples.len())
        } else {
            samples.len()
        };
        if skip < keep {
            out.extend_from_slice(&samples[skip..keep]);
            self.stats.samples += keep - skip;
        }
        self.next_start = Some(record.predicted_next_start_micros());

        if straddles_end {
            self.finished = true;
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn pad(&mut self, count: i64, out: &mut Vec<f64>) {
        let count = usize::try_from(count).unwrap_or(0);
        out.resize(out.len() + count, 0.0);
        self.stats.padded_zeros += count;
        self.stats.samples += count;
    }

    fn decode(&mut self, record: &DataRecord) -> Vec<f64> {
        match record.decode() {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(
                    query = %self.query_id,
                    sequence = record.header().sequence,
                    error = %e,
                    "Decompression failure, substituting zeros"
                );
                vec![0.0; record.num_samples()]
            }
        }
    }
}

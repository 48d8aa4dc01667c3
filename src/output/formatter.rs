//! Text serialization of an averaged series.
//!
//! - rsam: `timestamp,value` per row
//! - ssam: one line per frequency bin, one column per row
//! - average_ssam: one value per line
//! - max_freqs: `timestamp,frequency,power` per row
//!
//! Timestamps read `yyyy-MM-dd HH:mm:ss.f` in UTC, the fraction trimmed of
//! trailing zeros.

use std::fmt::Write;

use super::OutputError;
use crate::types::{format_ms, AveragedSeries, MaxFreq, Query};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub rsam: String,
    pub ssam: String,
    pub average_ssam: String,
    pub max_freqs: String,
}

pub fn format_series(query: &Query, series: &AveragedSeries) -> Result<Artifacts, OutputError> {
    let metadata = query.metadata().ok_or(OutputError::MissingMetadata)?;
    let timestep = query.timestep_ms().ok_or(OutputError::MissingMetadata)?;

    let mut out = Artifacts::default();
    for (i, row) in series.rows.iter().enumerate() {
        let ts = format_timestamp(metadata.start_ms + i as i64 * timestep);
        let _ = writeln!(out.rsam, "{ts},{}", format_value(row.rsam));
        let max = row.max_freq.unwrap_or(MaxFreq::GAP);
        let _ = writeln!(
            out.max_freqs,
            "{ts},{},{}",
            format_value(max.frequency_hz),
            format_value(max.power)
        );
    }

    let bins = series.rows.first().map_or(0, |r| r.spectrum.len());
    for bin in 0..bins {
        let line = series
            .rows
            .iter()
            .map(|r| r.spectrum.get(bin).copied().map_or_else(String::new, format_value))
            .collect::<Vec<_>>()
            .join(" ");
        out.ssam.push_str(line.trim_end());
        out.ssam.push('\n');
    }

    for v in &series.average_ssam {
        out.average_ssam.push_str(&format_value(*v));
        out.average_ssam.push('\n');
    }

    Ok(out)
}

/// `yyyy-MM-dd HH:mm:ss.f`, at least one fraction digit.
pub fn format_timestamp(ms: i64) -> String {
    let base = format_ms(ms, "%Y-%m-%d %H:%M:%S");
    let millis = ms.rem_euclid(1000);
    if millis == 0 {
        format!("{base}.0")
    } else {
        let fraction = format!("{millis:03}");
        format!("{base}.{}", fraction.trim_end_matches('0'))
    }
}

/// Shortest decimal form; scientific notation outside `[1e-3, 1e7)`,
/// `NaN` and `Infinity` spelled out.
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        return "NaN".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    let magnitude = v.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        return format!("{v:?}");
    }
    let sci = format!("{v:e}");
    match sci.split_once('e') {
        Some((mantissa, exp)) if mantissa.contains('.') => format!("{mantissa}E{exp}"),
        Some((mantissa, exp)) => format!("{mantissa}.0E{exp}"),
        None => sci,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BinResult, Metadata};
    use chrono::Utc;

    fn series() -> AveragedSeries {
        let mut a = BinResult::new(1.5, vec![1.0, 2.0]);
        a.max_freq = Some(MaxFreq { frequency_hz: 0.5, power: 2.0 });
        let mut b = BinResult::new(f64::NAN, vec![3.0, 4.0]);
        b.max_freq = Some(MaxFreq::GAP);
        AveragedSeries {
            rows: vec![a, b],
            average_ssam: vec![1.0, 50.0],
        }
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00.0");
        assert_eq!(format_timestamp(40_960), "1970-01-01 00:00:40.96");
        assert_eq!(format_timestamp(1_005), "1970-01-01 00:00:01.005");
    }

    #[test]
    fn test_value_format() {
        assert_eq!(format_value(1.0), "1.0");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_value(1e7), "1.0E7");
        assert_eq!(format_value(1.5e-5), "1.5E-5");
    }

    #[test]
    fn test_artifacts() {
        let mut q = Query::new("NZ", "WIZ", "HHZ", "", Utc::now()).with_range(0, 86_400_000);
        q.window_size = 4096;
        q.set_metadata(Metadata::new(100, 0));

        let out = format_series(&q, &series()).unwrap();
        assert_eq!(
            out.rsam,
            "1970-01-01 00:00:00.0,1.5\n1970-01-01 00:00:40.96,NaN\n"
        );
        assert_eq!(
            out.max_freqs,
            "1970-01-01 00:00:00.0,0.5,2.0\n1970-01-01 00:00:40.96,NaN,NaN\n"
        );
        assert_eq!(out.ssam, "1.0 3.0\n2.0 4.0\n");
        assert_eq!(out.average_ssam, "1.0\n50.0\n");
    }

    #[test]
    fn test_requires_metadata() {
        let q = Query::new("NZ", "WIZ", "HHZ", "", Utc::now());
        assert!(matches!(
            format_series(&q, &series()),
            Err(OutputError::MissingMetadata)
        ));
    }
}

//! Replay Integration Tests
//!
//! Writes miniSEED files into a temporary directory and runs complete jobs
//! over them with `MseedFileSource`: acquisition, all pipeline stages and
//! the writer, without a network or gnuplot.

use chrono::{TimeZone, Utc};
use rsam_ssam::acquisition::MseedFileSource;
use rsam_ssam::mseed::RecordBuilder;
use rsam_ssam::pipeline::{run_job, JobError, JobOptions};
use rsam_ssam::types::{parse_date_time_ms, Metadata, Query, WindowFunction};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const SPS: u32 = 4;

fn day_start() -> i64 {
    parse_date_time_ms("2024-03-01", None).unwrap()
}

fn query() -> Query {
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
    let from = day_start();
    Query::new("NZ", "WIZ", "HHZ", "10", now)
        .with_range(from, from + 86_400_000)
        .with_window(64, WindowFunction::Hann)
        .with_cutoff(2)
}

fn options(root: &Path) -> JobOptions {
    JobOptions {
        output_root: root.to_path_buf(),
        zero_tolerance: 10,
        plotter: None,
    }
}

fn signal(n: usize) -> Vec<f64> {
    (0..n).map(|i| ((i % 7) as f64 - 3.0) * 100.0).collect()
}

/// Write `seconds` of signal starting `offset_s` into the day.
fn write_file(dir: &Path, name: &str, station: &str, offset_s: i64, seconds: usize) -> PathBuf {
    let builder = RecordBuilder::new("NZ", station, "10", "HHZ").sample_rate(SPS);
    let start_micros = (day_start() + offset_s * 1_000) * 1_000;
    let records = builder
        .build_series(start_micros, &signal(seconds * SPS as usize))
        .unwrap();
    let path = dir.join(name);
    std::fs::write(&path, records.concat()).unwrap();
    path
}

#[tokio::test]
async fn replay_job_writes_a_full_day() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    // second half hour first, so the source has to sort
    let late = write_file(input.path(), "late.mseed", "WIZ", 1_800, 1_800);
    let early = write_file(input.path(), "early.mseed", "WIZ", 0, 1_800);
    let other = write_file(input.path(), "other.mseed", "WSRZ", 0, 600);

    let source = Box::new(MseedFileSource::new([late, early, other]));
    let outcome = run_job(query(), source, &options(output.path()), CancellationToken::new())
        .await
        .unwrap();

    // 86400 s × 4 sps / 64
    assert_eq!(outcome.rows, 5_400);
    assert_eq!(outcome.averaging_factor, 1);
    assert_eq!(outcome.metadata, Metadata::new(SPS, day_start()));
    assert!(outcome.output_dir.ends_with("2024/03/01"));
    assert!(outcome.graphs.is_none());

    let rsam = std::fs::read_to_string(&outcome.files.rsam).unwrap();
    let lines: Vec<&str> = rsam.lines().collect();
    assert_eq!(lines.len(), 5_400);
    assert!(lines[0].starts_with("2024-03-01 00:00:00.0,"));
    assert!(!lines[0].ends_with("NaN"), "{}", lines[0]);
    // one hour of data is 225 bins; the rest of the day is padding
    assert!(lines[5_399].ends_with(",NaN"));

    // cutoff 2 Hz at 4 sps with 64-sample bins keeps 32 frequency rows
    let ssam = std::fs::read_to_string(&outcome.files.ssam).unwrap();
    assert_eq!(ssam.lines().count(), 32);
    let average = std::fs::read_to_string(&outcome.files.average_ssam).unwrap();
    assert_eq!(average.lines().count(), 32);
    assert!(outcome
        .files
        .max_freqs
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("2024-03-01 max_freqs.csv"));
}

#[tokio::test]
async fn replay_without_the_channel_reports_no_data() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let other = write_file(input.path(), "other.mseed", "WSRZ", 0, 600);

    let source = Box::new(MseedFileSource::new([other]));
    let err = run_job(query(), source, &options(output.path()), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NoData(_)), "{err:?}");
    assert!(std::fs::read_dir(output.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn cancelled_replay_writes_nothing() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let early = write_file(input.path(), "early.mseed", "WIZ", 0, 600);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let source = Box::new(MseedFileSource::new([early]));
    let err = run_job(query(), source, &options(output.path()), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Cancelled));
    assert!(std::fs::read_dir(output.path()).unwrap().next().is_none());
}

//! Periodic grapher: replots every query in the queries file on a fixed
//! interval, one job at a time.
//!
//! The run that lands on 00:00 UTC is the last one for the previous day, so
//! it waits [`MIDNIGHT_DELAY`] for late packets and forces every query onto
//! the last 24 hours.

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Timelike, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{defaults, ServiceConfig};
use crate::pipeline::{self, JobError, JobOptions};
use crate::types::{previous_day_range, Query, QueryRequest};

/// Grace period before the end-of-day run.
pub const MIDNIGHT_DELAY: Duration = Duration::from_secs(defaults::MIDNIGHT_DELAY_SECS);

#[derive(Debug, Error)]
pub enum QueriesFileError {
    #[error("failed to read queries file {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),

    #[error("syntax errors in queries file {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_json::Error),
}

/// Summary of one replot cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub queries: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} queries, {} ok, {} failed",
            self.queries, self.succeeded, self.failed
        )
    }
}

pub struct PeriodicGrapher {
    config: Arc<ServiceConfig>,
    options: JobOptions,
    interval: Duration,
}

impl PeriodicGrapher {
    pub fn new(config: Arc<ServiceConfig>, options: JobOptions) -> Self {
        let minutes = config.service.replot_interval_minutes.max(1);
        Self {
            config,
            options,
            interval: Duration::from_secs(minutes * 60),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Replot until `cancel` fires. The first cycle starts immediately.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_mins = self.interval.as_secs() / 60,
            queries_file = %self.config.service.queries_file.display(),
            "Periodic grapher started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.run_once(Utc::now(), &cancel).await;
            info!(report = %report, "Periodic cycle done");
        }

        info!("Periodic grapher stopped");
    }

    /// One cycle: load the queries file and run each query in order. A
    /// failed query is logged and the next one still runs.
    pub async fn run_once(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> CycleReport {
        let now = truncate_to_minute(now);
        let midnight = is_midnight(now);

        let requests = match load_queries(&self.config.service.queries_file).await {
            Ok(requests) => requests,
            Err(e) => {
                error!(error = %e, "Failed to create graphs");
                return CycleReport::default();
            }
        };
        let mut report = CycleReport {
            queries: requests.len(),
            ..CycleReport::default()
        };
        if requests.is_empty() {
            return report;
        }

        if midnight {
            info!(delay_secs = MIDNIGHT_DELAY.as_secs(), "It is midnight, delaying replot");
            tokio::select! {
                _ = cancel.cancelled() => return report,
                _ = tokio::time::sleep(MIDNIGHT_DELAY) => {}
            }
        }

        let default_type = self.config.default_query_type();
        for request in requests {
            if cancel.is_cancelled() {
                break;
            }
            let query = match request.into_query(default_type, now) {
                Ok(query) if midnight => end_of_day(query, now),
                Ok(query) => query,
                Err(e) => {
                    warn!(error = %e, "Skipping invalid periodic query");
                    report.failed += 1;
                    continue;
                }
            };
            let id = query.id();
            match pipeline::run_query(query, &self.config, &self.options, cancel.clone()).await {
                Ok(outcome) => {
                    info!(query = %id, rows = outcome.rows, "Periodic graph done");
                    report.succeeded += 1;
                }
                Err(JobError::Cancelled) => break,
                Err(e) => {
                    warn!(query = %id, error = %e, "Periodic graph failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

pub async fn load_queries(path: &Path) -> Result<Vec<QueryRequest>, QueriesFileError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| QueriesFileError::Read(path.to_path_buf(), e))?;
    serde_json::from_str(&contents).map_err(|e| QueriesFileError::Parse(path.to_path_buf(), e))
}

fn truncate_to_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(ChronoDuration::minutes(1)).unwrap_or(now)
}

fn is_midnight(now: DateTime<Utc>) -> bool {
    now.hour() == 0 && now.minute() == 0
}

/// Force `query` onto the 24 hours ending at `now`.
fn end_of_day(query: Query, now: DateTime<Utc>) -> Query {
    let (from, to) = previous_day_range(now);
    query.with_range(from, to)
}

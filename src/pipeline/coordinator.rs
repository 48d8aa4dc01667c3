//! Job coordinator: owns one query from source open to written files.
//!
//! ```text
//! 1. open the source, wait for metadata
//! 2. spawn source reader (+ Decompressor when the source yields records)
//! 3. spawn Packager
//! 4. run Processor+Averager on the blocking pool
//! 5. format, write, plot
//! ```
//!
//! Every stage selects on the job's `CancellationToken` while suspended on
//! a channel. Stage results are joined upstream first, so the first error
//! reported is the root cause.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Decompressor, Flow, JobError, Packager, StreamItem};
use crate::acquisition::{self, DataSource, SourceError, SourceEvent};
use crate::config::{defaults, ServiceConfig};
use crate::mseed::DataRecord;
use crate::output::{self, GraphFiles, Plotter, WrittenFiles};
use crate::processing::{Averager, Processor, ProcessorParams};
use crate::types::{AveragedSeries, Metadata, Query};

// ============================================================================
// Options and outcome
// ============================================================================

#[derive(Debug, Clone)]
pub struct JobOptions {
    pub output_root: PathBuf,
    pub zero_tolerance: usize,
    /// `None` skips graph rendering.
    pub plotter: Option<Plotter>,
}

impl JobOptions {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            output_root: config.service.output_dir.clone(),
            zero_tolerance: config.processing.zero_tolerance,
            plotter: config.graph.enabled.then(|| Plotter::new(&config.graph)),
        }
    }

    pub fn without_plot(mut self) -> Self {
        self.plotter = None;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub query_id: String,
    pub output_dir: PathBuf,
    pub files: WrittenFiles,
    pub graphs: Option<GraphFiles>,
    pub rows: usize,
    pub metadata: Metadata,
    pub averaging_factor: usize,
}

// ============================================================================
// Entry points
// ============================================================================

/// Run a query against the network source its type names.
pub async fn run_query(
    mut query: Query,
    config: &ServiceConfig,
    options: &JobOptions,
    cancel: CancellationToken,
) -> Result<JobOutcome, JobError> {
    query.widen_empty_range();
    query.validate()?;
    let source = acquisition::for_query(&query, &config.sources).map_err(JobError::from_open)?;
    run_job(query, source, options, cancel).await
}

/// Run one job to completion.
pub async fn run_job(
    mut query: Query,
    mut source: Box<dyn DataSource>,
    options: &JobOptions,
    cancel: CancellationToken,
) -> Result<JobOutcome, JobError> {
    let started = Instant::now();
    query.widen_empty_range();
    query.validate()?;
    let id = query.id();
    info!(query = %id, source = source.source_name(), "Starting job");

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(JobError::Cancelled),
        opened = source.open(&query) => opened,
    };
    let mut metadata = opened.map_err(|e| {
        warn!(query = %id, error = %e, "Failed to open data source");
        JobError::from_open(e)
    })?;
    if source.yields_records() {
        // the Decompressor aligns the stream to `from`
        metadata = Metadata::new(metadata.sps, query.from_ms);
    }
    query.set_metadata(metadata);
    info!(
        query = %id,
        sps = metadata.sps,
        start = %output::format_timestamp(metadata.start_ms),
        averaging_factor = query.averaging_factor(),
        "Stream metadata received"
    );

    let query = Arc::new(query);
    let series = run_stages(Arc::clone(&query), source, options.zero_tolerance, &cancel).await?;

    let artifacts = output::format_series(&query, &series).map_err(JobError::WriteFailed)?;
    let dir = query.output_dir(&options.output_root);
    output::ensure_dir(&dir).await.map_err(|e| {
        warn!(query = %id, error = %e, "Failed to create output folder");
        JobError::OutputFolder(e)
    })?;
    let files = output::write_artifacts(&dir, &query, &artifacts)
        .await
        .map_err(|e| {
            warn!(query = %id, error = %e, "Failed to write results");
            JobError::WriteFailed(e)
        })?;

    let graphs = match &options.plotter {
        Some(plotter) => {
            let plotted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                plotted = plotter.plot(&query, &dir) => plotted,
            };
            Some(plotted.map_err(JobError::Graph)?)
        }
        None => None,
    };

    info!(
        query = %id,
        rows = series.rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Job complete"
    );
    Ok(JobOutcome {
        query_id: id,
        output_dir: dir,
        files,
        graphs,
        rows: series.rows.len(),
        metadata,
        averaging_factor: query.averaging_factor(),
    })
}

// ============================================================================
// Stage wiring
// ============================================================================

async fn run_stages(
    query: Arc<Query>,
    source: Box<dyn DataSource>,
    zero_tolerance: usize,
    cancel: &CancellationToken,
) -> Result<AveragedSeries, JobError> {
    let id = query.id();
    let (sample_tx, sample_rx) = mpsc::channel(defaults::SAMPLE_QUEUE_CAPACITY);
    let (bin_tx, bin_rx) = mpsc::channel(defaults::BIN_QUEUE_CAPACITY);

    let mut upstream: Vec<(&'static str, JoinHandle<Result<(), JobError>>)> = Vec::new();
    let packager_input = if source.yields_records() {
        let (record_tx, record_rx) = mpsc::channel(defaults::DECOMPRESSOR_INPUT_CAPACITY);
        upstream.push((
            "source",
            tokio::spawn(source_stage(source, Outlet::Records(record_tx), cancel.clone(), id.clone())),
        ));
        upstream.push((
            "decompressor",
            tokio::spawn(decompressor_stage(
                Decompressor::new(&query),
                record_rx,
                sample_tx,
                cancel.clone(),
                id.clone(),
            )),
        ));
        "decompressor"
    } else {
        upstream.push((
            "source",
            tokio::spawn(source_stage(source, Outlet::Samples(sample_tx), cancel.clone(), id.clone())),
        ));
        "source"
    };
    upstream.push((
        "packager",
        tokio::spawn(packager_stage(
            Packager::new(query.window_size),
            sample_rx,
            bin_tx,
            packager_input,
            cancel.clone(),
            id.clone(),
        )),
    ));

    let processor = {
        let query = Arc::clone(&query);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || processor_stage(&query, zero_tolerance, bin_rx, &cancel))
    };

    let mut first_error = None;
    for (name, handle) in upstream {
        let result = handle.await.unwrap_or_else(|e| {
            warn!(query = %id, stage = name, error = %e, "Stage task failed");
            Err(JobError::StageAborted(name))
        });
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    let processed = processor.await.unwrap_or_else(|e| {
        warn!(query = %id, stage = "processor", error = %e, "Stage task failed");
        Err(JobError::StageAborted("processor"))
    });

    match first_error {
        Some(e) => Err(e),
        None => processed,
    }
}

enum Forward {
    Sent,
    Closed,
    Cancelled,
}

/// Send one item, giving up on cancellation.
async fn forward<T>(tx: &Sender<StreamItem<T>>, item: StreamItem<T>, cancel: &CancellationToken) -> Forward {
    tokio::select! {
        _ = cancel.cancelled() => Forward::Cancelled,
        sent = tx.send(item) => match sent {
            Ok(()) => Forward::Sent,
            Err(_) => Forward::Closed,
        },
    }
}

/// Best-effort end marker for a cancelled stage.
fn end_on_cancel<T>(tx: &Sender<StreamItem<T>>) -> JobError {
    let _ = tx.try_send(StreamItem::End);
    JobError::Cancelled
}

async fn recv<T>(rx: &mut Receiver<StreamItem<T>>, cancel: &CancellationToken) -> Option<Option<StreamItem<T>>> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        item = rx.recv() => Some(item),
    }
}

// ============================================================================
// Source reader
// ============================================================================

enum Outlet {
    Records(Sender<StreamItem<DataRecord>>),
    Samples(Sender<StreamItem<Vec<f64>>>),
}

impl Outlet {
    fn cancel(&self) -> JobError {
        match self {
            Self::Records(tx) => end_on_cancel(tx),
            Self::Samples(tx) => end_on_cancel(tx),
        }
    }

    async fn end(&self, cancel: &CancellationToken) -> Forward {
        match self {
            Self::Records(tx) => forward(tx, StreamItem::End, cancel).await,
            Self::Samples(tx) => forward(tx, StreamItem::End, cancel).await,
        }
    }
}

async fn source_stage(
    mut source: Box<dyn DataSource>,
    outlet: Outlet,
    cancel: CancellationToken,
    id: String,
) -> Result<(), JobError> {
    let name = source.source_name();
    let mut units = 0usize;
    info!(query = %id, source = name, "Source reader started");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(outlet.cancel()),
            event = source.next_event() => event,
        };

        let event = match event {
            Err(e) if units > 0 => {
                warn!(query = %id, source = name, units, error = %e, "Source broke off, ending with the data received");
                Ok(SourceEvent::Eof)
            }
            other => other,
        };

        let sent = match (event, &outlet) {
            (Ok(SourceEvent::Eof), _) => {
                info!(query = %id, source = name, units, "Source finished");
                if let Forward::Cancelled = outlet.end(&cancel).await {
                    return Err(outlet.cancel());
                }
                return if units == 0 {
                    Err(JobError::ServerNoData)
                } else {
                    Ok(())
                };
            }
            (Ok(SourceEvent::Record(record)), Outlet::Records(tx)) => {
                forward(tx, StreamItem::Data(record), &cancel).await
            }
            (Ok(SourceEvent::Samples(samples)), Outlet::Samples(tx)) => {
                forward(tx, StreamItem::Data(samples), &cancel).await
            }
            (Ok(_), _) => {
                let e = SourceError::Protocol(format!("{name} produced an unexpected event kind"));
                warn!(query = %id, error = %e, "Source failed");
                return Err(JobError::StageAborted("source"));
            }
            (Err(e), _) => {
                warn!(query = %id, source = name, error = %e, "Source failed");
                return Err(JobError::StageAborted("source"));
            }
        };

        match sent {
            Forward::Sent => units += 1,
            Forward::Closed => {
                debug!(query = %id, units, "Downstream closed, source reader stopping");
                return Ok(());
            }
            Forward::Cancelled => return Err(outlet.cancel()),
        }
    }
}

// ============================================================================
// Decompressor
// ============================================================================

async fn decompressor_stage(
    mut decompressor: Decompressor,
    mut rx: Receiver<StreamItem<DataRecord>>,
    tx: Sender<StreamItem<Vec<f64>>>,
    cancel: CancellationToken,
    id: String,
) -> Result<(), JobError> {
    info!(query = %id, "Decompressor started");
    loop {
        let Some(item) = recv(&mut rx, &cancel).await else {
            return Err(end_on_cancel(&tx));
        };
        match item {
            Some(StreamItem::Data(record)) => {
                let mut samples = Vec::with_capacity(record.num_samples());
                let flow = decompressor.push(&record, &mut samples);
                if !samples.is_empty() {
                    match forward(&tx, StreamItem::Data(samples), &cancel).await {
                        Forward::Sent => {}
                        Forward::Closed => return Ok(()),
                        Forward::Cancelled => return Err(end_on_cancel(&tx)),
                    }
                }
                if flow == Flow::Stop {
                    break;
                }
            }
            Some(StreamItem::End) => break,
            None => return Err(JobError::StageAborted("source")),
        }
    }

    let stats = decompressor.stats();
    info!(
        query = %id,
        records = stats.records,
        dropped = stats.dropped_before_from,
        discarded = stats.discarded_overlaps,
        decode_failures = stats.decode_failures,
        padded = stats.padded_zeros,
        samples = stats.samples,
        "Decompressor finished"
    );
    match forward(&tx, StreamItem::End, &cancel).await {
        Forward::Cancelled => Err(end_on_cancel(&tx)),
        _ => Ok(()),
    }
}

// ============================================================================
// Packager
// ============================================================================

async fn packager_stage(
    mut packager: Packager,
    mut rx: Receiver<StreamItem<Vec<f64>>>,
    tx: Sender<StreamItem<Vec<f64>>>,
    upstream: &'static str,
    cancel: CancellationToken,
    id: String,
) -> Result<(), JobError> {
    info!(query = %id, "Packager started");
    let mut bins = Vec::new();
    loop {
        let Some(item) = recv(&mut rx, &cancel).await else {
            return Err(end_on_cancel(&tx));
        };
        match item {
            Some(StreamItem::Data(samples)) => packager.extend(&samples, &mut bins),
            Some(StreamItem::End) => break,
            None => return Err(JobError::StageAborted(upstream)),
        }
        for bin in bins.drain(..) {
            match forward(&tx, StreamItem::Data(bin), &cancel).await {
                Forward::Sent => {}
                Forward::Closed => return Ok(()),
                Forward::Cancelled => return Err(end_on_cancel(&tx)),
            }
        }
    }

    let padded = packager.pending();
    if let Some(last) = packager.finish() {
        if let Forward::Cancelled = forward(&tx, StreamItem::Data(last), &cancel).await {
            return Err(end_on_cancel(&tx));
        }
    }
    info!(query = %id, bins = packager.bins(), trailing_samples = padded, "Packager finished");
    match forward(&tx, StreamItem::End, &cancel).await {
        Forward::Cancelled => Err(end_on_cancel(&tx)),
        _ => Ok(()),
    }
}

// ============================================================================
// Processor + Averager
// ============================================================================

fn processor_stage(
    query: &Query,
    zero_tolerance: usize,
    mut rx: Receiver<StreamItem<Vec<f64>>>,
    cancel: &CancellationToken,
) -> Result<AveragedSeries, JobError> {
    let id = query.id();
    let aborted = |e: crate::processing::ProcessingError| {
        warn!(query = %id, error = %e, "Processing failed");
        JobError::StageAborted("processor")
    };

    let params = ProcessorParams::for_query(query, zero_tolerance).map_err(&aborted)?;
    let mut processor = Processor::new(params).map_err(&aborted)?;
    let mut averager = Averager::for_query(query).map_err(&aborted)?;
    info!(
        query = %id,
        cutoff_window = processor.cutoff_window(),
        averaging_factor = averager.factor(),
        "Processor started"
    );

    let (mut bins, mut gaps) = (0usize, 0usize);
    loop {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        match rx.blocking_recv() {
            Some(StreamItem::Data(mut bin)) => {
                let result = processor.process(&mut bin).map_err(&aborted)?;
                if result.is_gap() {
                    gaps += 1;
                }
                averager.push(result).map_err(&aborted)?;
                bins += 1;
            }
            Some(StreamItem::End) => break,
            None if cancel.is_cancelled() => return Err(JobError::Cancelled),
            None => return Err(JobError::StageAborted("packager")),
        }
    }

    if bins == 0 {
        warn!(query = %id, "No bins reached the processor");
        return Err(JobError::NothingToProcess);
    }
    let series = averager.complete();
    info!(query = %id, bins, gaps, rows = series.rows.len(), "Processor finished");
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;

    /// Sample source fed from memory.
    struct MemorySource {
        metadata: Metadata,
        batches: VecDeque<Vec<f64>>,
        open_error: Option<SourceError>,
        tail_error: Option<SourceError>,
    }

    #[async_trait]
    impl DataSource for MemorySource {
        async fn open(&mut self, _query: &Query) -> Result<Metadata, SourceError> {
            match self.open_error.take() {
                Some(e) => Err(e),
                None => Ok(self.metadata),
            }
        }

        async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
            match (self.batches.pop_front(), self.tail_error.take()) {
                (Some(b), tail) => {
                    self.tail_error = tail;
                    Ok(SourceEvent::Samples(b))
                }
                (None, Some(e)) => Err(e),
                (None, None) => Ok(SourceEvent::Eof),
            }
        }

        fn yields_records(&self) -> bool {
            false
        }

        fn source_name(&self) -> &'static str {
            "memory"
        }
    }

    fn query() -> Query {
        Query::new("NZ", "WIZ", "HHZ", "", Utc::now())
            .with_range(0, 86_400_000)
            .with_window(16, crate::types::WindowFunction::Uniform)
            .with_cutoff(2)
    }

    fn options(root: &std::path::Path) -> JobOptions {
        JobOptions {
            output_root: root.to_path_buf(),
            zero_tolerance: 10,
            plotter: None,
        }
    }

    fn source(batches: Vec<Vec<f64>>) -> Box<dyn DataSource> {
        Box::new(MemorySource {
            metadata: Metadata::new(4, 0),
            batches: batches.into(),
            open_error: None,
            tail_error: None,
        })
    }

    fn broken_source(batches: Vec<Vec<f64>>) -> Box<dyn DataSource> {
        Box::new(MemorySource {
            metadata: Metadata::new(4, 0),
            batches: batches.into(),
            open_error: None,
            tail_error: Some(SourceError::Parse("invalid sample oops".into())),
        })
    }

    #[tokio::test]
    async fn test_sample_job_writes_one_day() {
        let dir = tempfile::tempdir().unwrap();
        let signal: Vec<f64> = (0..64).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let outcome = run_job(query(), source(vec![signal]), &options(dir.path()), CancellationToken::new())
            .await
            .unwrap();

        // 86400 s at 4 sps in bins of 16
        assert_eq!(outcome.rows, 21_600);
        assert_eq!(outcome.averaging_factor, 1);
        let rsam = std::fs::read_to_string(&outcome.files.rsam).unwrap();
        assert_eq!(rsam.lines().count(), 21_600);
        assert!(rsam.starts_with("1970-01-01 00:00:00.0,1.0\n"));
        assert!(outcome.graphs.is_none());
    }

    #[tokio::test]
    async fn test_empty_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_job(query(), source(vec![]), &options(dir.path()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ServerNoData), "{err:?}");
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let src = Box::new(MemorySource {
            metadata: Metadata::new(1, 0),
            batches: VecDeque::new(),
            open_error: Some(SourceError::NoData("No data returned for this query".into())),
            tail_error: None,
        });
        let err = run_job(query(), src, &options(dir.path()), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No data returned for this query");
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_job(query(), source(vec![vec![1.0; 16]]), &options(dir.path()), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
    }

    #[tokio::test]
    async fn test_invalid_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = query();
        q.station = "W*".into();
        let err = run_job(q, source(vec![]), &options(dir.path()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_stream_breaking_off_keeps_received_data() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_job(
            query(),
            broken_source(vec![vec![1.0, 2.0, 3.0]]),
            &options(dir.path()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.rows, 21_600);
        let rsam = std::fs::read_to_string(&outcome.files.rsam).unwrap();
        assert_eq!(rsam.lines().count(), 21_600);
    }

    #[tokio::test]
    async fn test_error_before_any_data_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_job(query(), broken_source(vec![]), &options(dir.path()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::StageAborted("source")), "{err:?}");
    }
}

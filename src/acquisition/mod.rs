//! Waveform acquisition from FDSN dataselect, SeedLink and Winston servers,
//! plus local miniSEED replay.
//!
//! Every network source runs a reader task that fills a [`FlowBuffer`];
//! the pipeline drains it through the [`DataSource`] trait.

pub mod buffer;
pub mod fdsn;
pub mod replay;
pub mod seedlink;
pub mod winston;

pub use buffer::{FlowBuffer, FlowLimits};
pub use fdsn::FdsnSource;
pub use replay::MseedFileSource;
pub use seedlink::SeedLinkSource;
pub use winston::WinstonSource;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{defaults, SourcesConfig};
use crate::mseed::DataRecord;
use crate::types::{Metadata, Query, QueryType};

/// Data source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0} server is not configured")]
    NotConfigured(&'static str),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    NoData(String),

    #[error("Server replied with HTTP status {0}")]
    Http(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One unit produced by a source.
#[derive(Debug)]
pub enum SourceEvent {
    /// A miniSEED record; the Decompressor is required downstream.
    Record(DataRecord),
    /// Decoded samples, already aligned to the query start.
    Samples(Vec<f64>),
    /// End of stream.
    Eof,
}

/// Where waveform data comes from.
///
/// `open` is called once and resolves when the first unit has arrived;
/// `next_event` is then polled until it returns [`SourceEvent::Eof`].
#[async_trait]
pub trait DataSource: Send {
    async fn open(&mut self, query: &Query) -> Result<Metadata, SourceError>;

    async fn next_event(&mut self) -> Result<SourceEvent, SourceError>;

    /// Whether events are miniSEED records rather than samples.
    fn yields_records(&self) -> bool;

    /// Human-readable name for logging.
    fn source_name(&self) -> &'static str;
}

/// Build the network source a query asks for.
pub fn for_query(query: &Query, sources: &SourcesConfig) -> Result<Box<dyn DataSource>, SourceError> {
    Ok(match query.source_type {
        QueryType::Fdsn => Box::new(FdsnSource::new(sources)?),
        QueryType::Seedlink => Box::new(SeedLinkSource::new(sources)?),
        QueryType::Winston => Box::new(WinstonSource::new(sources)?),
    })
}

// ============================================================================
// Shared plumbing
// ============================================================================

/// Connect with the shared connect timeout and TCP keepalive enabled.
pub(crate) async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, SourceError> {
    let addr = format!("{host}:{port}");
    info!(address = %addr, "Connecting");

    let connect_timeout = Duration::from_millis(defaults::CONNECT_TIMEOUT_MS);
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| SourceError::Timeout(format!("connection to {addr}")))?
        .map_err(|e| SourceError::ConnectionFailed(format!("{addr}: {e}")))?;

    let sock_ref = socket2::SockRef::from(&stream);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = sock_ref.set_tcp_keepalive(&keepalive);

    Ok(stream)
}

/// Reader task handle; aborts the task when the source is dropped.
pub(crate) struct ReaderTask(JoinHandle<()>);

impl ReaderTask {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Record stream shared by the miniSEED sources. Holds back the first
/// record, which `open` needs for the metadata.
pub(crate) struct RecordFeed {
    buffer: Arc<FlowBuffer<DataRecord>>,
    pending: Option<DataRecord>,
    _reader: ReaderTask,
}

impl RecordFeed {
    /// Wait for the first record and derive the stream metadata from it.
    pub(crate) async fn start(
        buffer: Arc<FlowBuffer<DataRecord>>,
        reader: ReaderTask,
        no_data: &str,
    ) -> Result<(Self, Metadata), SourceError> {
        let first = buffer
            .pop()
            .await
            .ok_or_else(|| SourceError::NoData(no_data.to_string()))?;
        let metadata = record_metadata(&first)?;
        Ok((
            Self {
                buffer,
                pending: Some(first),
                _reader: reader,
            },
            metadata,
        ))
    }

    pub(crate) async fn next(&mut self) -> Result<SourceEvent, SourceError> {
        if let Some(first) = self.pending.take() {
            return Ok(SourceEvent::Record(first));
        }
        Ok(match self.buffer.pop().await {
            Some(record) => SourceEvent::Record(record),
            None => SourceEvent::Eof,
        })
    }
}

/// Metadata from a record: sample rate truncated to whole Hz.
pub(crate) fn record_metadata(record: &DataRecord) -> Result<Metadata, SourceError> {
    let rate = record.sample_rate();
    if !(rate >= 1.0) {
        return Err(SourceError::Parse(format!("invalid sample rate {rate}")));
    }
    Ok(Metadata::new(rate as u32, record.start_ms()))
}

pub(crate) async fn next_from_feed(
    feed: Option<&mut RecordFeed>,
    name: &str,
) -> Result<SourceEvent, SourceError> {
    match feed {
        Some(feed) => feed.next().await,
        None => Err(SourceError::Protocol(format!("{name} source used before open"))),
    }
}

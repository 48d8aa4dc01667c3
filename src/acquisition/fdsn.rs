//! FDSN dataselect client.
//!
//! Issues one HTTP GET for the query window (plus a margin on each side) and
//! splits the streamed body into fixed-size miniSEED records.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    next_from_feed, DataSource, FlowBuffer, FlowLimits, ReaderTask, RecordFeed, SourceError,
    SourceEvent,
};
use crate::config::{defaults, SourcesConfig};
use crate::mseed::DataRecord;
use crate::types::{format_ms, Metadata, Query};

pub const DEFAULT_DATASELECT_PATH: &str = "/fdsnws/dataselect/1/query";

pub const NO_DATA: &str = "No data returned for this query";

pub struct FdsnSource {
    base_url: String,
    response_timeout: Duration,
    feed: Option<RecordFeed>,
}

impl FdsnSource {
    pub fn new(config: &SourcesConfig) -> Result<Self, SourceError> {
        Ok(Self {
            base_url: dataselect_base(config)?,
            response_timeout: Duration::from_secs(config.fdsn_timeout_s),
            feed: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Absolute dataselect URL, or `http://server:port` plus the configured path.
pub fn dataselect_base(config: &SourcesConfig) -> Result<String, SourceError> {
    let path = config.fdsn_dataselect_url.as_deref().unwrap_or(DEFAULT_DATASELECT_PATH);
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }
    let server = config
        .fdsn_server
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(SourceError::NotConfigured("FDSN"))?;
    Ok(format!("http://{server}:{}{path}", config.fdsn_port))
}

/// Full request URL with the time margin applied.
pub fn request_url(base: &str, query: &Query) -> String {
    let location = if query.location.trim().is_empty() {
        "--"
    } else {
        query.location.trim()
    };
    let start = format_ms(query.from_ms - defaults::FDSN_MARGIN_MS, "%Y-%m-%dT%H:%M:%S");
    let end = format_ms(query.to_ms + defaults::FDSN_MARGIN_MS, "%Y-%m-%dT%H:%M:%S");
    format!(
        "{base}?net={}&sta={}&cha={}&loc={location}&start={start}&end={end}",
        query.network, query.station, query.component
    )
}

#[async_trait]
impl DataSource for FdsnSource {
    async fn open(&mut self, query: &Query) -> Result<Metadata, SourceError> {
        let url = request_url(&self.base_url, query);
        info!(query = %query.id(), url = %url, "Requesting FDSN dataselect");

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(defaults::CONNECT_TIMEOUT_MS))
            .build()
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;

        let response = tokio::time::timeout(self.response_timeout, client.get(&url).send())
            .await
            .map_err(|_| SourceError::Timeout("FDSN response".into()))?
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;

        match response.status().as_u16() {
            200 => {}
            204 | 404 => return Err(SourceError::NoData(NO_DATA.into())),
            status => return Err(SourceError::Http(status)),
        }

        let buffer = Arc::new(FlowBuffer::new(FlowLimits::fdsn()));
        let reader = ReaderTask::spawn(read_body(
            response,
            Arc::clone(&buffer),
            query.location.trim().to_string(),
            query.id(),
        ));

        let (feed, metadata) = RecordFeed::start(buffer, reader, NO_DATA).await?;
        self.feed = Some(feed);
        Ok(metadata)
    }

    async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        let name = self.source_name();
        next_from_feed(self.feed.as_mut(), name).await
    }

    fn yields_records(&self) -> bool {
        true
    }

    fn source_name(&self) -> &'static str {
        "FDSN"
    }
}

/// Accumulates body chunks and cuts them into records.
#[derive(Default)]
pub(crate) struct RecordSplitter {
    carry: Vec<u8>,
    pub(crate) corrupt: usize,
    pub(crate) dropped: usize,
}

impl RecordSplitter {
    /// Records completed by `chunk` whose location matches `location`.
    pub(crate) fn feed(&mut self, chunk: &[u8], location: &str) -> Vec<DataRecord> {
        self.carry.extend_from_slice(chunk);
        let len = defaults::MINISEED_RECORD_LEN;
        let mut out = Vec::new();
        let mut offset = 0;
        while self.carry.len() - offset >= len {
            match DataRecord::parse(&self.carry[offset..offset + len]) {
                Ok(record) if record.location() == location => out.push(record),
                Ok(_) => self.dropped += 1,
                Err(e) => {
                    self.corrupt += 1;
                    warn!(error = %e, "Skipping unparseable record");
                }
            }
            offset += len;
        }
        self.carry.drain(..offset);
        out
    }

    pub(crate) fn leftover(&self) -> usize {
        self.carry.len()
    }
}

async fn read_body(
    response: reqwest::Response,
    buffer: Arc<FlowBuffer<DataRecord>>,
    location: String,
    query_id: String,
) {
    let idle = Duration::from_secs(defaults::FDSN_IDLE_TIMEOUT_SECS);
    let mut body = response.bytes_stream();
    let mut splitter = RecordSplitter::default();
    let mut records = 0usize;

    loop {
        let chunk = match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => {
                warn!(query = %query_id, error = %e, "FDSN body stream failed, ending");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(query = %query_id, "FDSN body stream idle, ending");
                break;
            }
        };
        let batch = splitter.feed(&chunk, &location);
        records += batch.len();
        buffer.extend(batch);
        buffer.wait_for_room().await;
    }

    if splitter.leftover() > 0 {
        warn!(query = %query_id, bytes = splitter.leftover(), "Discarding partial trailing record");
    }
    info!(
        query = %query_id,
        records,
        dropped = splitter.dropped,
        corrupt = splitter.corrupt,
        "FDSN download complete"
    );
    buffer.finish();
}

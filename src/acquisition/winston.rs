//! Winston wave server client.
//!
//! One ASCII request line; the reply is a space-delimited header followed by
//! ASCII sample values. Samples are aligned to the query start before they
//! are handed to the pipeline, so the source yields samples, not records.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::{connect_tcp, DataSource, FlowBuffer, FlowLimits, ReaderTask, SourceError, SourceEvent};
use crate::config::{defaults, SourcesConfig};
use crate::types::{Metadata, Query};

pub const NO_SAMPLES: &str = "Winston didn't send any samples";

const READ_CHUNK: usize = 16 * 1024;
const SAMPLE_BATCH: usize = 4096;

pub struct WinstonSource {
    host: String,
    port: u16,
    header_timeout: Duration,
    feed: Option<SampleFeed>,
}

struct SampleFeed {
    buffer: Arc<FlowBuffer<f64>>,
    _reader: ReaderTask,
}

impl WinstonSource {
    pub fn new(config: &SourcesConfig) -> Result<Self, SourceError> {
        let host = config
            .winston_server
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or(SourceError::NotConfigured("Winston"))?;
        Ok(Self {
            host,
            port: config.winston_port,
            header_timeout: Duration::from_secs(config.winston_timeout_s),
            feed: None,
        })
    }
}

/// `GETSCNL: 1 S C N L from to 0`, or `GETSCN:` without a location.
pub fn request_line(query: &Query) -> String {
    let from_s = ((query.from_ms - 1000) / 1000) as f64;
    let to_s = (query.to_ms / 1000) as f64;
    let location = query.location.trim();
    if location.is_empty() {
        format!(
            "GETSCN: 1 {} {} {} {from_s:.6} {to_s:.6} 0\n",
            query.station, query.component, query.network
        )
    } else {
        format!(
            "GETSCNL: 1 {} {} {} {location} {from_s:.6} {to_s:.6} 0\n",
            query.station, query.component, query.network
        )
    }
}

/// Stream idle timeout: longer ranges take longer for the server to assemble.
pub fn idle_timeout(query: &Query) -> Duration {
    let days = query.duration_in_days();
    if days <= 1 {
        Duration::from_secs(defaults::WINSTON_IDLE_TIMEOUT_SECS)
    } else {
        Duration::from_secs(defaults::WINSTON_IDLE_SECS_PER_DAY * days.unsigned_abs())
    }
}

#[async_trait]
impl DataSource for WinstonSource {
    async fn open(&mut self, query: &Query) -> Result<Metadata, SourceError> {
        let mut stream = connect_tcp(&self.host, self.port).await?;
        let request = request_line(query);
        info!(query = %query.id(), request = %request.trim(), "Winston request");
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let buffer = Arc::new(FlowBuffer::new(FlowLimits::tcp()));
        let (header_tx, header_rx) = oneshot::channel();
        let reader = ReaderTask::spawn(read_response(
            stream,
            ResponseReader {
                from_ms: query.from_ms,
                with_location: !query.location.trim().is_empty(),
                header_timeout: self.header_timeout,
                idle: idle_timeout(query),
                query_id: query.id(),
            },
            Arc::clone(&buffer),
            header_tx,
        ));

        let metadata = header_rx
            .await
            .map_err(|_| SourceError::Protocol("Winston reader stopped".into()))??;
        self.feed = Some(SampleFeed {
            buffer,
            _reader: reader,
        });
        Ok(metadata)
    }

    async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        let feed = self
            .feed
            .as_ref()
            .ok_or_else(|| SourceError::Protocol("Winston source used before open".into()))?;
        let batch = feed.buffer.pop_batch(SAMPLE_BATCH).await;
        Ok(if batch.is_empty() {
            SourceEvent::Eof
        } else {
            SourceEvent::Samples(batch)
        })
    }

    fn yields_records(&self) -> bool {
        false
    }

    fn source_name(&self) -> &'static str {
        "Winston"
    }
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct WinstonHeader {
    pub request_id: String,
    pub pin: String,
    pub station: String,
    pub channel: String,
    pub network: String,
    pub location: Option<String>,
    pub data_type: String,
    pub start_secs: f64,
    pub sps: u32,
}

impl WinstonHeader {
    pub fn start_ms(&self) -> i64 {
        (self.start_secs * 1000.0) as i64
    }

    fn from_tokens(tokens: &[String], with_location: bool) -> Result<Self, SourceError> {
        let mut it = tokens.iter().cloned();
        let mut next = || it.next().unwrap_or_default();
        let request_id = next();
        let pin = next();
        let station = next();
        let channel = next();
        let network = next();
        let location = with_location.then(&mut next);
        let data_type = next();
        let start = next();
        let rate = next();

        let start_secs: f64 = start
            .parse()
            .map_err(|_| SourceError::Parse(format!("invalid start time {start}")))?;
        let sps: f32 = rate
            .parse()
            .map_err(|_| SourceError::Parse(format!("invalid sps {rate}")))?;
        if !(sps >= 1.0) {
            return Err(SourceError::Parse(format!("invalid sps {rate}")));
        }
        Ok(Self {
            request_id,
            pin,
            station,
            channel,
            network,
            location,
            data_type,
            start_secs,
            sps: sps as u32,
        })
    }
}

/// Splits the reply into tokens across chunk boundaries.
#[derive(Debug)]
pub struct ResponseParser {
    carry: String,
    header_tokens: Vec<String>,
    header_len: usize,
    with_location: bool,
    header: Option<WinstonHeader>,
}

impl ResponseParser {
    pub fn new(with_location: bool) -> Self {
        Self {
            carry: String::new(),
            header_tokens: Vec::new(),
            header_len: if with_location { 9 } else { 8 },
            with_location,
            header: None,
        }
    }

    pub fn header(&self) -> Option<&WinstonHeader> {
        self.header.as_ref()
    }

    /// Samples completed by `chunk`. A trailing partial token is carried over.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<f64>, SourceError> {
        self.carry.push_str(&String::from_utf8_lossy(chunk));
        let complete = match self.carry.rfind(|c: char| c.is_ascii_whitespace()) {
            Some(idx) => {
                let rest = self.carry.split_off(idx + 1);
                std::mem::replace(&mut self.carry, rest)
            }
            None => return Ok(Vec::new()),
        };
        self.tokens(&complete)
    }

    /// Flush the carried token at end of stream.
    pub fn finish(&mut self) -> Result<Vec<f64>, SourceError> {
        let rest = std::mem::take(&mut self.carry);
        self.tokens(&rest)
    }

    fn tokens(&mut self, text: &str) -> Result<Vec<f64>, SourceError> {
        let mut samples = Vec::new();
        for token in text.split_ascii_whitespace() {
            if self.header.is_none() {
                self.header_tokens.push(token.to_string());
                if self.header_tokens.len() == self.header_len {
                    self.header = Some(WinstonHeader::from_tokens(
                        &self.header_tokens,
                        self.with_location,
                    )?);
                }
                continue;
            }
            let value = token
                .parse::<f64>()
                .map_err(|_| SourceError::Parse(format!("invalid sample {token}")))?;
            samples.push(value);
        }
        Ok(samples)
    }
}

/// Pads or trims the head of the stream so the first sample lands on `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    pending: i64,
}

impl Alignment {
    pub fn new(from_ms: i64, header: &WinstonHeader) -> Self {
        let tolerance_ms = i64::from((1000 / header.sps).max(1));
        let diff = header.start_ms() - from_ms;
        let pending = if diff.abs() < tolerance_ms {
            0
        } else {
            (diff as f64 * f64::from(header.sps) / 1000.0).trunc() as i64
        };
        Self { pending }
    }

    /// Zeros still to prepend (positive) or samples still to drop (negative).
    pub fn pending(&self) -> i64 {
        self.pending
    }

    pub fn apply(&mut self, samples: Vec<f64>) -> Vec<f64> {
        match self.pending {
            0 => samples,
            n if n > 0 => {
                let mut out = vec![0.0; n as usize];
                out.extend(samples);
                self.pending = 0;
                out
            }
            n => {
                let drop = (n.unsigned_abs() as usize).min(samples.len());
                self.pending += drop as i64;
                samples[drop..].to_vec()
            }
        }
    }
}

pub(crate) struct ResponseReader {
    pub(crate) from_ms: i64,
    pub(crate) with_location: bool,
    pub(crate) header_timeout: Duration,
    pub(crate) idle: Duration,
    pub(crate) query_id: String,
}

/// Read the reply into `buffer`; the metadata goes out on `header_tx` as
/// soon as the header is complete.
pub(crate) async fn read_response<R>(
    mut stream: R,
    opts: ResponseReader,
    buffer: Arc<FlowBuffer<f64>>,
    header_tx: oneshot::Sender<Result<Metadata, SourceError>>,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut header_tx = Some(header_tx);
    let mut parser = ResponseParser::new(opts.with_location);
    let mut alignment: Option<Alignment> = None;
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut samples_total = 0usize;

    let outcome: Result<(), SourceError> = async {
        loop {
            let wait = if parser.header().is_some() {
                opts.idle
            } else {
                opts.header_timeout
            };
            let n = match tokio::time::timeout(wait, stream.read(&mut chunk)).await {
                Err(_) if parser.header().is_some() => {
                    warn!(query = %opts.query_id, "Winston stream idle, ending");
                    break;
                }
                Err(_) => return Err(SourceError::Timeout("Winston header".into())),
                Ok(read) => read?,
            };
            let last = n == 0 || chunk[n - 1] == b'\n';
            let mut samples = parser.feed(&chunk[..n])?;
            if last {
                samples.extend(parser.finish()?);
            }

            if alignment.is_none() {
                if let Some(header) = parser.header() {
                    info!(
                        query = %opts.query_id,
                        request = %header.request_id,
                        data_type = %header.data_type,
                        start = header.start_secs,
                        sps = header.sps,
                        "Winston header"
                    );
                    let align = Alignment::new(opts.from_ms, header);
                    if align.pending() != 0 {
                        info!(query = %opts.query_id, offset = align.pending(), "Aligning Winston samples to query start");
                    }
                    alignment = Some(align);
                    if let Some(tx) = header_tx.take() {
                        let _ = tx.send(Ok(Metadata::new(header.sps, opts.from_ms)));
                    }
                }
            }
            if let Some(align) = alignment.as_mut() {
                let aligned = align.apply(samples);
                samples_total += aligned.len();
                buffer.extend(aligned);
                buffer.wait_for_room().await;
            }
            if last {
                break;
            }
        }
        Ok(())
    }
    .await;

    match (outcome, header_tx.take()) {
        (Ok(()), Some(tx)) => {
            let _ = tx.send(Err(SourceError::NoData(NO_SAMPLES.into())));
            buffer.finish();
        }
        (Err(e), Some(tx)) => {
            let _ = tx.send(Err(e));
            buffer.finish();
        }
        (Ok(()), None) => buffer.finish(),
        (Err(e), None) => {
            warn!(
                query = %opts.query_id,
                error = %e,
                samples = samples_total,
                "Winston stream broke off, ending with the samples received"
            );
            buffer.finish();
        }
    }
    info!(query = %opts.query_id, samples = samples_total, "Winston download complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_date_time_ms;
    use chrono::Utc;
    use tokio_test::io::Builder;

    fn query(location: &str) -> Query {
        let from = parse_date_time_ms("2024-03-01", None).unwrap();
        Query::new("NZ", "WIZ", "HHZ", location, Utc::now()).with_range(from, from + 86_400_000)
    }

    fn reader(from_ms: i64) -> ResponseReader {
        ResponseReader {
            from_ms,
            with_location: true,
            header_timeout: Duration::from_secs(2),
            idle: Duration::from_secs(2),
            query_id: "test".into(),
        }
    }

    #[test]
    fn test_request_line() {
        let q = query("10");
        assert_eq!(
            request_line(&q),
            "GETSCNL: 1 WIZ HHZ NZ 10 1709251199.000000 1709337600.000000 0\n"
        );
        assert!(request_line(&query("")).starts_with("GETSCN: 1 WIZ HHZ NZ 1709251199.000000"));
    }

    #[test]
    fn test_idle_timeout_scales_with_days() {
        let q = query("");
        assert_eq!(idle_timeout(&q), Duration::from_secs(10));
        let q = q.clone().with_range(q.from_ms, q.from_ms + 4 * 86_400_000);
        assert_eq!(idle_timeout(&q), Duration::from_secs(20));
    }

    #[test]
    fn test_parser_across_chunks() {
        let mut p = ResponseParser::new(true);
        assert!(p.feed(b"1 0 WIZ HHZ NZ 10 s4 17092512").unwrap().is_empty());
        assert!(p.header().is_none());
        let s = p.feed(b"00.000 100.0 1 2 -").unwrap();
        assert_eq!(s, vec![1.0, 2.0]);
        let header = p.header().unwrap();
        assert_eq!(header.sps, 100);
        assert_eq!(header.location.as_deref(), Some("10"));
        assert_eq!(header.start_ms(), 1_709_251_200_000);
        assert_eq!(p.feed(b"3 4\n").unwrap(), vec![-3.0, 4.0]);
        assert!(p.finish().unwrap().is_empty());
    }

    #[test]
    fn test_parser_getscn_header_has_no_location() {
        let mut p = ResponseParser::new(false);
        let s = p.feed(b"1 0 WIZ HHZ NZ s4 1709251200.0 50.5 7 ").unwrap();
        assert_eq!(s, vec![7.0]);
        let h = p.header().unwrap();
        assert_eq!(h.location, None);
        assert_eq!(h.sps, 50);
    }

    #[test]
    fn test_parser_rejects_bad_sps() {
        let mut p = ResponseParser::new(false);
        assert!(matches!(
            p.feed(b"1 0 WIZ HHZ NZ s4 1709251200.0 fast "),
            Err(SourceError::Parse(_))
        ));
    }

    fn header(start_secs: f64, sps: u32) -> WinstonHeader {
        WinstonHeader {
            request_id: "1".into(),
            pin: "0".into(),
            station: "WIZ".into(),
            channel: "HHZ".into(),
            network: "NZ".into(),
            location: None,
            data_type: "s4".into(),
            start_secs,
            sps,
        }
    }

    #[test]
    fn test_alignment() {
        let from = 1_000_000;
        // 4 sps: one sample every 250 ms
        let mut a = Alignment::new(from, &header(1000.125, 4));
        assert_eq!(a.pending(), 0);
        assert_eq!(a.apply(vec![1.0]), vec![1.0]);

        // starts 500 ms late: two zeros
        let mut a = Alignment::new(from, &header(1000.5, 4));
        assert_eq!(a.apply(vec![1.0, 2.0]), vec![0.0, 0.0, 1.0, 2.0]);
        assert_eq!(a.apply(vec![3.0]), vec![3.0]);

        // starts 750 ms early: drop three, across batches
        let mut a = Alignment::new(from, &header(999.25, 4));
        assert_eq!(a.apply(vec![1.0, 2.0]), Vec::<f64>::new());
        assert_eq!(a.apply(vec![3.0, 4.0, 5.0]), vec![4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_reader_delivers_metadata_and_samples() {
        let from = 1_709_251_200_000;
        let mock = Builder::new()
            .read(b"1 0 WIZ HHZ NZ 10 s4 1709251200.25 8 ")
            .read(b"5 6 7\n")
            .build();
        let buffer = Arc::new(FlowBuffer::new(FlowLimits::tcp()));
        let (tx, rx) = oneshot::channel();
        read_response(mock, reader(from), Arc::clone(&buffer), tx).await;

        let meta = rx.await.unwrap().unwrap();
        assert_eq!(meta, Metadata::new(8, from));
        assert_eq!(buffer.pop_batch(100).await, vec![0.0, 0.0, 5.0, 6.0, 7.0]);
        assert!(buffer.pop_batch(100).await.is_empty());
    }

    #[tokio::test]
    async fn test_reader_without_header_reports_no_samples() {
        let mock = Builder::new().read(b"1 0 WIZ").build();
        let buffer = Arc::new(FlowBuffer::new(FlowLimits::tcp()));
        let (tx, rx) = oneshot::channel();
        read_response(mock, reader(0), buffer, tx).await;
        match rx.await.unwrap() {
            Err(SourceError::NoData(msg)) => assert_eq!(msg, NO_SAMPLES),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reader_ends_stream_on_bad_token_after_header() {
        let from = 1_709_251_200_000;
        let mock = Builder::new()
            .read(b"1 0 WIZ HHZ NZ 10 s4 1709251200.0 8 1 2 3 ")
            .read(b"oops 5\n")
            .build();
        let buffer = Arc::new(FlowBuffer::new(FlowLimits::tcp()));
        let (tx, rx) = oneshot::channel();
        read_response(mock, reader(from), Arc::clone(&buffer), tx).await;

        assert_eq!(rx.await.unwrap().unwrap(), Metadata::new(8, from));
        assert_eq!(buffer.pop_batch(100).await, vec![1.0, 2.0, 3.0]);
        assert!(buffer.pop_batch(100).await.is_empty());
    }
}

//! SeedLink client.
//!
//! Commands are ASCII lines terminated by CR; the server answers with CRLF
//! lines until `END` switches the connection to 520-byte data frames
//! (`SL` + 6-byte sequence + 512-byte miniSEED record). The literal `END`
//! closes the stream.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::{
    connect_tcp, next_from_feed, DataSource, FlowBuffer, FlowLimits, ReaderTask, RecordFeed,
    SourceError, SourceEvent,
};
use crate::config::{defaults, SourcesConfig};
use crate::mseed::DataRecord;
use crate::types::{format_ms, Metadata, Query};

const END_MARKER: &[u8; 3] = b"END";
const FRAME_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedLinkState {
    TcpDown,
    TcpUp,
    Handshaking,
    Idle,
    WaitingModifierResponse,
    Streaming,
}

/// One data-phase frame.
#[derive(Debug)]
pub enum Frame {
    Record(Vec<u8>),
    Info,
}

/// Command/response state machine over any byte stream.
pub struct SeedLinkSession<S> {
    stream: BufReader<S>,
    state: SeedLinkState,
    response_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SeedLinkSession<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            state: SeedLinkState::TcpUp,
            response_timeout: Duration::from_secs(defaults::SEEDLINK_RESPONSE_TIMEOUT_SECS),
        }
    }

    pub fn state(&self) -> SeedLinkState {
        self.state
    }

    fn transition(&mut self, next: SeedLinkState) {
        debug!(from = ?self.state, to = ?next, "SeedLink state");
        self.state = next;
    }

    fn expect_state(&self, allowed: &[SeedLinkState], command: &str) -> Result<(), SourceError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SourceError::Protocol(format!(
                "cannot send {command} while {:?}",
                self.state
            )))
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), SourceError> {
        info!(command, "SeedLink >");
        let inner = self.stream.get_mut();
        inner.write_all(command.as_bytes()).await?;
        inner.write_all(b"\r").await?;
        inner.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, SourceError> {
        let mut line = String::new();
        let n = tokio::time::timeout(self.response_timeout, self.stream.read_line(&mut line))
            .await
            .map_err(|_| SourceError::Timeout("SeedLink response".into()))??;
        if n == 0 {
            self.transition(SeedLinkState::TcpDown);
            return Err(SourceError::Protocol("connection closed during handshake".into()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// `HELLO`: the server replies with its version and description lines.
    pub async fn hello(&mut self) -> Result<(String, String), SourceError> {
        self.expect_state(&[SeedLinkState::TcpUp, SeedLinkState::Idle], "HELLO")?;
        let previous = self.state;
        self.send("HELLO").await?;
        self.transition(SeedLinkState::Handshaking);
        let greeting = async {
            let version = self.read_line().await?;
            let description = self.read_line().await?;
            Ok::<_, SourceError>((version, description))
        }
        .await;
        match greeting {
            Ok((version, description)) => {
                info!(version = %version, description = %description, "SeedLink server");
                self.transition(SeedLinkState::Idle);
                Ok((version, description))
            }
            Err(e) => {
                self.transition(previous);
                Err(e)
            }
        }
    }

    /// Send a modifier and wait for its `OK`.
    async fn modifier(&mut self, command: &str) -> Result<(), SourceError> {
        self.expect_state(&[SeedLinkState::Idle], command)?;
        self.send(command).await?;
        self.transition(SeedLinkState::WaitingModifierResponse);
        let reply = self.read_line().await;
        if self.state == SeedLinkState::WaitingModifierResponse {
            self.transition(SeedLinkState::Idle);
        }
        match reply?.as_str() {
            "OK" => Ok(()),
            other => Err(SourceError::Protocol(format!("{command} rejected: {other}"))),
        }
    }

    pub async fn station(&mut self, station: &str, network: &str) -> Result<(), SourceError> {
        self.modifier(&format!("STATION {station} {network}")).await
    }

    pub async fn select(&mut self, location: &str, channel: &str) -> Result<(), SourceError> {
        self.modifier(&format!("SELECT {location}{channel}.D")).await
    }

    pub async fn time(&mut self, begin_ms: i64, end_ms: i64) -> Result<(), SourceError> {
        self.modifier(&format!("TIME {} {}", seedlink_time(begin_ms), seedlink_time(end_ms)))
            .await
    }

    pub async fn fetch(&mut self, sequence: u32, begin_ms: i64) -> Result<(), SourceError> {
        self.modifier(&format!("FETCH {sequence} {}", seedlink_time(begin_ms)))
            .await
    }

    /// `END`: no reply, the server starts streaming frames.
    pub async fn end(&mut self) -> Result<(), SourceError> {
        self.expect_state(&[SeedLinkState::Idle], "END")?;
        self.send("END").await?;
        self.transition(SeedLinkState::Streaming);
        Ok(())
    }

    /// Full handshake for a query. Live queries use FETCH, historic ones TIME.
    pub async fn negotiate(&mut self, query: &Query, live: bool) -> Result<(), SourceError> {
        self.hello().await?;
        self.station(&query.station, &query.network).await?;
        self.select(query.location.trim(), &query.component).await?;
        if live {
            self.fetch(0, query.from_ms).await?;
        } else {
            self.time(query.from_ms, query.to_ms).await?;
        }
        self.end().await
    }

    /// Next frame, `None` at the end marker or when the peer closes.
    pub async fn next_frame(&mut self, idle: Duration) -> Result<Option<Frame>, SourceError> {
        self.expect_state(&[SeedLinkState::Streaming], "frame read")?;

        let mut frame = vec![0u8; defaults::SEEDLINK_FRAME_LEN];
        match tokio::time::timeout(idle, self.stream.read_exact(&mut frame[..3])).await {
            Err(_) => return Err(SourceError::Timeout("SeedLink data".into())),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.transition(SeedLinkState::TcpDown);
                return Ok(None);
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }
        if &frame[..3] == END_MARKER {
            self.transition(SeedLinkState::TcpDown);
            return Ok(None);
        }
        if &frame[..2] != b"SL" {
            return Err(SourceError::Protocol(format!(
                "bad frame signature {:?}",
                String::from_utf8_lossy(&frame[..2])
            )));
        }

        match tokio::time::timeout(idle, self.stream.read_exact(&mut frame[3..])).await {
            Err(_) => return Err(SourceError::Timeout("SeedLink data".into())),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.transition(SeedLinkState::TcpDown);
                return Ok(None);
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }

        if &frame[2..6] == b"INFO" {
            return Ok(Some(Frame::Info));
        }
        Ok(Some(Frame::Record(frame.split_off(FRAME_HEADER_LEN))))
    }
}

/// `YYYY,MM,DD,hh,mm,ss` in UTC.
pub fn seedlink_time(ms: i64) -> String {
    format_ms(ms, "%Y,%m,%d,%H,%M,%S")
}

// ============================================================================
// DataSource
// ============================================================================

pub struct SeedLinkSource {
    host: String,
    port: u16,
    feed: Option<RecordFeed>,
}

impl SeedLinkSource {
    pub fn new(config: &SourcesConfig) -> Result<Self, SourceError> {
        let host = config
            .seedlink_server
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or(SourceError::NotConfigured("SeedLink"))?;
        Ok(Self {
            host,
            port: config.seedlink_port,
            feed: None,
        })
    }
}

#[async_trait]
impl DataSource for SeedLinkSource {
    async fn open(&mut self, query: &Query) -> Result<Metadata, SourceError> {
        let stream = connect_tcp(&self.host, self.port).await?;
        let mut session = SeedLinkSession::new(stream);
        session.negotiate(query, query.is_live(Utc::now())).await?;
        info!(query = %query.id(), "SeedLink streaming");

        let buffer = Arc::new(FlowBuffer::new(FlowLimits::tcp()));
        let reader = ReaderTask::spawn(read_frames(session, Arc::clone(&buffer), query.id()));
        let (feed, metadata) =
            RecordFeed::start(buffer, reader, "SeedLink server sent no records").await?;
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
        "SeedLink"
    }
}

pub(crate) async fn read_frames<S>(
    mut session: SeedLinkSession<S>,
    buffer: Arc<FlowBuffer<DataRecord>>,
    query_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let idle = Duration::from_secs(defaults::SEEDLINK_IDLE_TIMEOUT_SECS);
    let (mut records, mut info_frames, mut corrupt) = (0usize, 0usize, 0usize);

    loop {
        match session.next_frame(idle).await {
            Ok(Some(Frame::Record(bytes))) => match DataRecord::parse(&bytes) {
                Ok(record) => {
                    records += 1;
                    buffer.push(record);
                    buffer.wait_for_room().await;
                }
                Err(e) => {
                    corrupt += 1;
                    warn!(query = %query_id, error = %e, "Skipping unparseable SeedLink record");
                }
            },
            Ok(Some(Frame::Info)) => info_frames += 1,
            Ok(None) => break,
            Err(e) => {
                warn!(query = %query_id, error = %e, "SeedLink stream ended early");
                break;
            }
        }
    }

    info!(query = %query_id, records, info_frames, corrupt, "SeedLink download complete");
    buffer.finish();
}

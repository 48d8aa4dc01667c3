//! Local miniSEED replay.
//!
//! Reads concatenated records from files, keeps the ones for the query's
//! channel and yields them in start-time order, exactly like a network
//! record source.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{record_metadata, DataSource, SourceError, SourceEvent};
use crate::config::defaults;
use crate::mseed::{frame_length, DataRecord};
use crate::types::{Metadata, Query};

pub const NO_RECORDS: &str = "No records for this channel in the replay files";

pub struct MseedFileSource {
    paths: Vec<PathBuf>,
    records: VecDeque<DataRecord>,
}

impl MseedFileSource {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            records: VecDeque::new(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Cut a byte buffer into records. Records without blockette 1000 are taken
/// to be 512 bytes long.
pub fn split_records(bytes: &[u8]) -> (Vec<DataRecord>, usize) {
    let mut records = Vec::new();
    let mut corrupt = 0usize;
    let mut offset = 0;

    while offset < bytes.len() {
        let window = &bytes[offset..];
        match DataRecord::parse(window) {
            Ok(record) => {
                offset += record.header().record_len;
                records.push(record);
            }
            Err(e) => {
                corrupt += 1;
                warn!(offset, error = %e, "Skipping unparseable replay record");
                offset += frame_length(window).unwrap_or(defaults::MINISEED_RECORD_LEN);
            }
        }
    }
    (records, corrupt)
}

fn matches_channel(record: &DataRecord, query: &Query) -> bool {
    let h = record.header();
    h.network.trim() == query.network.trim()
        && h.station.trim() == query.station.trim()
        && h.channel.trim() == query.component.trim()
        && h.location.trim() == query.location.trim()
}

async fn read_file(path: &Path) -> Result<Vec<u8>, SourceError> {
    tokio::fs::read(path).await.map_err(|e| {
        SourceError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))
    })
}

#[async_trait]
impl DataSource for MseedFileSource {
    async fn open(&mut self, query: &Query) -> Result<Metadata, SourceError> {
        let mut kept = Vec::new();
        for path in &self.paths {
            let bytes = read_file(path).await?;
            let (records, corrupt) = split_records(&bytes);
            let total = records.len();
            kept.extend(records.into_iter().filter(|r| matches_channel(r, query)));
            info!(
                query = %query.id(),
                file = %path.display(),
                records = total,
                corrupt,
                "Loaded replay file"
            );
        }

        kept.sort_by_key(DataRecord::start_micros);
        info!(query = %query.id(), records = kept.len(), "Replaying records");

        let first = kept
            .first()
            .ok_or_else(|| SourceError::NoData(NO_RECORDS.into()))?;
        let metadata = record_metadata(first)?;
        self.records = kept.into();
        Ok(metadata)
    }

    async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        Ok(match self.records.pop_front() {
            Some(record) => SourceEvent::Record(record),
            None => SourceEvent::Eof,
        })
    }

    fn yields_records(&self) -> bool {
        true
    }

    fn source_name(&self) -> &'static str {
        "miniSEED file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mseed::RecordBuilder;
    use chrono::Utc;
    use std::io::Write;

    #[test]
    fn test_split_mixed_lengths() {
        let small = RecordBuilder::new("NZ", "WIZ", "10", "HHZ").build(0, &[1.0; 5]).unwrap();
        let big = RecordBuilder::new("NZ", "WIZ", "10", "HHZ")
            .record_length_exp(12)
            .build(1_000_000, &[2.0; 5])
            .unwrap();
        let mut bytes = small.clone();
        bytes.extend(&big);
        bytes.extend(&small);

        let (records, corrupt) = split_records(&bytes);
        assert_eq!(corrupt, 0);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].header().record_len, 4096);
    }

    #[test]
    fn test_split_skips_garbage() {
        let good = RecordBuilder::new("NZ", "WIZ", "10", "HHZ").build(0, &[1.0; 5]).unwrap();
        let mut bytes = vec![b'x'; 512];
        bytes.extend(&good);
        let (records, corrupt) = split_records(&bytes);
        assert_eq!(corrupt, 1);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_sorts_and_filters() {
        let builder = RecordBuilder::new("NZ", "WIZ", "10", "HHZ");
        let other = RecordBuilder::new("NZ", "WIZ", "10", "HHN");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&builder.build(2_000_000, &[2.0; 100]).unwrap()).unwrap();
        file.write_all(&other.build(0, &[9.0; 100]).unwrap()).unwrap();
        file.write_all(&builder.build(1_000_000, &[1.0; 100]).unwrap()).unwrap();
        file.flush().unwrap();

        let q = Query::new("NZ", "WIZ", "HHZ", "10", Utc::now()).with_range(0, 3_000);
        let mut source = MseedFileSource::new([file.path()]);
        let meta = source.open(&q).await.unwrap();
        assert_eq!(meta, Metadata::new(100, 1_000));

        let mut starts = Vec::new();
        while let SourceEvent::Record(r) = source.next_event().await.unwrap() {
            starts.push(r.start_micros());
        }
        assert_eq!(starts, vec![1_000_000, 2_000_000]);
    }

    #[tokio::test]
    async fn test_replay_without_matching_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&RecordBuilder::new("NZ", "TOZ", "", "HHZ").build(0, &[1.0]).unwrap())
            .unwrap();
        let q = Query::new("NZ", "WIZ", "HHZ", "", Utc::now());
        let mut source = MseedFileSource::new([file.path()]);
        assert!(matches!(source.open(&q).await, Err(SourceError::NoData(_))));
    }
}

//! Writer for simple INT32 / FLOAT64 miniSEED records.
//!
//! Used to produce replay fixtures. Records carry a big-endian fixed header
//! and a single blockette 1000; data starts at byte 64.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Datelike, Timelike};

use super::Encoding;
use super::record::FIXED_HEADER_LEN;
use super::RecordError;

const DATA_OFFSET: usize = 64;
const DEFAULT_RECORD_EXP: u8 = 9;

#[derive(Debug, Clone)]
pub struct RecordBuilder {
    network: String,
    station: String,
    location: String,
    channel: String,
    sample_rate: u32,
    encoding: Encoding,
    record_exp: u8,
    sequence: u32,
}

impl RecordBuilder {
    pub fn new(network: &str, station: &str, location: &str, channel: &str) -> Self {
        Self {
            network: network.to_string(),
            station: station.to_string(),
            location: location.to_string(),
            channel: channel.to_string(),
            sample_rate: 100,
            encoding: Encoding::Int32,
            record_exp: DEFAULT_RECORD_EXP,
            sequence: 1,
        }
    }

    pub fn sample_rate(mut self, sps: u32) -> Self {
        self.sample_rate = sps.max(1);
        self
    }

    /// `Int32` (default) or `Float64`; other encodings fall back to `Int32`.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = match encoding {
            Encoding::Float64 => Encoding::Float64,
            _ => Encoding::Int32,
        };
        self
    }

    /// Record length as a power of two (8 = 256 bytes .. 16 = 64 KiB).
    pub fn record_length_exp(mut self, exp: u8) -> Self {
        self.record_exp = exp.clamp(8, 16);
        self
    }

    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence % 1_000_000;
        self
    }

    fn record_len(&self) -> usize {
        1usize << self.record_exp
    }

    /// Samples that fit in one record.
    pub fn capacity(&self) -> usize {
        let width = self.encoding.sample_width().unwrap_or(4);
        (self.record_len() - DATA_OFFSET) / width
    }

    /// Encode one record starting at `start_micros`.
    pub fn build(&self, start_micros: i64, samples: &[f64]) -> Result<Vec<u8>, RecordError> {
        if samples.len() > self.capacity() {
            return Err(RecordError::BadHeader(format!(
                "{} samples exceed record capacity {}",
                samples.len(),
                self.capacity()
            )));
        }

        let mut payload = Vec::with_capacity(samples.len() * 8);
        for s in samples {
            match self.encoding {
                Encoding::Float64 => payload.extend_from_slice(&s.to_be_bytes()),
                _ => payload.extend_from_slice(&(s.round() as i32).to_be_bytes()),
            }
        }
        self.build_with_payload(start_micros, samples.len(), self.encoding, &payload)
    }

    /// Split `samples` into as many contiguous records as needed.
    pub fn build_series(&self, start_micros: i64, samples: &[f64]) -> Result<Vec<Vec<u8>>, RecordError> {
        let per_record = self.capacity();
        let mut records = Vec::new();
        let mut builder = self.clone();
        for (i, chunk) in samples.chunks(per_record).enumerate() {
            let offset = (i * per_record) as i64 * 1_000_000 / i64::from(self.sample_rate);
            records.push(builder.build(start_micros + offset, chunk)?);
            builder.sequence = (builder.sequence + 1) % 1_000_000;
        }
        Ok(records)
    }

    /// Wrap an already encoded payload, e.g. text or hand-assembled frames.
    pub fn build_with_payload(
        &self,
        start_micros: i64,
        num_samples: usize,
        encoding: Encoding,
        payload: &[u8],
    ) -> Result<Vec<u8>, RecordError> {
        let record_len = self.record_len();
        if DATA_OFFSET + payload.len() > record_len {
            return Err(RecordError::BadHeader(format!(
                "payload of {} bytes exceeds record length {record_len}",
                payload.len()
            )));
        }
        let num_samples = u16::try_from(num_samples)
            .map_err(|_| RecordError::BadHeader(format!("{num_samples} samples")))?;

        let time = DateTime::from_timestamp_micros(start_micros)
            .ok_or_else(|| RecordError::BadHeader(format!("start time {start_micros}")))?;

        let mut b = vec![0u8; record_len];
        b[0..6].copy_from_slice(format!("{:06}", self.sequence).as_bytes());
        b[6] = b'D';
        b[7] = b' ';
        write_padded(&mut b[8..13], &self.station);
        write_padded(&mut b[13..15], &self.location);
        write_padded(&mut b[15..18], &self.channel);
        write_padded(&mut b[18..20], &self.network);

        BigEndian::write_u16(&mut b[20..22], time.year() as u16);
        BigEndian::write_u16(&mut b[22..24], time.ordinal() as u16);
        b[24] = time.hour() as u8;
        b[25] = time.minute() as u8;
        b[26] = time.second() as u8;
        BigEndian::write_u16(&mut b[28..30], (time.timestamp_subsec_micros() / 100) as u16);

        BigEndian::write_u16(&mut b[30..32], num_samples);
        BigEndian::write_i16(&mut b[32..34], self.sample_rate.min(i16::MAX as u32) as i16);
        BigEndian::write_i16(&mut b[34..36], 1);
        b[39] = 1;
        BigEndian::write_u16(&mut b[44..46], DATA_OFFSET as u16);
        BigEndian::write_u16(&mut b[46..48], FIXED_HEADER_LEN as u16);

        // Blockette 1000
        let at = FIXED_HEADER_LEN;
        BigEndian::write_u16(&mut b[at..at + 2], 1000);
        BigEndian::write_u16(&mut b[at + 2..at + 4], 0);
        b[at + 4] = encoding.code();
        b[at + 5] = 1;
        b[at + 6] = self.record_exp;

        b[DATA_OFFSET..DATA_OFFSET + payload.len()].copy_from_slice(payload);
        Ok(b)
    }
}

fn write_padded(dst: &mut [u8], value: &str) {
    dst.fill(b' ');
    for (d, s) in dst.iter_mut().zip(value.bytes()) {
        *d = s;
    }
}

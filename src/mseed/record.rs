//! miniSEED (SEED 2.x) records.
//!
//! Framing (byte order, blockette 1000 record length and encoding) is
//! checked here so that only well-formed records reach libmseed. Header
//! fields and samples come from `miniseed::ms_record`.

use std::os::raw::c_char;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use miniseed::ms_record;

use super::{Encoding, RecordError};
use crate::config::defaults;

pub const FIXED_HEADER_LEN: usize = 48;

/// Blockette chains longer than this are treated as corrupt.
const MAX_BLOCKETTES: usize = 32;

/// Header fields the pipeline uses, as libmseed reports them.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub sequence: u32,
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    /// Epoch microseconds of the first sample, corrections applied.
    pub start_micros: i64,
    pub num_samples: usize,
    pub sample_rate: f64,
    pub record_len: usize,
}

/// One decoded miniSEED record.
///
/// A record whose payload could not be unpacked still parses; `decode`
/// reports the failure so the caller can substitute zeros.
#[derive(Debug, Clone)]
pub struct DataRecord {
    header: RecordHeader,
    samples: Result<Vec<f64>, RecordError>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    record_len: usize,
    encoding: Encoding,
}

impl DataRecord {
    /// Parse one record from the front of `bytes`.
    ///
    /// The record length comes from blockette 1000; without one the record
    /// is taken to be 512 bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        let frame = frame(bytes)?;
        if bytes.len() < frame.record_len {
            return Err(RecordError::Truncated {
                needed: frame.record_len,
                got: bytes.len(),
            });
        }
        if !frame.encoding.is_decodable() {
            return Err(RecordError::UnsupportedEncoding(frame.encoding.code()));
        }

        let msr = ms_record::parse(&bytes[..frame.record_len]);
        let m = msr.ptr();

        let header = RecordHeader {
            sequence: u32::try_from(m.sequence_number).unwrap_or(0),
            network: c_field(&m.network),
            station: c_field(&m.station),
            location: c_field(&m.location),
            channel: c_field(&m.channel),
            start_micros: m.starttime,
            num_samples: usize::try_from(m.samplecnt).unwrap_or(0),
            sample_rate: m.samprate,
            record_len: frame.record_len,
        };

        let decoded = usize::try_from(m.numsamples).unwrap_or(0);
        let sample_type = char::from(m.sampletype as u8);
        let samples = if header.num_samples == 0 {
            Ok(Vec::new())
        } else if !matches!(sample_type, 'i' | 'f' | 'd') {
            Err(RecordError::NotNumeric(sample_type))
        } else if decoded != header.num_samples || m.datasamples.is_null() {
            Err(RecordError::ShortDecode {
                decoded,
                expected: header.num_samples,
            })
        } else {
            Ok(copy_samples(m.datasamples.cast_const().cast(), decoded, sample_type))
        };

        Ok(Self { header, samples })
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn location(&self) -> &str {
        &self.header.location
    }

    pub fn num_samples(&self) -> usize {
        self.header.num_samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.header.sample_rate
    }

    pub fn start_micros(&self) -> i64 {
        self.header.start_micros
    }

    pub fn start_ms(&self) -> i64 {
        self.header.start_micros.div_euclid(1_000)
    }

    /// Offset of sample `n` from the record start, in microseconds.
    fn offset_micros(&self, n: usize) -> i64 {
        if self.header.sample_rate > 0.0 {
            (n as f64 * 1_000_000.0 / self.header.sample_rate).round() as i64
        } else {
            0
        }
    }

    /// Time of the last sample in the record.
    pub fn last_sample_micros(&self) -> i64 {
        self.header.start_micros + self.offset_micros(self.header.num_samples.saturating_sub(1))
    }

    /// Where the next contiguous record should begin.
    pub fn predicted_next_start_micros(&self) -> i64 {
        self.header.start_micros + self.offset_micros(self.header.num_samples)
    }

    /// Samples of the record, or why they could not be unpacked.
    pub fn decode(&self) -> Result<Vec<f64>, RecordError> {
        self.samples.clone()
    }
}

/// Length of the record at the front of `bytes`, from its header alone.
pub fn frame_length(bytes: &[u8]) -> Result<usize, RecordError> {
    frame(bytes).map(|f| f.record_len)
}

#[allow(unsafe_code)]
fn copy_samples(data: *const u8, count: usize, sample_type: char) -> Vec<f64> {
    // SAFETY: libmseed unpacked `count` samples of `sample_type` at `data`,
    // and the owning record outlives this call.
    unsafe {
        match sample_type {
            'i' => std::slice::from_raw_parts(data.cast::<i32>(), count)
                .iter()
                .map(|&v| f64::from(v))
                .collect(),
            'f' => std::slice::from_raw_parts(data.cast::<f32>(), count)
                .iter()
                .map(|&v| f64::from(v))
                .collect(),
            _ => std::slice::from_raw_parts(data.cast::<f64>(), count).to_vec(),
        }
    }
}

fn c_field(raw: &[c_char]) -> String {
    raw.iter()
        .take_while(|&&c| c != 0)
        .map(|&c| char::from(c as u8))
        .collect::<String>()
        .trim()
        .to_string()
}

fn frame(bytes: &[u8]) -> Result<Frame, RecordError> {
    if bytes.len() < FIXED_HEADER_LEN {
        return Err(RecordError::Truncated {
            needed: FIXED_HEADER_LEN,
            got: bytes.len(),
        });
    }
    if plausible_start::<BigEndian>(bytes) {
        frame_with::<BigEndian>(bytes)
    } else if plausible_start::<LittleEndian>(bytes) {
        frame_with::<LittleEndian>(bytes)
    } else {
        Err(RecordError::BadHeader("no plausible start time in either byte order".into()))
    }
}

/// SEED allows either byte order; a valid BTIME identifies it.
fn plausible_start<E: ByteOrder>(b: &[u8]) -> bool {
    let year = E::read_u16(&b[20..22]);
    let day = E::read_u16(&b[22..24]);
    (1900..=2100).contains(&year) && (1..=366).contains(&day) && b[24] < 24 && b[25] < 60 && b[26] <= 60
}

fn frame_with<E: ByteOrder>(b: &[u8]) -> Result<Frame, RecordError> {
    let num_samples = E::read_u16(&b[30..32]);
    let data_offset = usize::from(E::read_u16(&b[44..46]));
    let mut next = usize::from(E::read_u16(&b[46..48]));

    let mut frame = Frame {
        record_len: defaults::MINISEED_RECORD_LEN,
        encoding: Encoding::Steim1,
    };
    let mut seen = 0;
    while next >= FIXED_HEADER_LEN && next + 8 <= b.len() {
        seen += 1;
        if seen > MAX_BLOCKETTES {
            return Err(RecordError::BadHeader("blockette chain does not terminate".into()));
        }
        let at = next;
        if E::read_u16(&b[at..at + 2]) == 1000 {
            let exp = b[at + 6];
            if !(7..=20).contains(&exp) {
                return Err(RecordError::BadHeader(format!("record length 2^{exp}")));
            }
            frame.encoding = Encoding::from_code(b[at + 4]);
            frame.record_len = 1usize << exp;
            break;
        }
        let following = usize::from(E::read_u16(&b[at + 2..at + 4]));
        if following <= at {
            break;
        }
        next = following;
    }

    if num_samples > 0 && (data_offset < FIXED_HEADER_LEN || data_offset >= frame.record_len) {
        return Err(RecordError::BadHeader(format!(
            "data offset {data_offset} outside record of {} bytes",
            frame.record_len
        )));
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mseed::RecordBuilder;

    const T0: i64 = 1_709_251_200_000_000; // 2024-03-01T00:00:00Z

    #[test]
    fn test_parse_built_record() {
        let samples: Vec<f64> = (0..100).map(f64::from).collect();
        let bytes = RecordBuilder::new("NZ", "WIZ", "10", "HHZ")
            .sample_rate(100)
            .sequence(42)
            .build(T0 + 250_000, &samples)
            .unwrap();
        assert_eq!(bytes.len(), 512);

        let record = DataRecord::parse(&bytes).unwrap();
        let h = record.header();
        assert_eq!(h.sequence, 42);
        assert_eq!(h.network, "NZ");
        assert_eq!(h.station, "WIZ");
        assert_eq!(h.location, "10");
        assert_eq!(h.channel, "HHZ");
        assert_eq!(h.record_len, 512);
        assert_eq!(record.num_samples(), 100);
        assert_eq!(record.sample_rate(), 100.0);
        assert_eq!(record.start_micros(), T0 + 250_000);
        assert_eq!(record.start_ms(), (T0 + 250_000) / 1_000);
        assert_eq!(record.last_sample_micros(), T0 + 250_000 + 990_000);
        assert_eq!(record.predicted_next_start_micros(), T0 + 1_250_000);
        assert_eq!(record.decode().unwrap(), samples);
    }

    #[test]
    fn test_float64_payload_round_trips_fractions() {
        let samples = [0.25, -1.5, 1e6 + 0.125];
        let bytes = RecordBuilder::new("NZ", "WIZ", "", "HHZ")
            .encoding(Encoding::Float64)
            .build(T0, &samples)
            .unwrap();
        assert_eq!(DataRecord::parse(&bytes).unwrap().decode().unwrap(), samples);
    }

    #[test]
    fn test_time_correction_applied_unless_flagged() {
        let mut bytes = RecordBuilder::new("NZ", "WIZ", "", "HHZ")
            .build(T0, &[1.0, 2.0])
            .unwrap();
        // +0.5 s correction
        bytes[40..44].copy_from_slice(&5_000i32.to_be_bytes());
        let record = DataRecord::parse(&bytes).unwrap();
        assert_eq!(record.start_micros(), T0 + 500_000);

        // activity flag bit 1: correction already applied
        bytes[36] |= 0x02;
        let record = DataRecord::parse(&bytes).unwrap();
        assert_eq!(record.start_micros(), T0);
    }

    #[test]
    fn test_short_input_is_truncated() {
        assert!(matches!(
            DataRecord::parse(&[0u8; 20]),
            Err(RecordError::Truncated { needed: 48, got: 20 })
        ));

        let bytes = RecordBuilder::new("NZ", "WIZ", "", "HHZ")
            .build(T0, &[1.0])
            .unwrap();
        assert!(matches!(
            DataRecord::parse(&bytes[..300]),
            Err(RecordError::Truncated { needed: 512, .. })
        ));
    }

    #[test]
    fn test_garbage_header_is_rejected() {
        let mut bytes = vec![0u8; 512];
        bytes[..6].copy_from_slice(b"000001");
        assert!(matches!(
            DataRecord::parse(&bytes),
            Err(RecordError::BadHeader(_))
        ));
    }

    #[test]
    fn test_unknown_encoding_never_reaches_decoder() {
        let bytes = RecordBuilder::new("NZ", "WIZ", "", "HHZ")
            .build_with_payload(T0, 20, Encoding::Other(99), &[0u8; 16])
            .unwrap();
        assert!(matches!(
            DataRecord::parse(&bytes),
            Err(RecordError::UnsupportedEncoding(99))
        ));
    }

    #[test]
    fn test_text_record_parses_but_does_not_decode() {
        let bytes = RecordBuilder::new("NZ", "WIZ", "", "LOG")
            .build_with_payload(T0, 16, Encoding::Ascii, b"station restart.")
            .unwrap();
        let record = DataRecord::parse(&bytes).unwrap();
        assert_eq!(record.num_samples(), 16);
        assert!(matches!(record.decode(), Err(RecordError::NotNumeric('a'))));
    }

    #[test]
    fn test_frame_length_reads_blockette_1000() {
        let bytes = RecordBuilder::new("NZ", "WIZ", "", "HHZ")
            .record_length_exp(12)
            .build(T0, &[1.0, 2.0, 3.0])
            .unwrap();
        assert_eq!(frame_length(&bytes[..64]).unwrap(), 4096);
    }
}

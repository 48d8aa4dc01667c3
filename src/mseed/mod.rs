//! miniSEED records
//!
//! - `DataRecord`: one record framed from a byte stream and decoded through
//!   libmseed (`miniseed` crate)
//! - `RecordBuilder`: INT32/FLOAT64 record writer for replay fixtures

mod builder;
mod record;

pub use builder::RecordBuilder;
pub use record::{frame_length, DataRecord, RecordHeader, FIXED_HEADER_LEN};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("bad record header: {0}")]
    BadHeader(String),

    #[error("unsupported data encoding {0}")]
    UnsupportedEncoding(u8),

    #[error("record carries no numeric samples (sample type '{0}')")]
    NotNumeric(char),

    #[error("decoded {decoded} of {expected} samples")]
    ShortDecode { decoded: usize, expected: usize },
}

/// SEED data encoding codes (blockette 1000, field 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Int16,
    Int32,
    Float32,
    Float64,
    Steim1,
    Steim2,
    Other(u8),
}

impl Encoding {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ascii,
            1 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Float32,
            5 => Self::Float64,
            10 => Self::Steim1,
            11 => Self::Steim2,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Ascii => 0,
            Self::Int16 => 1,
            Self::Int32 => 3,
            Self::Float32 => 4,
            Self::Float64 => 5,
            Self::Steim1 => 10,
            Self::Steim2 => 11,
            Self::Other(c) => c,
        }
    }

    /// Encodings libmseed can unpack. Anything else is refused before the
    /// record reaches the decoder.
    pub fn is_decodable(self) -> bool {
        match self {
            Self::Other(code) => matches!(code, 14 | 16 | 30 | 31 | 32 | 33),
            _ => true,
        }
    }

    /// Bytes per sample for fixed-width encodings.
    pub fn sample_width(self) -> Option<usize> {
        match self {
            Self::Ascii => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Float64 => Some(8),
            _ => None,
        }
    }
}

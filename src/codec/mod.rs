// src/codec/mod.rs
//! Delta compression codec for acquisition sample batches

mod delta;
mod varint;

pub use delta::{compress, compress_with_stats, decompress, validate_samples, CompressionStats};
pub use varint::{decode_varint, encode_varint, zigzag_decode, zigzag_encode};

use std::fmt;

/// Parse and encode errors of the delta codec
#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended inside a value
    UnexpectedEof,
    /// Varint wider than 64 bits
    VarintOverflow,
    /// A delta too large to share the byte stream with the run marker
    DeltaOverflow,
    /// Run with a declared length of zero
    InvalidRun,
    /// Name or unit bytes are not valid UTF-8
    InvalidString,
    /// Change flag byte other than 0 or 1
    InvalidFlag(u8),
    /// Reconstructed register address outside u8
    AddressRange(i64),
    /// Reconstructed raw value outside i32
    RawValueRange(i64),
    /// Delta array length disagrees with the sample count
    ArrayLength {
        array: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnexpectedEof => write!(f, "Unexpected end of input"),
            CodecError::VarintOverflow => write!(f, "Varint exceeds 64 bits"),
            CodecError::DeltaOverflow => write!(f, "Delta magnitude collides with run marker"),
            CodecError::InvalidRun => write!(f, "Run length of zero"),
            CodecError::InvalidString => write!(f, "String field is not valid UTF-8"),
            CodecError::InvalidFlag(byte) => write!(f, "Invalid change flag byte: {}", byte),
            CodecError::AddressRange(value) => {
                write!(f, "Register address {} outside u8 range", value)
            }
            CodecError::RawValueRange(value) => {
                write!(f, "Raw value {} outside i32 range", value)
            }
            CodecError::ArrayLength {
                array,
                expected,
                actual,
            } => write!(
                f,
                "Delta array '{}' has {} entries, expected {}",
                array, actual, expected
            ),
        }
    }
}

impl std::error::Error for CodecError {}

//! Codec error types

use thiserror::Error;

/// Errors produced by register/value conversions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Register count is not a supported value width
    #[error("Unsupported register width: {0} words (must be 1, 2 or 4)")]
    UnsupportedWidth(usize),

    /// Value does not fit the target register width
    #[error("Value {value} out of range for {width_bits}-bit {signedness} encoding")]
    ValueOutOfRange {
        value: f64,
        width_bits: u8,
        signedness: &'static str,
    },

    /// Text does not fit the declared register span
    #[error("Text of {len} bytes exceeds {capacity} bytes ({registers} registers)")]
    TextTooLong {
        len: usize,
        capacity: usize,
        registers: usize,
    },

    /// Text contains bytes outside the ASCII range
    #[error("Text is not ASCII: {0:?}")]
    NotAscii(String),
}

impl CodecError {
    pub fn out_of_range(value: f64, width_bits: u8, signed: bool) -> Self {
        CodecError::ValueOutOfRange {
            value,
            width_bits,
            signedness: if signed { "signed" } else { "unsigned" },
        }
    }
}

//! Register-word codec for the FluxEMS edge runtime
//!
//! Pure, symmetric conversions between flat sequences of 16-bit register
//! words and typed engineering values: word ordering, two's-complement and
//! IEEE-754 interpretation, fixed-point scale factors, bit fields, and
//! fixed-length ASCII text.
//!
//! Every conversion is total over well-formed inputs; malformed word counts
//! are rejected with [`CodecError::UnsupportedWidth`] so that callers can
//! turn them into configuration errors at bind time instead of runtime
//! surprises. Encoding a value that does not fit its target width is a hard
//! [`CodecError::ValueOutOfRange`], never a silent truncation.
//!
//! # Scale factor convention
//!
//! All scaling in this workspace follows one direction:
//!
//! ```text
//! engineering = raw * 10^scale
//! raw         = round(engineering / 10^scale)
//! ```
//!
//! A register holding `150` with scale `1` therefore reads as `1500`.

mod bit_ops;
mod conversions;
mod error;
mod scale;
mod text;
mod word_order;

pub use bit_ops::{set_word_bit, word_bit, word_bits};
pub use conversions::{
    decode_float, decode_integer, encode_float, encode_integer, regs_to_f32, regs_to_f64,
    regs_to_i16, regs_to_i32, regs_to_i64, regs_to_u16, regs_to_u32, regs_to_u64, u32_to_regs,
    u64_to_regs, words_to_bytes,
};
pub use error::CodecError;
pub use scale::{apply_scale, remove_scale};
pub use text::{decode_text, encode_text};
pub use word_order::WordOrder;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

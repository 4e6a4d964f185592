//! Numeric register conversions with word order support
//!
//! Converts between register arrays (`&[u16]`) and numeric types for the
//! supported widths of 1, 2 and 4 words. The word-level building block is
//! [`words_to_bytes`]; the typed wrappers interpret the resulting byte
//! buffer as two's-complement integers or IEEE-754 floats.

use crate::error::CodecError;
use crate::word_order::WordOrder;
use crate::Result;

// ============================================================================
// Word <-> byte buffers
// ============================================================================

/// Concatenate register words into a big-endian byte buffer per `order`
///
/// With `MswLsw` the words are used as transferred; with `LswMsw` the word
/// sequence is reversed first. Bytes inside each word stay big-endian.
pub fn words_to_bytes(words: &[u16], order: WordOrder) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    match order {
        WordOrder::MswLsw => {
            for w in words {
                bytes.extend_from_slice(&w.to_be_bytes());
            }
        }
        WordOrder::LswMsw => {
            for w in words.iter().rev() {
                bytes.extend_from_slice(&w.to_be_bytes());
            }
        }
    }
    bytes
}

fn bytes_to_words(bytes: &[u8], order: WordOrder) -> Vec<u16> {
    let mut words: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    if order == WordOrder::LswMsw {
        words.reverse();
    }
    words
}

// ============================================================================
// Typed decode helpers
// ============================================================================

/// Decode a single register as u16
pub fn regs_to_u16(regs: &[u16; 1]) -> u16 {
    regs[0]
}

/// Decode a single register as i16
pub fn regs_to_i16(regs: &[u16; 1]) -> i16 {
    regs[0] as i16
}

/// Decode 2 registers as u32
pub fn regs_to_u32(regs: &[u16; 2], order: WordOrder) -> u32 {
    let b = words_to_bytes(regs, order);
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Decode 2 registers as i32
pub fn regs_to_i32(regs: &[u16; 2], order: WordOrder) -> i32 {
    regs_to_u32(regs, order) as i32
}

/// Decode 2 registers as IEEE-754 f32
pub fn regs_to_f32(regs: &[u16; 2], order: WordOrder) -> f32 {
    f32::from_bits(regs_to_u32(regs, order))
}

/// Decode 4 registers as u64
pub fn regs_to_u64(regs: &[u16; 4], order: WordOrder) -> u64 {
    let b = words_to_bytes(regs, order);
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Decode 4 registers as i64
pub fn regs_to_i64(regs: &[u16; 4], order: WordOrder) -> i64 {
    regs_to_u64(regs, order) as i64
}

/// Decode 4 registers as IEEE-754 f64
pub fn regs_to_f64(regs: &[u16; 4], order: WordOrder) -> f64 {
    f64::from_bits(regs_to_u64(regs, order))
}

/// Encode a u32 into 2 registers
pub fn u32_to_regs(value: u32, order: WordOrder) -> [u16; 2] {
    let words = bytes_to_words(&value.to_be_bytes(), order);
    [words[0], words[1]]
}

/// Encode a u64 into 4 registers
pub fn u64_to_regs(value: u64, order: WordOrder) -> [u16; 4] {
    let words = bytes_to_words(&value.to_be_bytes(), order);
    [words[0], words[1], words[2], words[3]]
}

// ============================================================================
// Width-generic decode/encode
// ============================================================================

/// Decode a register run as a two's-complement integer
///
/// Supported widths are 1, 2 and 4 words. Unsigned 64-bit raws above
/// `i64::MAX` cannot be represented and wrap; callers that care clamp at a
/// higher layer.
pub fn decode_integer(words: &[u16], order: WordOrder, signed: bool) -> Result<i64> {
    match (words.len(), signed) {
        (1, false) => Ok(i64::from(words[0])),
        (1, true) => Ok(i64::from(words[0] as i16)),
        (2, false) => Ok(i64::from(regs_to_u32(&[words[0], words[1]], order))),
        (2, true) => Ok(i64::from(regs_to_i32(&[words[0], words[1]], order))),
        (4, _) => Ok(regs_to_i64(
            &[words[0], words[1], words[2], words[3]],
            order,
        )),
        (n, _) => Err(CodecError::UnsupportedWidth(n)),
    }
}

/// Decode a register run as an IEEE-754 float (f32 for 2 words, f64 for 4)
pub fn decode_float(words: &[u16], order: WordOrder) -> Result<f64> {
    match words.len() {
        2 => Ok(f64::from(regs_to_f32(&[words[0], words[1]], order))),
        4 => Ok(regs_to_f64(
            &[words[0], words[1], words[2], words[3]],
            order,
        )),
        n => Err(CodecError::UnsupportedWidth(n)),
    }
}

/// Encode an integer into a register run, range-checked against the width
///
/// A value outside the representable range of the target width and
/// signedness is a hard error, never truncated.
pub fn encode_integer(
    value: i64,
    register_count: usize,
    order: WordOrder,
    signed: bool,
) -> Result<Vec<u16>> {
    let in_range = match (register_count, signed) {
        (1, false) => value >= 0 && value <= i64::from(u16::MAX),
        (1, true) => value >= i64::from(i16::MIN) && value <= i64::from(i16::MAX),
        (2, false) => value >= 0 && value <= i64::from(u32::MAX),
        (2, true) => value >= i64::from(i32::MIN) && value <= i64::from(i32::MAX),
        (4, _) => true,
        (n, _) => return Err(CodecError::UnsupportedWidth(n)),
    };
    if !in_range {
        return Err(CodecError::out_of_range(
            value as f64,
            (register_count * 16) as u8,
            signed,
        ));
    }

    Ok(match register_count {
        1 => vec![value as u16],
        2 => u32_to_regs(value as u32, order).to_vec(),
        _ => u64_to_regs(value as u64, order).to_vec(),
    })
}

/// Encode a float into a register run (f32 for 2 words, f64 for 4)
///
/// Finite values outside the f32 range are rejected rather than squashed
/// to infinity.
pub fn encode_float(value: f64, register_count: usize, order: WordOrder) -> Result<Vec<u16>> {
    match register_count {
        2 => {
            if value.is_finite() && value.abs() > f64::from(f32::MAX) {
                return Err(CodecError::out_of_range(value, 32, true));
            }
            Ok(u32_to_regs((value as f32).to_bits(), order).to_vec())
        }
        4 => Ok(u64_to_regs(value.to_bits(), order).to_vec()),
        n => Err(CodecError::UnsupportedWidth(n)),
    }
}

//! Fixed-length ASCII text codec
//!
//! Device name plates and firmware strings arrive as fixed register runs,
//! two ASCII bytes per word, NUL padded. Decoding stops at the first NUL
//! and trims trailing blanks; encoding pads with NUL up to the declared
//! span and rejects oversize or non-ASCII input.

use crate::error::CodecError;
use crate::word_order::WordOrder;
use crate::words_to_bytes;
use crate::Result;

/// Decode a fixed-length register run as ASCII text
pub fn decode_text(words: &[u16]) -> String {
    let bytes = words_to_bytes(words, WordOrder::MswLsw);
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text: String = bytes[..end]
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect();
    text.trim_end().to_string()
}

/// Encode text into a fixed-length register run, NUL padded
pub fn encode_text(text: &str, register_count: usize) -> Result<Vec<u16>> {
    if !text.is_ascii() {
        return Err(CodecError::NotAscii(text.to_string()));
    }
    let capacity = register_count * 2;
    if text.len() > capacity {
        return Err(CodecError::TextTooLong {
            len: text.len(),
            capacity,
            registers: register_count,
        });
    }

    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(capacity, 0);
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let words = encode_text("SN-0042", 8).unwrap();
        assert_eq!(words.len(), 8);
        assert_eq!(decode_text(&words), "SN-0042");
    }

    #[test]
    fn test_decode_stops_at_nul_and_trims() {
        // "AB " followed by NUL then garbage
        let words = [0x4142, 0x2000, 0x5858];
        assert_eq!(decode_text(&words), "AB");
    }

    #[test]
    fn test_encode_too_long() {
        assert!(matches!(
            encode_text("TOOLONG", 2),
            Err(CodecError::TextTooLong { .. })
        ));
    }

    #[test]
    fn test_encode_non_ascii() {
        assert!(matches!(
            encode_text("näme", 4),
            Err(CodecError::NotAscii(_))
        ));
    }
}

//! Modbus PDU construction and parsing
//!
//! Fixed-size stack buffer, no heap allocation on the request path.

use super::{
    exception_description, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
use crate::bus::{BusError, BusResult};

/// Modbus protocol data unit with a stack-allocated buffer
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from received bytes
    pub fn from_slice(data: &[u8]) -> BusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(BusError::Protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> BusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(BusError::Protocol("PDU buffer full".to_string()));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push a u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> BusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    /// Get the data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte)
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Whether this is an exception response (function code high bit set)
    pub fn is_exception(&self) -> bool {
        self.function_code().is_some_and(|fc| fc & 0x80 != 0)
    }

    /// Exception code of an exception response
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(1).copied()
        } else {
            None
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Request builders
// ============================================================================

/// Build an FC03 read holding registers request
pub fn build_read_request(start: u16, count: u16) -> BusResult<ModbusPdu> {
    if count == 0 || count > MAX_READ_REGISTERS {
        return Err(BusError::Protocol(format!(
            "Invalid register count for FC03: {count}"
        )));
    }
    let mut pdu = ModbusPdu::new();
    pdu.push(FC_READ_HOLDING_REGISTERS)?;
    pdu.push_u16(start)?;
    pdu.push_u16(count)?;
    Ok(pdu)
}

/// Build an FC06 write single register request
pub fn build_write_single_request(address: u16, value: u16) -> BusResult<ModbusPdu> {
    let mut pdu = ModbusPdu::new();
    pdu.push(FC_WRITE_SINGLE_REGISTER)?;
    pdu.push_u16(address)?;
    pdu.push_u16(value)?;
    Ok(pdu)
}

/// Build an FC16 write multiple registers request
pub fn build_write_multiple_request(start: u16, values: &[u16]) -> BusResult<ModbusPdu> {
    if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
        return Err(BusError::Protocol(format!(
            "Invalid register count for FC16: {}",
            values.len()
        )));
    }
    let mut pdu = ModbusPdu::new();
    pdu.push(FC_WRITE_MULTIPLE_REGISTERS)?;
    pdu.push_u16(start)?;
    pdu.push_u16(values.len() as u16)?;
    pdu.push((values.len() * 2) as u8)?;
    for &value in values {
        pdu.push_u16(value)?;
    }
    Ok(pdu)
}

// ============================================================================
// Response parsing
// ============================================================================

fn check_response(pdu: &ModbusPdu, expected_fc: u8) -> BusResult<()> {
    if pdu.is_empty() {
        return Err(BusError::Protocol("Empty response PDU".to_string()));
    }
    if pdu.is_exception() {
        let code = pdu.exception_code().unwrap_or(0);
        return Err(BusError::Protocol(format!(
            "Modbus exception {:02X}: {}",
            code,
            exception_description(code)
        )));
    }
    match pdu.function_code() {
        Some(fc) if fc == expected_fc => Ok(()),
        Some(fc) => Err(BusError::Protocol(format!(
            "Function code mismatch: expected {expected_fc:02X}, got {fc:02X}"
        ))),
        None => Err(BusError::Protocol("Empty response PDU".to_string())),
    }
}

/// Parse an FC03 response into register words
pub fn parse_read_response(pdu: &ModbusPdu, expected_count: u16) -> BusResult<Vec<u16>> {
    check_response(pdu, FC_READ_HOLDING_REGISTERS)?;
    let data = pdu.as_slice();
    if data.len() < 2 {
        return Err(BusError::Protocol("Truncated FC03 response".to_string()));
    }
    let byte_count = data[1] as usize;
    let payload = &data[2..];
    if payload.len() != byte_count || byte_count != expected_count as usize * 2 {
        return Err(BusError::Protocol(format!(
            "FC03 byte count mismatch: header {}, payload {}, expected {}",
            byte_count,
            payload.len(),
            expected_count * 2
        )));
    }
    Ok(payload
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// Parse an FC06/FC16 write response; a matching function code means success
pub fn parse_write_response(pdu: &ModbusPdu, expected_fc: u8) -> BusResult<()> {
    check_response(pdu, expected_fc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_layout() {
        let pdu = build_read_request(0x1000, 4).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x10, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn test_read_request_bounds() {
        assert!(build_read_request(0, 0).is_err());
        assert!(build_read_request(0, MAX_READ_REGISTERS + 1).is_err());
    }

    #[test]
    fn test_write_multiple_layout() {
        let pdu = build_write_multiple_request(0x0002, &[0x000A, 0x0102]).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x10, 0x00, 0x02, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_parse_read_response() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x04, 0x12, 0x34, 0x56, 0x78]).unwrap();
        let words = parse_read_response(&pdu, 2).unwrap();
        assert_eq!(words, vec![0x1234, 0x5678]);
    }

    #[test]
    fn test_parse_read_response_count_mismatch() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x02, 0x12, 0x34]).unwrap();
        assert!(parse_read_response(&pdu, 2).is_err());
    }

    #[test]
    fn test_exception_response() {
        let pdu = ModbusPdu::from_slice(&[0x83, 0x02]).unwrap();
        assert!(pdu.is_exception());
        let err = parse_read_response(&pdu, 1).unwrap_err();
        assert!(err.to_string().contains("Illegal data address"));
    }

    #[test]
    fn test_write_response_roundtrip() {
        let pdu = ModbusPdu::from_slice(&[0x10, 0x00, 0x02, 0x00, 0x02]).unwrap();
        assert!(parse_write_response(&pdu, FC_WRITE_MULTIPLE_REGISTERS).is_ok());
        assert!(parse_write_response(&pdu, FC_WRITE_SINGLE_REGISTER).is_err());
    }
}

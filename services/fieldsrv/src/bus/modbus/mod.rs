//! Modbus reference binding for the register bus
//!
//! Implements the subset of Modbus the bridge needs: FC03 (read holding
//! registers), FC06 (write single register) and FC16 (write multiple
//! registers), framed for TCP with the MBAP header.

pub mod pdu;
pub mod tcp;

/// Maximum PDU size per the Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum register count for a single FC03 read
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum register count for a single FC16 write
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Function code: read holding registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Function code: write single register
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Function code: write multiple registers
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Human-readable description of a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal function",
        0x02 => "Illegal data address",
        0x03 => "Illegal data value",
        0x04 => "Server device failure",
        0x05 => "Acknowledge",
        0x06 => "Server device busy",
        0x08 => "Memory parity error",
        0x0A => "Gateway path unavailable",
        0x0B => "Gateway target failed to respond",
        _ => "Unknown exception",
    }
}

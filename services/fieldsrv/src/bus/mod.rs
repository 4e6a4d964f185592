//! Register bus transports
//!
//! The protocol bridge depends only on the [`RegisterBus`] trait: a
//! half-duplex, register-oriented endpoint that can read and write runs of
//! 16-bit words addressed by `(unit id, start register)`. Concrete wire
//! formats live behind it; this service ships the Modbus TCP reference
//! binding plus an in-memory mock for tests.

pub mod mock;
pub mod modbus;

pub use mock::{MockBus, MockBusHandle};
pub use modbus::tcp::{ModbusTcpBus, ModbusTcpConfig};

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Transport-level error types
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection dropped mid-transaction
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No (or no complete) response within the transport's own deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Well-formed transport frame with a protocol-level problem
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

/// Result type alias for bus operations
pub type BusResult<T> = std::result::Result<T, BusError>;

/// A register-oriented field bus endpoint
///
/// Implementations are half-duplex: one transaction at a time per bus.
/// The bridge serializes access and bounds every call with its own
/// transaction timeout on top of whatever deadline the transport applies.
#[async_trait]
pub trait RegisterBus: Send + Sync + fmt::Debug {
    /// Transport type identifier, for logs
    fn bus_type(&self) -> &'static str;

    /// Establish the connection
    async fn connect(&mut self) -> BusResult<()>;

    /// Tear the connection down
    async fn disconnect(&mut self) -> BusResult<()>;

    /// Whether the transport currently considers itself connected
    fn is_connected(&self) -> bool;

    /// Read `count` registers starting at `start` from unit `unit_id`
    async fn read_registers(&mut self, unit_id: u8, start: u16, count: u16)
        -> BusResult<Vec<u16>>;

    /// Write a run of registers starting at `start` on unit `unit_id`
    async fn write_registers(&mut self, unit_id: u8, start: u16, words: &[u16]) -> BusResult<()>;
}

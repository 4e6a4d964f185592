//! Error handling for the field-bus cycle service
//!
//! Consolidated service-level error type. Nothing below the cycle
//! scheduler is allowed to escape as an error that stops the cycle; these
//! variants exist so failures can be classified, logged and degraded
//! deliberately. Only `ConfigError` at activation time prevents startup.

use flux_channel::ChannelError;
use flux_codec::CodecError;
use thiserror::Error;

use crate::bus::BusError;

/// Field service error type
#[derive(Error, Debug, Clone)]
pub enum FieldSrvError {
    /// Configuration errors (task/element layout, duplicate channels)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Protocol-level errors (malformed frames, exception responses)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Transport-level errors (connect, send, receive)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Bounded transaction timeouts
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Channel model errors (type mismatch, access denied)
    #[error("Channel error: {0}")]
    ChannelError(#[from] ChannelError),

    /// Value does not fit its target register encoding
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Input/output errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the field service
pub type Result<T> = std::result::Result<T, FieldSrvError>;

impl FieldSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        FieldSrvError::ConfigError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        FieldSrvError::ProtocolError(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        FieldSrvError::TransportError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        FieldSrvError::TimeoutError(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        FieldSrvError::EncodingError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        FieldSrvError::InternalError(msg.into())
    }

    /// Whether this error only drops a single write, not the whole flush
    pub fn is_encoding_range(&self) -> bool {
        matches!(self, FieldSrvError::EncodingError(_))
    }
}

impl From<BusError> for FieldSrvError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout(msg) => FieldSrvError::TimeoutError(msg),
            BusError::Protocol(msg) => FieldSrvError::ProtocolError(msg),
            other => FieldSrvError::TransportError(other.to_string()),
        }
    }
}

impl From<CodecError> for FieldSrvError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedWidth(_) => FieldSrvError::ConfigError(err.to_string()),
            _ => FieldSrvError::EncodingError(err.to_string()),
        }
    }
}

impl From<std::io::Error> for FieldSrvError {
    fn from(err: std::io::Error) -> Self {
        FieldSrvError::IoError(err.to_string())
    }
}

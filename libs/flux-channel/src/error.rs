//! Channel error types

use thiserror::Error;

use crate::address::ChannelAddress;
use crate::value::AccessMode;

/// Errors produced by the channel model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// Value does not match the channel's declared type
    #[error("Type mismatch on {address}: expected {expected}, got {actual}")]
    TypeMismatch {
        address: ChannelAddress,
        expected: &'static str,
        actual: String,
    },

    /// Write attempted against a channel that does not allow it
    #[error("Access denied on {address}: channel is {access}")]
    AccessDenied {
        address: ChannelAddress,
        access: AccessMode,
    },

    /// A channel with this address is already registered
    #[error("Duplicate channel: {0}")]
    DuplicateChannel(ChannelAddress),

    /// No channel registered under this address
    #[error("Channel not found: {0}")]
    NotFound(ChannelAddress),

    /// Address string is not of the form `component/channel`
    #[error("Invalid channel address: {0:?}")]
    InvalidAddress(String),
}

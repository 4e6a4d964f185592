//! Double-buffered typed channel model
//!
//! A Channel is an addressable, typed, access-controlled data cell shared
//! between control logic and hardware I/O. Each channel holds three
//! independent value slots:
//!
//! - `current`: the value visible to readers this cycle; only mutated by
//!   the cycle driver's promote step
//! - `next`: the value most recently produced by a producer; promoted to
//!   `current` atomically at cycle start
//! - `pending_write`: set by control logic, consumed exactly once by the
//!   protocol bridge's flush step
//!
//! Readers never lock against producers for a whole cycle: `current` is
//! written only during the single-threaded promote phase, so the process
//! image stays stable for everything that runs between promotes.
//!
//! Change notification is queue-based: [`ChannelRegistry::promote_all`]
//! collects changes from all channels first and invokes listeners after
//! the promote scan has finished, never mid-mutation.

mod address;
mod channel;
mod debounce;
mod error;
mod registry;
mod value;

pub use address::ChannelAddress;
pub use channel::{Channel, ChannelBuilder, ValueChange};
pub use debounce::{Debounce, StateChannel};
pub use error::ChannelError;
pub use registry::ChannelRegistry;
pub use value::{AccessMode, ChannelKind, OptionSet, Unit, Value};

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

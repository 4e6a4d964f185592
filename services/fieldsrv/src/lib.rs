//! Field-bus cycle service
//!
//! Supervises physical power hardware (inverters, batteries, meters,
//! charge points) over register-oriented field buses and applies control
//! logic on a fixed scan cycle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │  CycleScheduler  │──►│  ProtocolBridge  │──►│   RegisterBus    │
//! │  (5 phases/tick) │   │ (tasks/devices)  │   │ (Modbus TCP/mock)│
//! └────────┬─────────┘   └────────┬─────────┘   └──────────────────┘
//!          │                      │ set_next / take_pending_write
//!          ▼                      ▼
//! ┌──────────────────┐   ┌──────────────────┐
//! │   Controllers    │◄──│ ChannelRegistry  │
//! │ (one step/cycle) │   │ (process image)  │
//! └──────────────────┘   └──────────────────┘
//! ```
//!
//! Every tick runs five ordered phases to completion: promote the process
//! image, execute read tasks, step all controllers, flush pending writes,
//! then publish cycle bookkeeping. Device failures degrade to undefined
//! channel values and a debounced `CommunicationFailed` state; nothing
//! below the scheduler can abort a cycle.
//!
//! The building blocks live in sibling crates: `flux-channel` (the
//! double-buffered channel model), `flux-codec` (register-word codec) and
//! `flux-fsm` (the per-component state machine interpreter used by
//! controllers).

pub mod bridge;
pub mod bus;
pub mod config;
pub mod cycle;
pub mod error;

pub use bridge::{
    BitBinding, BridgeConfig, Device, Direction, Element, Priority, ProtocolBridge, Task,
};
pub use bus::{MockBus, MockBusHandle, ModbusTcpBus, ModbusTcpConfig, RegisterBus};
pub use config::{build_bridge, FieldSrvConfig};
pub use cycle::{Controller, CycleScheduler, CycleStats};
pub use error::{FieldSrvError, Result};

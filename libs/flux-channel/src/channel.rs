//! Channel cells: double-buffered value slots with access control

use parking_lot::RwLock;

use crate::address::ChannelAddress;
use crate::error::ChannelError;
use crate::value::{AccessMode, ChannelKind, Unit, Value};
use crate::Result;

/// A change observed while promoting `next` to `current`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub address: ChannelAddress,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[derive(Debug, Default)]
struct Slots {
    current: Option<Value>,
    next: Option<Value>,
    pending_write: Option<Value>,
}

/// Typed, access-controlled, double-buffered data cell
///
/// `current` is only written inside the cycle driver's promote step; all
/// other phases read it without coordination. Producers overwrite `next`
/// freely between promotes. `pending_write` holds at most one value per
/// cycle (last writer wins) and is consumed exactly once by the flush step.
#[derive(Debug)]
pub struct Channel {
    address: ChannelAddress,
    kind: ChannelKind,
    access: AccessMode,
    unit: Unit,
    slots: RwLock<Slots>,
}

impl Channel {
    /// Start building a channel for `component/channel`
    pub fn builder(component: impl AsRef<str>, channel: impl AsRef<str>) -> ChannelBuilder {
        ChannelBuilder {
            address: ChannelAddress::new(component, channel),
            kind: ChannelKind::Float,
            access: AccessMode::ReadOnly,
            unit: Unit::None,
        }
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Current value; `None` until a value has ever been promoted
    pub fn value(&self) -> Option<Value> {
        self.slots.read().current.clone()
    }

    /// Whether a current value is defined
    pub fn is_defined(&self) -> bool {
        self.slots.read().current.is_some()
    }

    /// Producer side: overwrite `next`, type-checked against the declared kind
    pub fn set_next(&self, value: Value) -> Result<()> {
        if !self.kind.accepts(&value) {
            return Err(ChannelError::TypeMismatch {
                address: self.address.clone(),
                expected: self.kind.type_name(),
                actual: value.type_name().to_string(),
            });
        }
        self.slots.write().next = Some(value);
        Ok(())
    }

    /// Producer side: mark the next value as undefined ("we don't know")
    pub fn set_next_undefined(&self) {
        self.slots.write().next = None;
    }

    /// Control side: request a hardware write, replacing any prior pending
    /// write this cycle
    pub fn request_write(&self, value: Value) -> Result<()> {
        if !self.access.is_writable() {
            return Err(ChannelError::AccessDenied {
                address: self.address.clone(),
                access: self.access,
            });
        }
        if !self.kind.accepts(&value) {
            return Err(ChannelError::TypeMismatch {
                address: self.address.clone(),
                expected: self.kind.type_name(),
                actual: value.type_name().to_string(),
            });
        }
        self.slots.write().pending_write = Some(value);
        Ok(())
    }

    /// Bridge side: return and clear the pending write; single-shot per cycle
    pub fn take_pending_write(&self) -> Option<Value> {
        self.slots.write().pending_write.take()
    }

    /// Promote `next` into `current`, reporting the change if any
    ///
    /// Called from the registry's promote scan only.
    pub fn promote(&self) -> Option<ValueChange> {
        let mut slots = self.slots.write();
        if slots.current == slots.next {
            return None;
        }
        let old = slots.current.clone();
        slots.current = slots.next.clone();
        Some(ValueChange {
            address: self.address.clone(),
            old,
            new: slots.current.clone(),
        })
    }
}

/// Builder for [`Channel`]
#[derive(Debug)]
pub struct ChannelBuilder {
    address: ChannelAddress,
    kind: ChannelKind,
    access: AccessMode,
    unit: Unit,
}

impl ChannelBuilder {
    pub fn kind(mut self, kind: ChannelKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn build(self) -> Channel {
        Channel {
            address: self.address,
            kind: self.kind,
            access: self.access,
            unit: self.unit,
            slots: RwLock::new(Slots::default()),
        }
    }
}

//! Channel registry: registration, lookup, promote scan, change events
//!
//! Components register their channels explicitly at activation and get a
//! typed `Arc<Channel>` handle back; there is no ambient global registry,
//! the instance is passed down by construction.
//!
//! The promote scan runs single-threaded from the cycle driver. Change
//! listeners are invoked from an event queue drained after the scan has
//! finished, so a listener observes a fully promoted process image and can
//! never interleave with slot mutation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::address::ChannelAddress;
use crate::channel::{Channel, ValueChange};
use crate::debounce::{Debounce, StateChannel};
use crate::error::ChannelError;
use crate::value::Value;
use crate::Result;

type ChangeListener = Box<dyn Fn(&ValueChange) + Send + Sync>;

/// Registry of all channels in the runtime
pub struct ChannelRegistry {
    channels: DashMap<ChannelAddress, Arc<Channel>>,
    listeners: RwLock<Vec<ChangeListener>>,
    promoting: AtomicBool,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            promoting: AtomicBool::new(false),
        }
    }

    /// Register a channel, returning the shared handle
    ///
    /// A second registration under the same address is a configuration
    /// error at activation time.
    pub fn register(&self, channel: Channel) -> Result<Arc<Channel>> {
        let address = channel.address().clone();
        let handle = Arc::new(channel);
        match self.channels.entry(address.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ChannelError::DuplicateChannel(address))
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    /// Register a boolean channel wrapped in a debounce policy
    pub fn register_state(
        &self,
        channel: Channel,
        policy: Debounce,
        threshold: u32,
    ) -> Result<StateChannel> {
        let handle = self.register(channel)?;
        StateChannel::new(handle, policy, threshold)
    }

    /// Look up a channel handle
    pub fn channel(&self, address: &ChannelAddress) -> Option<Arc<Channel>> {
        self.channels.get(address).map(|e| Arc::clone(e.value()))
    }

    /// Read a channel's current value; `None` if unknown or undefined
    pub fn value(&self, address: &ChannelAddress) -> Option<Value> {
        self.channels.get(address).and_then(|e| e.value().value())
    }

    /// External control surface: request a hardware write by address
    ///
    /// Subject to the same access-mode gate as internal controllers.
    pub fn request_write(&self, address: &ChannelAddress, value: Value) -> Result<()> {
        let channel = self
            .channels
            .get(address)
            .ok_or_else(|| ChannelError::NotFound(address.clone()))?;
        channel.request_write(value)
    }

    /// Drop all channels of a component out of the promote/flush scans
    pub fn remove_component(&self, component: &str) -> usize {
        let before = self.channels.len();
        self.channels.retain(|addr, _| addr.component() != component);
        let removed = before - self.channels.len();
        if removed > 0 {
            debug!(component, removed, "deactivated component channels");
        }
        removed
    }

    /// Register an on-change listener
    ///
    /// Listeners run synchronously after each promote scan, in registration
    /// order, once per changed channel.
    pub fn on_change(&self, listener: impl Fn(&ValueChange) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// Promote every channel's `next` into `current`; cycle-driver-only
    ///
    /// Returns the number of changed channels. Change listeners are invoked
    /// after the scan completes. Re-entrant calls (a listener calling back
    /// into promote) are rejected in test builds and skipped in release.
    pub fn promote_all(&self) -> usize {
        if self.promoting.swap(true, Ordering::Acquire) {
            debug_assert!(false, "promote_all called re-entrantly from a listener");
            return 0;
        }

        let mut events = Vec::new();
        for entry in self.channels.iter() {
            if let Some(change) = entry.value().promote() {
                events.push(change);
            }
        }

        let listeners = self.listeners.read();
        for event in &events {
            for listener in listeners.iter() {
                listener(event);
            }
        }
        drop(listeners);

        self.promoting.store(false, Ordering::Release);
        events.len()
    }

    /// Number of registered channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// All registered addresses (stable snapshot, unspecified order)
    pub fn addresses(&self) -> Vec<ChannelAddress> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }
}

//! Debounced boolean state channels
//!
//! A StateChannel wraps a boolean channel with a run-length debounce
//! policy: the raw input must repeat a configured number of times in a row
//! before the published value changes. Between threshold hits the channel
//! holds its last published value, so a flaky sensor bit does not flap a
//! fault state once per cycle.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::value::{ChannelKind, Value};
use crate::Result;

/// Debounce policy of a [`StateChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Debounce {
    /// N raw `true`s in a row flip to true; a single `false` flips back
    TrueValuesInARow,
    /// N raw `false`s in a row flip to false; a single `true` flips back
    FalseValuesInARow,
    /// N identical raw values in a row adopt that value
    SameValuesInARow,
}

#[derive(Debug)]
struct DebounceState {
    run_value: bool,
    run_length: u32,
    published: bool,
}

/// Boolean channel with an attached debounce policy
#[derive(Debug)]
pub struct StateChannel {
    channel: Arc<Channel>,
    policy: Debounce,
    threshold: u32,
    state: Mutex<DebounceState>,
}

impl StateChannel {
    /// Wrap a boolean channel; non-boolean kinds are a bind-time error
    pub fn new(channel: Arc<Channel>, policy: Debounce, threshold: u32) -> Result<Self> {
        if !matches!(channel.kind(), ChannelKind::Boolean) {
            return Err(ChannelError::TypeMismatch {
                address: channel.address().clone(),
                expected: "boolean",
                actual: channel.kind().type_name().to_string(),
            });
        }
        Ok(Self {
            channel,
            policy,
            threshold: threshold.max(1),
            state: Mutex::new(DebounceState {
                run_value: false,
                run_length: 0,
                published: false,
            }),
        })
    }

    /// The underlying channel
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Last published value (what `feed` keeps republishing)
    pub fn published(&self) -> bool {
        self.state.lock().published
    }

    /// Run the debounce policy on a raw input and republish via `set_next`
    pub fn feed(&self, raw: bool) {
        let mut state = self.state.lock();
        if raw == state.run_value {
            state.run_length = state.run_length.saturating_add(1);
        } else {
            state.run_value = raw;
            state.run_length = 1;
        }

        let at_threshold = state.run_length >= self.threshold;
        state.published = match self.policy {
            Debounce::TrueValuesInARow => match raw {
                true if at_threshold => true,
                true => state.published,
                false => false,
            },
            Debounce::FalseValuesInARow => match raw {
                false if at_threshold => false,
                false => state.published,
                true => true,
            },
            Debounce::SameValuesInARow => {
                if at_threshold {
                    raw
                } else {
                    state.published
                }
            }
        };

        // Channel kind was checked at construction; this cannot fail.
        let _ = self.channel.set_next(Value::Bool(state.published));
    }
}

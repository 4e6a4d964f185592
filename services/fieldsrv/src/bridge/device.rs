//! Devices: logical bus endpoints with task bookkeeping
//!
//! A device owns the tasks addressed at one unit id plus the bookkeeping
//! the scheduler needs: consecutive-failure count, last-success timestamp
//! and the round-robin cursor for LOW priority tasks. Persistent
//! communication failure is surfaced on the device's own debounced
//! `CommunicationFailed` state channel.

use std::time::Instant;

use flux_channel::{Channel, ChannelKind, ChannelRegistry, Debounce, StateChannel};
use tracing::debug;

use super::task::{Direction, Priority, Task};
use crate::error::Result;

/// A logical field-bus endpoint
#[derive(Debug)]
pub struct Device {
    id: String,
    unit_id: u8,
    read_tasks: Vec<Task>,
    write_tasks: Vec<Task>,
    low_cursor: usize,
    consecutive_failures: u32,
    last_success: Option<Instant>,
    comm_failed: StateChannel,
}

impl Device {
    /// Create a device and register its `CommunicationFailed` state channel
    pub fn new(
        id: impl Into<String>,
        unit_id: u8,
        registry: &ChannelRegistry,
        comm_failed_debounce: u32,
    ) -> Result<Self> {
        let id = id.into();
        let comm_failed = registry.register_state(
            Channel::builder(&id, "CommunicationFailed")
                .kind(ChannelKind::Boolean)
                .build(),
            Debounce::TrueValuesInARow,
            comm_failed_debounce,
        )?;
        Ok(Self {
            id,
            unit_id,
            read_tasks: Vec::new(),
            write_tasks: Vec::new(),
            low_cursor: 0,
            consecutive_failures: 0,
            last_success: None,
            comm_failed,
        })
    }

    /// Register a task with this device
    pub fn add_task(&mut self, task: Task) {
        match task.direction() {
            Direction::Read => self.read_tasks.push(task),
            Direction::Write => self.write_tasks.push(task),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn read_tasks(&self) -> &[Task] {
        &self.read_tasks
    }

    pub fn write_tasks(&self) -> &[Task] {
        &self.write_tasks
    }

    pub fn has_read_tasks(&self) -> bool {
        !self.read_tasks.is_empty()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// The debounced communication-failure state channel
    pub fn comm_failed(&self) -> &StateChannel {
        &self.comm_failed
    }

    /// Select this cycle's read tasks: all HIGH plus up to `low_budget`
    /// LOW tasks round-robin from the cursor
    ///
    /// The cursor advances past the selected tasks (wrapping), so every LOW
    /// task eventually runs even under permanent budget pressure.
    pub fn select_read_tasks(&mut self, low_budget: usize) -> Vec<usize> {
        let mut selected: Vec<usize> = self
            .read_tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.priority() == Priority::High)
            .map(|(i, _)| i)
            .collect();

        let low: Vec<usize> = self
            .read_tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.priority() == Priority::Low)
            .map(|(i, _)| i)
            .collect();
        if !low.is_empty() && low_budget > 0 {
            let take = low_budget.min(low.len());
            for i in 0..take {
                selected.push(low[(self.low_cursor + i) % low.len()]);
            }
            self.low_cursor = (self.low_cursor + take) % low.len();
        }

        selected
    }

    /// Record a fully successful cycle for this device
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_success = Some(Instant::now());
    }

    /// Record one failed transaction; returns the new consecutive count
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    /// Reset after crossing the failure threshold
    ///
    /// Clears per-element decode state (all read-bound channels go
    /// undefined) and restarts the round-robin cursor, so a reconnected or
    /// address-reassigned physical unit is not fed stale assumptions.
    pub fn reset(&mut self) {
        debug!(device = %self.id, "device reset");
        self.low_cursor = 0;
        for task in &self.read_tasks {
            task.invalidate();
        }
    }

    /// Feed the debounced communication state for this cycle
    pub fn update_comm_state(&self, failure_threshold: u32) {
        self.comm_failed
            .feed(self.consecutive_failures >= failure_threshold);
    }
}

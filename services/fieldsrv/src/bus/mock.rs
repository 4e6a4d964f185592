//! Mock register bus for testing
//!
//! In-memory register space with failure injection and a transaction log.
//! The bridge owns its bus as a boxed trait object, so tests keep a
//! [`MockBusHandle`] to seed registers, inject faults and inspect traffic
//! after the bus has been handed over.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{BusError, BusResult, RegisterBus};

#[derive(Debug, Default)]
struct MockSpace {
    registers: HashMap<(u8, u16), u16>,
    /// Ranges `(unit, start, count)` whose overlapping requests fail
    failing: Vec<(u8, u16, u16)>,
    connected: bool,
    read_log: Vec<(u8, u16, u16)>,
    write_log: Vec<(u8, u16, Vec<u16>)>,
}

impl MockSpace {
    fn overlaps_failure(&self, unit_id: u8, start: u16, count: u16) -> bool {
        let end = u32::from(start) + u32::from(count);
        self.failing.iter().any(|&(u, s, c)| {
            u == unit_id && u32::from(s) < end && u32::from(s) + u32::from(c) > u32::from(start)
        })
    }
}

/// Test-side handle into a [`MockBus`]'s register space
#[derive(Debug, Clone)]
pub struct MockBusHandle {
    space: Arc<Mutex<MockSpace>>,
}

impl MockBusHandle {
    /// Seed a single register
    pub fn set_register(&self, unit_id: u8, address: u16, word: u16) {
        self.space.lock().registers.insert((unit_id, address), word);
    }

    /// Seed a run of registers
    pub fn set_registers(&self, unit_id: u8, start: u16, words: &[u16]) {
        let mut space = self.space.lock();
        for (i, &word) in words.iter().enumerate() {
            space.registers.insert((unit_id, start + i as u16), word);
        }
    }

    /// Read back a register written by the device under test
    pub fn register(&self, unit_id: u8, address: u16) -> Option<u16> {
        self.space.lock().registers.get(&(unit_id, address)).copied()
    }

    /// Make every request overlapping `(start, count)` on `unit_id` fail
    pub fn fail_range(&self, unit_id: u8, start: u16, count: u16) {
        self.space.lock().failing.push((unit_id, start, count));
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.space.lock().failing.clear();
    }

    /// Reads issued so far, as `(unit, start, count)`
    pub fn read_log(&self) -> Vec<(u8, u16, u16)> {
        self.space.lock().read_log.clone()
    }

    /// Writes issued so far, as `(unit, start, words)`
    pub fn write_log(&self) -> Vec<(u8, u16, Vec<u16>)> {
        self.space.lock().write_log.clone()
    }
}

/// In-memory register bus
#[derive(Debug)]
pub struct MockBus {
    space: Arc<Mutex<MockSpace>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            space: Arc::new(Mutex::new(MockSpace::default())),
        }
    }

    /// Handle for seeding and inspecting the register space
    pub fn handle(&self) -> MockBusHandle {
        MockBusHandle {
            space: Arc::clone(&self.space),
        }
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegisterBus for MockBus {
    fn bus_type(&self) -> &'static str {
        "mock"
    }

    async fn connect(&mut self) -> BusResult<()> {
        self.space.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> BusResult<()> {
        self.space.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.space.lock().connected
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> BusResult<Vec<u16>> {
        let mut space = self.space.lock();
        if !space.connected {
            return Err(BusError::ConnectionLost("mock: not connected".to_string()));
        }
        space.read_log.push((unit_id, start, count));
        if space.overlaps_failure(unit_id, start, count) {
            return Err(BusError::Io(format!(
                "mock: injected fault at unit {unit_id} range {start}+{count}"
            )));
        }
        trace!(unit_id, start, count, "mock read");
        Ok((0..count)
            .map(|i| {
                space
                    .registers
                    .get(&(unit_id, start + i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn write_registers(&mut self, unit_id: u8, start: u16, words: &[u16]) -> BusResult<()> {
        let mut space = self.space.lock();
        if !space.connected {
            return Err(BusError::ConnectionLost("mock: not connected".to_string()));
        }
        space.write_log.push((unit_id, start, words.to_vec()));
        if space.overlaps_failure(unit_id, start, words.len() as u16) {
            return Err(BusError::Io(format!(
                "mock: injected fault at unit {unit_id} range {start}+{}",
                words.len()
            )));
        }
        for (i, &word) in words.iter().enumerate() {
            space.registers.insert((unit_id, start + i as u16), word);
        }
        trace!(unit_id, start, count = words.len(), "mock write");
        Ok(())
    }
}

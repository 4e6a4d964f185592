//! Protocol bridge: per-cycle task scheduling and transaction execution
//!
//! Within each cycle the bridge decides which tasks run (all HIGH, LOW
//! round-robin under budget), merges the selected reads into
//! contiguous-range bus requests, executes them under a bounded timeout
//! and pushes decoded values into channel `next` slots. A failing request
//! affects exactly its own tasks' channels: siblings in the same device
//! and cycle still execute, the device's failure counter increments by one
//! per failed transaction, and crossing the threshold resets the device.
//!
//! Nothing in here escapes as an error that could abort the cycle; every
//! failure degrades to "hold last value" plus the device's debounced
//! `CommunicationFailed` state.

pub mod device;
pub mod element;
pub mod task;

pub use device::Device;
pub use element::{BitBinding, Element};
pub use task::{plan_read_requests, Direction, Priority, ReadRequest, Task};

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bus::RegisterBus;
use crate::error::{FieldSrvError, Result};

/// Bridge tunables
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// LOW priority tasks executed per device per cycle
    pub low_priority_tasks_per_cycle: usize,
    /// Maximum register gap bridged when merging read tasks
    pub merge_gap: u16,
    /// Consecutive failed transactions before a device reset
    pub failure_threshold: u32,
    /// Upper bound for a single bus transaction
    pub transaction_timeout: Duration,
    /// Largest merged read request, in registers
    pub max_request_registers: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            low_priority_tasks_per_cycle: 1,
            merge_gap: 4,
            failure_threshold: 3,
            transaction_timeout: Duration::from_millis(1000),
            max_request_registers: 125,
        }
    }
}

/// Task scheduler and transaction executor over one register bus
pub struct ProtocolBridge {
    bus: Box<dyn RegisterBus>,
    devices: Vec<Device>,
    config: BridgeConfig,
}

impl std::fmt::Debug for ProtocolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolBridge")
            .field("bus", &self.bus.bus_type())
            .field("devices", &self.devices.len())
            .finish()
    }
}

impl ProtocolBridge {
    pub fn new(bus: Box<dyn RegisterBus>, config: BridgeConfig) -> Self {
        Self {
            bus,
            devices: Vec::new(),
            config,
        }
    }

    pub fn add_device(&mut self, device: Device) {
        self.devices.push(device);
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == id)
    }

    /// Remove a device, cancelling its outstanding tasks
    pub fn remove_device(&mut self, id: &str) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.id() != id);
        before != self.devices.len()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Connect the underlying bus
    pub async fn connect(&mut self) -> Result<()> {
        self.bus.connect().await?;
        info!(bus = self.bus.bus_type(), "bus connected");
        Ok(())
    }

    /// Disconnect the underlying bus
    pub async fn disconnect(&mut self) -> Result<()> {
        self.bus.disconnect().await?;
        Ok(())
    }

    /// Execute this cycle's read tasks for all devices
    pub async fn execute_reads(&mut self) {
        let config = &self.config;
        let bus = &mut self.bus;
        for device in self.devices.iter_mut() {
            let selected = device.select_read_tasks(config.low_priority_tasks_per_cycle);
            if selected.is_empty() {
                continue;
            }
            let requests = plan_read_requests(
                device.read_tasks(),
                &selected,
                config.merge_gap,
                config.max_request_registers,
            );
            debug!(
                device = %device.id(),
                tasks = selected.len(),
                requests = requests.len(),
                "executing read tasks"
            );

            let mut failed = 0usize;
            for request in &requests {
                let outcome = read_transaction(
                    bus.as_mut(),
                    device.unit_id(),
                    request.start,
                    request.count,
                    config.transaction_timeout,
                )
                .await;
                match outcome {
                    Ok(words) => {
                        for &task_index in &request.tasks {
                            let task = &device.read_tasks()[task_index];
                            let from = usize::from(task.start() - request.start);
                            let to = from + usize::from(task.register_count());
                            if let Err(e) = task.decode_response(&words[from..to]) {
                                warn!(
                                    device = %device.id(),
                                    start = task.start(),
                                    error = %e,
                                    "decode failed"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(
                            device = %device.id(),
                            start = request.start,
                            count = request.count,
                            error = %e,
                            "read transaction failed"
                        );
                        self::record_failure(device, config.failure_threshold);
                    }
                }
            }
            if failed == 0 {
                device.record_success();
            }
            device.update_comm_state(config.failure_threshold);
        }
    }

    /// Flush pending writes for all devices
    ///
    /// Only elements whose channel holds a pending write are sent; other
    /// elements of the same task are skipped, never re-sent with stale
    /// data. An unencodable value drops that one write and the flush
    /// continues.
    pub async fn execute_writes(&mut self) {
        let config = &self.config;
        let bus = &mut self.bus;
        for device in self.devices.iter_mut() {
            let mut writes: Vec<(u16, Vec<u16>)> = Vec::new();
            for task in device.write_tasks() {
                for (offset, element) in task.element_spans() {
                    match element.encode_pending() {
                        Ok(None) => {}
                        Ok(Some(words)) => writes.push((task.start() + offset, words)),
                        Err(e) => warn!(
                            device = %device.id(),
                            start = task.start() + offset,
                            error = %e,
                            "pending write dropped"
                        ),
                    }
                }
            }
            if writes.is_empty() {
                continue;
            }

            let mut failed = 0usize;
            for (address, words) in writes {
                let outcome = write_transaction(
                    bus.as_mut(),
                    device.unit_id(),
                    address,
                    &words,
                    config.transaction_timeout,
                )
                .await;
                if let Err(e) = outcome {
                    failed += 1;
                    warn!(
                        device = %device.id(),
                        address,
                        error = %e,
                        "write transaction failed"
                    );
                    self::record_failure(device, config.failure_threshold);
                }
            }

            // Write-only devices track their communication state here; for
            // devices with read tasks the read phase already fed it.
            if !device.has_read_tasks() {
                if failed == 0 {
                    device.record_success();
                }
                device.update_comm_state(config.failure_threshold);
            }
        }
    }
}

fn record_failure(device: &mut Device, threshold: u32) {
    let failures = device.record_failure();
    if failures == threshold {
        info!(
            device = %device.id(),
            failures,
            "failure threshold crossed"
        );
        device.reset();
    }
}

async fn read_transaction(
    bus: &mut dyn RegisterBus,
    unit_id: u8,
    start: u16,
    count: u16,
    deadline: Duration,
) -> Result<Vec<u16>> {
    match timeout(deadline, bus.read_registers(unit_id, start, count)).await {
        Err(_) => Err(FieldSrvError::timeout(format!(
            "unit {unit_id}: read {start}+{count} exceeded {deadline:?}"
        ))),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(words)) if words.len() != usize::from(count) => Err(FieldSrvError::protocol(
            format!(
                "unit {unit_id}: short response ({} of {count} registers)",
                words.len()
            ),
        )),
        Ok(Ok(words)) => Ok(words),
    }
}

async fn write_transaction(
    bus: &mut dyn RegisterBus,
    unit_id: u8,
    start: u16,
    words: &[u16],
    deadline: Duration,
) -> Result<()> {
    match timeout(deadline, bus.write_registers(unit_id, start, words)).await {
        Err(_) => Err(FieldSrvError::timeout(format!(
            "unit {unit_id}: write {start}+{} exceeded {deadline:?}",
            words.len()
        ))),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(())) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;
    use flux_channel::{AccessMode, Channel, ChannelKind, ChannelRegistry, Value};
    use flux_codec::WordOrder;
    use std::sync::Arc;

    struct Fixture {
        bridge: ProtocolBridge,
        handle: crate::bus::MockBusHandle,
        power: Arc<Channel>,
        soc: Arc<Channel>,
        set_power: Arc<Channel>,
    }

    /// One device, two single-register HIGH read tasks far apart (no
    /// merging) and one write task.
    async fn fixture(registry: &ChannelRegistry) -> Fixture {
        let bus = MockBus::new();
        let handle = bus.handle();

        let power = registry
            .register(
                Channel::builder("ess0", "ActivePower")
                    .kind(ChannelKind::Integer)
                    .build(),
            )
            .unwrap();
        let soc = registry
            .register(
                Channel::builder("ess0", "Soc")
                    .kind(ChannelKind::Integer)
                    .build(),
            )
            .unwrap();
        let set_power = registry
            .register(
                Channel::builder("ess0", "SetActivePower")
                    .kind(ChannelKind::Integer)
                    .access(AccessMode::ReadWrite)
                    .build(),
            )
            .unwrap();

        let mut device = Device::new("ess0", 1, registry, 1).unwrap();
        device.add_task(
            Task::read(
                100,
                1,
                Priority::High,
                vec![
                    Element::number(Arc::clone(&power), 1, true, false, WordOrder::MswLsw, 0)
                        .unwrap(),
                ],
            )
            .unwrap(),
        );
        device.add_task(
            Task::read(
                200,
                1,
                Priority::High,
                vec![Element::number(Arc::clone(&soc), 1, false, false, WordOrder::MswLsw, 0)
                    .unwrap()],
            )
            .unwrap(),
        );
        device.add_task(
            Task::write(
                300,
                1,
                vec![Element::number(
                    Arc::clone(&set_power),
                    1,
                    true,
                    false,
                    WordOrder::MswLsw,
                    0,
                )
                .unwrap()],
            )
            .unwrap(),
        );

        let mut bridge = ProtocolBridge::new(Box::new(bus), BridgeConfig::default());
        bridge.add_device(device);
        bridge.connect().await.unwrap();

        Fixture {
            bridge,
            handle,
            power,
            soc,
            set_power,
        }
    }

    #[tokio::test]
    async fn test_reads_land_in_next() {
        let registry = ChannelRegistry::new();
        let mut f = fixture(&registry).await;
        f.handle.set_register(1, 100, 1234);
        f.handle.set_register(1, 200, 87);

        f.bridge.execute_reads().await;
        registry.promote_all();

        assert_eq!(f.power.value(), Some(Value::Int(1234)));
        assert_eq!(f.soc.value(), Some(Value::Int(87)));
        assert_eq!(f.bridge.devices()[0].consecutive_failures(), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_partial_failure_isolation() {
        let registry = ChannelRegistry::new();
        let mut f = fixture(&registry).await;
        f.handle.set_register(1, 100, 10);
        f.handle.set_register(1, 200, 50);
        f.bridge.execute_reads().await;
        registry.promote_all();

        // Fail only the task at register 100; its sibling still updates.
        f.handle.fail_range(1, 100, 1);
        f.handle.set_register(1, 200, 60);
        f.bridge.execute_reads().await;
        registry.promote_all();

        assert_eq!(f.power.value(), Some(Value::Int(10)), "holds last value");
        assert_eq!(f.soc.value(), Some(Value::Int(60)), "sibling updated");
        assert_eq!(f.bridge.devices()[0].consecutive_failures(), 1);
        assert!(logs_contain("read transaction failed"));
    }

    #[tokio::test]
    async fn test_write_flush_consumes_pending_once() {
        let registry = ChannelRegistry::new();
        let mut f = fixture(&registry).await;

        f.set_power.request_write(Value::Int(-500)).unwrap();
        f.bridge.execute_writes().await;
        assert_eq!(f.handle.write_log(), vec![(1, 300, vec![(-500i16) as u16])]);

        // No pending write left: second flush sends nothing.
        f.bridge.execute_writes().await;
        assert_eq!(f.handle.write_log().len(), 1);
    }

    #[tokio::test]
    async fn test_unencodable_write_dropped_others_proceed() {
        let registry = ChannelRegistry::new();
        let mut f = fixture(&registry).await;

        // Second writable element on the same device.
        let set_soc = registry
            .register(
                Channel::builder("ess0", "SetSocLimit")
                    .kind(ChannelKind::Integer)
                    .access(AccessMode::ReadWrite)
                    .build(),
            )
            .unwrap();
        // Rebuild the fixture device with an extra write task.
        let mut device = Device::new("ess1", 2, &registry, 1).unwrap();
        device.add_task(
            Task::write(
                10,
                1,
                vec![Element::number(
                    Arc::clone(&f.set_power),
                    1,
                    true,
                    false,
                    WordOrder::MswLsw,
                    0,
                )
                .unwrap()],
            )
            .unwrap(),
        );
        device.add_task(
            Task::write(
                20,
                1,
                vec![Element::number(
                    Arc::clone(&set_soc),
                    1,
                    false,
                    false,
                    WordOrder::MswLsw,
                    0,
                )
                .unwrap()],
            )
            .unwrap(),
        );
        f.bridge.add_device(device);

        // Out of range for a signed 16-bit register; sibling is fine.
        f.set_power.request_write(Value::Int(100_000)).unwrap();
        set_soc.request_write(Value::Int(90)).unwrap();
        f.bridge.execute_writes().await;

        let writes = f.handle.write_log();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], (2, 20, vec![90]));
    }

    #[tokio::test]
    async fn test_device_reset_after_threshold() {
        let registry = ChannelRegistry::new();
        let mut f = fixture(&registry).await;
        f.handle.set_register(1, 100, 10);
        f.handle.set_register(1, 200, 50);
        f.bridge.execute_reads().await;
        registry.promote_all();
        assert!(f.power.is_defined());

        // Both tasks fail; 2 failures per cycle crosses the threshold of 3
        // in the second cycle.
        f.handle.fail_range(1, 0, 1000);
        f.bridge.execute_reads().await;
        f.bridge.execute_reads().await;
        registry.promote_all();

        assert!(f.bridge.devices()[0].consecutive_failures() >= 3);
        assert_eq!(f.power.value(), None, "reset invalidated to undefined");
        assert_eq!(f.soc.value(), None);
    }
}

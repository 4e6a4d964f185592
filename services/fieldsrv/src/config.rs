//! Service configuration
//!
//! YAML configuration merged with `FIELDSRV_`-prefixed environment
//! variables via figment. The device/task/element layout is plain tagged
//! data: device profiles differ only in which tasks and elements they
//! declare, never in scheduler behavior. All layout inconsistencies are
//! configuration errors at activation time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::info;

use flux_channel::{AccessMode, Channel, ChannelKind, ChannelRegistry, Unit};
use flux_codec::WordOrder;

use crate::bridge::{
    BitBinding, BridgeConfig, Device, Direction, Element, Priority, ProtocolBridge, Task,
};
use crate::bus::{MockBus, ModbusTcpBus, ModbusTcpConfig, RegisterBus};
use crate::error::{FieldSrvError, Result};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/fieldsrv.yaml";

fn default_cycle_ms() -> u64 {
    1000
}

fn default_low_budget() -> usize {
    1
}

fn default_merge_gap() -> u16 {
    4
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_comm_failed_debounce() -> u32 {
    3
}

fn default_transaction_timeout_ms() -> u64 {
    1000
}

fn default_max_request_registers() -> u16 {
    125
}

fn default_port() -> u16 {
    502
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_response_timeout_ms() -> u64 {
    1000
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSrvConfig {
    /// Cycle period in milliseconds
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for FieldSrvConfig {
    fn default() -> Self {
        Self {
            cycle_ms: default_cycle_ms(),
            bridge: BridgeSettings::default(),
            transport: TransportSettings::default(),
            devices: Vec::new(),
        }
    }
}

impl FieldSrvConfig {
    /// Load from a YAML file merged with `FIELDSRV_` environment variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: FieldSrvConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("FIELDSRV_").split("__"))
            .extract()
            .map_err(|e| FieldSrvError::config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        info!(
            path = %path.display(),
            devices = config.devices.len(),
            cycle_ms = config.cycle_ms,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Structural validation beyond serde
    pub fn validate(&self) -> Result<()> {
        if self.cycle_ms == 0 {
            return Err(FieldSrvError::config("cycle_ms must be positive"));
        }
        let mut ids: Vec<&str> = self.devices.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(w) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(FieldSrvError::config(format!(
                "Duplicate device id: {}",
                w[0]
            )));
        }
        Ok(())
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }
}

/// Bridge tunables as configured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "default_low_budget")]
    pub low_priority_tasks_per_cycle: usize,
    #[serde(default = "default_merge_gap")]
    pub merge_gap: u16,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_comm_failed_debounce")]
    pub comm_failed_debounce: u32,
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    #[serde(default = "default_max_request_registers")]
    pub max_request_registers: u16,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            low_priority_tasks_per_cycle: default_low_budget(),
            merge_gap: default_merge_gap(),
            failure_threshold: default_failure_threshold(),
            comm_failed_debounce: default_comm_failed_debounce(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            max_request_registers: default_max_request_registers(),
        }
    }
}

impl BridgeSettings {
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            low_priority_tasks_per_cycle: self.low_priority_tasks_per_cycle,
            merge_gap: self.merge_gap,
            failure_threshold: self.failure_threshold,
            transaction_timeout: Duration::from_millis(self.transaction_timeout_ms),
            max_request_registers: self.max_request_registers,
        }
    }
}

/// Transport selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportSettings {
    ModbusTcp {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
        #[serde(default = "default_response_timeout_ms")]
        response_timeout_ms: u64,
    },
    /// In-memory bus, for tests and dry runs
    Mock,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings::Mock
    }
}

impl TransportSettings {
    /// Build the configured register bus
    pub fn build_bus(&self) -> Box<dyn RegisterBus> {
        match self {
            TransportSettings::ModbusTcp {
                host,
                port,
                connect_timeout_ms,
                response_timeout_ms,
            } => Box::new(ModbusTcpBus::new(ModbusTcpConfig {
                host: host.clone(),
                port: *port,
                connect_timeout: Duration::from_millis(*connect_timeout_ms),
                response_timeout: Duration::from_millis(*response_timeout_ms),
            })),
            TransportSettings::Mock => Box::new(MockBus::new()),
        }
    }
}

// ============================================================================
// Device / task / element layout
// ============================================================================

/// One logical device on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub unit_id: u8,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// One register-range transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub start: u16,
    pub count: u16,
    pub direction: Direction,
    #[serde(default)]
    pub priority: Priority,
    pub elements: Vec<ElementConfig>,
}

/// Element data type on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    F32,
    F64,
    Bits,
    Text,
    Reserved,
}

impl DataType {
    fn fixed_register_count(self) -> Option<u16> {
        match self {
            DataType::U16 | DataType::S16 | DataType::Bits => Some(1),
            DataType::U32 | DataType::S32 | DataType::F32 => Some(2),
            DataType::U64 | DataType::S64 | DataType::F64 => Some(4),
            DataType::Text | DataType::Reserved => None,
        }
    }

    fn signed(self) -> bool {
        matches!(self, DataType::S16 | DataType::S32 | DataType::S64)
    }

    fn float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    fn numeric(self) -> bool {
        !matches!(self, DataType::Bits | DataType::Text | DataType::Reserved)
    }
}

/// Declared channel type override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKindConfig {
    Boolean,
    Integer,
    Long,
    Float,
    Text,
}

/// One bit of a packed status word
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitSpec {
    pub bit: u8,
    pub channel: String,
}

/// One typed sub-field of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementConfig {
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub order: WordOrder,
    #[serde(default)]
    pub scale: i8,
    /// Channel id within the device component; required except for
    /// `bits` and `reserved`
    #[serde(default)]
    pub channel: Option<String>,
    /// Override for the bound channel's declared kind
    #[serde(default)]
    pub channel_kind: Option<ChannelKindConfig>,
    /// Override for the bound channel's access mode
    #[serde(default)]
    pub access: Option<AccessMode>,
    #[serde(default)]
    pub unit: Unit,
    /// Register span for `text` and `reserved` elements
    #[serde(default)]
    pub words: Option<u16>,
    /// Bit bindings for `bits` elements
    #[serde(default)]
    pub bits: Vec<BitSpec>,
}

impl ElementConfig {
    fn register_count(&self) -> Result<u16> {
        match self.data_type.fixed_register_count() {
            Some(count) => Ok(count),
            None => self.words.ok_or_else(|| {
                FieldSrvError::config(format!(
                    "Element {:?}: 'words' is required for {:?}",
                    self.channel, self.data_type
                ))
            }),
        }
    }

    /// Channel kind, from the override or derived from the wire type
    fn channel_kind(&self, register_count: u16) -> Result<ChannelKind> {
        if let Some(kind) = self.channel_kind {
            return Ok(match kind {
                ChannelKindConfig::Boolean => ChannelKind::Boolean,
                ChannelKindConfig::Integer => ChannelKind::Integer,
                ChannelKindConfig::Long => ChannelKind::Long,
                ChannelKindConfig::Float => ChannelKind::Float,
                ChannelKindConfig::Text => ChannelKind::Text {
                    length: usize::from(register_count) * 2,
                },
            });
        }
        Ok(match self.data_type {
            DataType::Bits => ChannelKind::Boolean,
            DataType::Text => ChannelKind::Text {
                length: usize::from(register_count) * 2,
            },
            DataType::Reserved => {
                return Err(FieldSrvError::config(
                    "Reserved elements carry no channel",
                ))
            }
            DataType::F32 | DataType::F64 => ChannelKind::Float,
            // A scaled register is fractional in engineering units.
            _ if self.scale != 0 => ChannelKind::Float,
            DataType::U16 | DataType::S16 | DataType::S32 => ChannelKind::Integer,
            DataType::U32 | DataType::U64 | DataType::S64 => ChannelKind::Long,
        })
    }

    fn build(
        &self,
        component: &str,
        direction: Direction,
        registry: &ChannelRegistry,
        local: &mut HashMap<String, Arc<Channel>>,
    ) -> Result<Element> {
        let register_count = self.register_count()?;
        let default_access = match direction {
            Direction::Read => AccessMode::ReadOnly,
            Direction::Write => AccessMode::ReadWrite,
        };
        let access = self.access.unwrap_or(default_access);

        match self.data_type {
            DataType::Reserved => Ok(Element::reserved(register_count)),
            DataType::Bits => {
                if self.bits.is_empty() {
                    return Err(FieldSrvError::config(format!(
                        "Bits element in {component}: no bit bindings declared"
                    )));
                }
                let mut bindings = Vec::with_capacity(self.bits.len());
                for spec in &self.bits {
                    let channel = resolve_channel(
                        registry,
                        local,
                        component,
                        &spec.channel,
                        ChannelKind::Boolean,
                        access,
                        self.unit,
                        direction,
                    )?;
                    bindings.push(BitBinding {
                        bit: spec.bit,
                        channel,
                    });
                }
                Element::bits(bindings)
            }
            DataType::Text => {
                let name = self.channel_name(component)?;
                let kind = self.channel_kind(register_count)?;
                let channel = resolve_channel(
                    registry, local, component, name, kind, access, self.unit, direction,
                )?;
                Element::text(channel, register_count)
            }
            _ => {
                let name = self.channel_name(component)?;
                let kind = self.channel_kind(register_count)?;
                let channel = resolve_channel(
                    registry, local, component, name, kind, access, self.unit, direction,
                )?;
                debug_assert!(self.data_type.numeric());
                Element::number(
                    channel,
                    register_count,
                    self.data_type.signed(),
                    self.data_type.float(),
                    self.order,
                    self.scale,
                )
            }
        }
    }

    fn channel_name(&self, component: &str) -> Result<&str> {
        self.channel.as_deref().ok_or_else(|| {
            FieldSrvError::config(format!(
                "Element of {component}: 'channel' is required for {:?}",
                self.data_type
            ))
        })
    }
}

/// Register a channel, or reuse the handle when the same device already
/// declared it (e.g. a register mapped in both a read and a write task)
#[allow(clippy::too_many_arguments)]
fn resolve_channel(
    registry: &ChannelRegistry,
    local: &mut HashMap<String, Arc<Channel>>,
    component: &str,
    name: &str,
    kind: ChannelKind,
    access: AccessMode,
    unit: Unit,
    direction: Direction,
) -> Result<Arc<Channel>> {
    if let Some(existing) = local.get(name) {
        if direction == Direction::Write && !existing.access().is_writable() {
            return Err(FieldSrvError::config(format!(
                "Channel {component}/{name} is mapped into a write task but was declared {}; \
                 declare access: read_write on its first occurrence",
                existing.access()
            )));
        }
        return Ok(Arc::clone(existing));
    }

    let channel = registry.register(
        Channel::builder(component, name)
            .kind(kind)
            .access(access)
            .unit(unit)
            .build(),
    )?;
    local.insert(name.to_string(), Arc::clone(&channel));
    Ok(channel)
}

impl DeviceConfig {
    /// Build the runtime device: register channels, bind elements, validate
    pub fn build(&self, registry: &ChannelRegistry, settings: &BridgeSettings) -> Result<Device> {
        let mut device = Device::new(
            &self.id,
            self.unit_id,
            registry,
            settings.comm_failed_debounce,
        )?;
        let mut local: HashMap<String, Arc<Channel>> = HashMap::new();

        for task_config in &self.tasks {
            let mut elements = Vec::with_capacity(task_config.elements.len());
            for element_config in &task_config.elements {
                elements.push(element_config.build(
                    &self.id,
                    task_config.direction,
                    registry,
                    &mut local,
                )?);
            }
            let task = match task_config.direction {
                Direction::Read => Task::read(
                    task_config.start,
                    task_config.count,
                    task_config.priority,
                    elements,
                )?,
                Direction::Write => Task::write(task_config.start, task_config.count, elements)?,
            };
            device.add_task(task);
        }
        Ok(device)
    }
}

/// Build the protocol bridge with all configured devices
pub fn build_bridge(config: &FieldSrvConfig, registry: &ChannelRegistry) -> Result<ProtocolBridge> {
    let mut bridge = ProtocolBridge::new(
        config.transport.build_bus(),
        config.bridge.to_bridge_config(),
    );
    for device_config in &config.devices {
        bridge.add_device(device_config.build(registry, &config.bridge)?);
    }
    Ok(bridge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_channel::ChannelAddress;

    const SAMPLE: &str = r#"
cycle_ms: 500
bridge:
  low_priority_tasks_per_cycle: 2
  merge_gap: 2
transport:
  type: mock
devices:
  - id: meter0
    unit_id: 5
    tasks:
      - start: 0
        count: 5
        direction: read
        priority: high
        elements:
          - { type: s32, channel: ActivePower, unit: watt }
          - { type: u16, channel: Frequency, scale: -2, unit: hertz }
          - { type: bits, bits: [ { bit: 0, channel: Running } ] }
          - { type: reserved, words: 1 }
      - start: 100
        count: 1
        direction: write
        elements:
          - { type: s16, channel: SetLimit }
"#;

    fn parse(yaml: &str) -> FieldSrvConfig {
        Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .expect("sample config parses")
    }

    #[test]
    fn test_parse_and_build() {
        let config = parse(SAMPLE);
        config.validate().unwrap();
        assert_eq!(config.cycle_ms, 500);
        assert_eq!(config.bridge.low_priority_tasks_per_cycle, 2);

        let registry = ChannelRegistry::new();
        let bridge = build_bridge(&config, &registry).unwrap();
        assert_eq!(bridge.devices().len(), 1);
        let device = &bridge.devices()[0];
        assert_eq!(device.unit_id(), 5);
        assert_eq!(device.read_tasks().len(), 1);
        assert_eq!(device.write_tasks().len(), 1);

        // Channels registered under the device component, plus the
        // communication state channel.
        for name in [
            "ActivePower",
            "Frequency",
            "Running",
            "SetLimit",
            "CommunicationFailed",
        ] {
            let address: ChannelAddress = format!("meter0/{name}").parse().unwrap();
            assert!(registry.channel(&address).is_some(), "{name} registered");
        }
    }

    #[test]
    fn test_scaled_element_defaults_to_float_channel() {
        let config = parse(SAMPLE);
        let registry = ChannelRegistry::new();
        build_bridge(&config, &registry).unwrap();

        let address: ChannelAddress = "meter0/Frequency".parse().unwrap();
        let channel = registry.channel(&address).unwrap();
        assert!(matches!(channel.kind(), ChannelKind::Float));
    }

    #[test]
    fn test_element_length_mismatch_fails_activation() {
        let yaml = r#"
devices:
  - id: bad0
    unit_id: 1
    tasks:
      - start: 0
        count: 3
        direction: read
        elements:
          - { type: u16, channel: A }
"#;
        let config = parse(yaml);
        let registry = ChannelRegistry::new();
        assert!(matches!(
            build_bridge(&config, &registry),
            Err(FieldSrvError::ConfigError(_))
        ));
    }

    #[test]
    fn test_duplicate_device_id_rejected() {
        let yaml = r#"
devices:
  - { id: a, unit_id: 1 }
  - { id: a, unit_id: 2 }
"#;
        let config = parse(yaml);
        assert!(matches!(
            config.validate(),
            Err(FieldSrvError::ConfigError(_))
        ));
    }

    #[test]
    fn test_read_only_channel_in_write_task_rejected() {
        let yaml = r#"
devices:
  - id: ess0
    unit_id: 1
    tasks:
      - start: 0
        count: 1
        direction: read
        elements:
          - { type: u16, channel: Limit }
      - start: 0
        count: 1
        direction: write
        elements:
          - { type: u16, channel: Limit }
"#;
        let config = parse(yaml);
        let registry = ChannelRegistry::new();
        let err = build_bridge(&config, &registry).unwrap_err();
        assert!(err.to_string().contains("read_write"));
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldsrv.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        std::env::set_var("FIELDSRV_CYCLE_MS", "125");
        let config = FieldSrvConfig::load(&path).expect("config loads");
        std::env::remove_var("FIELDSRV_CYCLE_MS");

        assert_eq!(config.cycle_ms, 125, "environment overrides the file");
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_defaults() {
        let config = parse("cycle_ms: 250");
        assert_eq!(config.bridge.failure_threshold, 3);
        assert_eq!(config.bridge.max_request_registers, 125);
        assert!(matches!(config.transport, TransportSettings::Mock));
        assert!(config.devices.is_empty());
    }
}

//! Gateway configuration file.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use fieldflow_core::config::{RegisterDbConfig, RegisterFilterConf, StorageConfig};
use fieldflow_testing::{SimulatedDevice, SimulatedDeviceKind};

/// Sample configuration printed by `fieldflow example-config`.
pub const EXAMPLE_CONFIG: &str = r#"# fieldflow gateway configuration

# Store holding the latest reading per (device, register)
[state_storage]
name = "state"
input_capacity = 4
subscriber_capacity = 256
# "block" stalls the store behind a slow consumer, "drop_newest" skips
# updates for that consumer instead
overflow = "block"

# Store holding pending commands for writable registers
[command_storage]
name = "commands"

# Settings shared by every per-device register catalog
[register_db]
subscriber_capacity = 16
overflow = "block"

[[devices]]
name = "grid-meter"
kind = "meter"
poll_interval_ms = 1000
variance = 2.0

[[devices]]
name = "pump-relay"
kind = "relay"
poll_interval_ms = 500

[[devices]]
name = "house-battery"
kind = "battery"
poll_interval_ms = 2000
# No variance: identical readings are suppressed after the first
variance = 0.0

# Logs every value of the listed devices
[[consumers]]
name = "console"
devices = ["grid-meter", "house-battery"]
send_initial = true

[consumers.registers]
skip_categories = ["Info"]

# Empty device list means every device
[[consumers]]
name = "controls"
registers = { include_categories = ["Control"], default_include = false }
"#;

fn default_command_storage() -> StorageConfig {
    StorageConfig::named("commands")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub state_storage: StorageConfig,

    #[serde(default = "default_command_storage")]
    pub command_storage: StorageConfig,

    /// Template for every device catalog; the name is replaced by the device name
    #[serde(default)]
    pub register_db: RegisterDbConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
}

/// One simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: SimulatedDeviceKind,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Kind default when omitted
    #[serde(default)]
    pub variance: Option<f64>,
}

impl DeviceConfig {
    pub fn to_device(&self) -> SimulatedDevice {
        let mut device = SimulatedDevice::new(self.name.clone(), self.kind)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));
        if let Some(variance) = self.variance {
            device = device.with_variance(variance);
        }
        device
    }
}

/// One console consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub name: String,
    /// Devices to follow; empty means all
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub registers: RegisterFilterConf,
    /// Replay current state before live updates
    #[serde(default)]
    pub send_initial: bool,
}

impl GatewayConfig {
    /// Read a config file and apply environment overrides to the state store.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.state_storage = config.state_storage.with_env_overrides()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.state_storage.validate()?;
        self.command_storage.validate()?;
        self.register_db.validate()?;

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                bail!("device name must not be empty");
            }
            if !names.insert(device.name.as_str()) {
                bail!("duplicate device name: {}", device.name);
            }
            if device.poll_interval_ms == 0 {
                bail!("device {}: poll_interval_ms must be at least 1", device.name);
            }
            if matches!(device.variance, Some(v) if v < 0.0 || !v.is_finite()) {
                bail!("device {}: variance must be a non-negative number", device.name);
            }
        }

        let mut consumers = HashSet::new();
        for consumer in &self.consumers {
            if !consumers.insert(consumer.name.as_str()) {
                bail!("duplicate consumer name: {}", consumer.name);
            }
            for device in &consumer.devices {
                if !names.contains(device.as_str()) {
                    bail!("consumer {}: unknown device {}", consumer.name, device);
                }
            }
        }
        Ok(())
    }
}

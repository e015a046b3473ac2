//! Device Simulator for Testing
//!
//! Simulates field devices on top of the dataflow core: each device
//! announces its registers in its own [`RegisterDb`], polls readings into
//! the shared state store and obeys commands for its writable registers.
//!
//! Readings are rounded to one decimal, so a device with zero variance
//! publishes identical values every poll and change suppression is
//! observable downstream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use fieldflow_core::{CommandStore, Payload, Register, RegisterDb, Value, ValueStorage};

/// Name of the writable on/off register of a relay
pub const SWITCH: &str = "switch";

/// Runs a set of simulated devices against one state store and one command store.
pub struct DeviceSimulator {
    devices: Vec<SimulatedDevice>,
    catalogs: BTreeMap<String, RegisterDb>,
    state: ValueStorage,
    commands: CommandStore,
}

impl DeviceSimulator {
    pub fn new(state: ValueStorage, commands: CommandStore) -> Self {
        Self {
            devices: Vec::new(),
            catalogs: BTreeMap::new(),
            state,
            commands,
        }
    }

    /// Add a simulated device. Its register catalog is created right away.
    pub fn add_device(&mut self, device: SimulatedDevice) {
        self.catalogs
            .entry(device.name.clone())
            .or_insert_with(|| RegisterDb::new(device.name.clone()));
        self.devices.push(device);
    }

    /// Add a device that announces into an existing catalog.
    pub fn add_device_with_catalog(&mut self, device: SimulatedDevice, catalog: RegisterDb) {
        self.catalogs.insert(device.name.clone(), catalog);
        self.devices.push(device);
    }

    /// Add multiple devices at once
    pub fn add_devices(&mut self, devices: impl IntoIterator<Item = SimulatedDevice>) {
        for device in devices {
            self.add_device(device);
        }
    }

    pub fn devices(&self) -> &[SimulatedDevice] {
        &self.devices
    }

    /// Register catalog of one device
    pub fn catalog(&self, device: &str) -> Option<&RegisterDb> {
        self.catalogs.get(device)
    }

    pub fn catalogs(&self) -> impl Iterator<Item = (&str, &RegisterDb)> {
        self.catalogs.iter().map(|(name, db)| (name.as_str(), db))
    }

    /// Start one task per device. Every task stops once `cancel` fires.
    pub fn start(&self, cancel: &CancellationToken) -> Vec<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Device simulator started with {} devices", self.devices.len());

        self.devices
            .iter()
            .filter_map(|device| {
                let catalog = self.catalogs.get(&device.name)?.clone();
                let device = device.clone();
                let state = self.state.clone();
                let commands = self.commands.clone();
                let cancel = cancel.clone();
                Some(tokio::spawn(async move {
                    device.run(catalog, state, commands, cancel).await
                }))
            })
            .collect()
    }
}

/// Types of simulated devices
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedDeviceKind {
    /// Grid meter: voltage, current, power and a serial number
    Meter,
    /// Switchable relay with a load reading
    Relay,
    /// Battery monitor: voltage, current, state of charge and state
    Battery,
}

impl SimulatedDeviceKind {
    fn registers(self) -> Vec<Register> {
        match self {
            Self::Meter => vec![
                Register::number("Essential", "voltage").with_unit("V").with_sort(0),
                Register::number("Essential", "current").with_unit("A").with_sort(1),
                Register::number("Essential", "power").with_unit("W").with_sort(2),
                Register::text("Info", "serial").with_sort(10),
            ],
            Self::Relay => vec![
                Register::enumeration("Control", SWITCH)
                    .with_enum([(0, "Off"), (1, "On")])
                    .with_description("Relay output")
                    .writable(),
                Register::number("Essential", "load").with_unit("W").with_sort(1),
            ],
            Self::Battery => vec![
                Register::number("Essential", "voltage").with_unit("V").with_sort(0),
                Register::number("Essential", "current").with_unit("A").with_sort(1),
                Register::number("Essential", "soc").with_unit("%").with_sort(2),
                Register::enumeration("Essential", "state")
                    .with_enum([(0, "Idle"), (1, "Charging"), (2, "Discharging")])
                    .with_sort(3),
            ],
        }
    }

    fn base_values(self) -> BTreeMap<String, f64> {
        let values: &[(&str, f64)] = match self {
            Self::Meter => &[("voltage", 230.0), ("current", 5.0)],
            Self::Relay => &[("load", 60.0)],
            Self::Battery => &[("voltage", 12.8), ("current", -2.0), ("soc", 80.0)],
        };
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn default_variance(self) -> f64 {
        match self {
            Self::Meter => 2.0,
            Self::Relay => 5.0,
            Self::Battery => 0.5,
        }
    }
}

impl std::str::FromStr for SimulatedDeviceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "meter" => Ok(Self::Meter),
            "relay" => Ok(Self::Relay),
            "battery" => Ok(Self::Battery),
            other => anyhow::bail!("unknown device kind: {}", other),
        }
    }
}

/// A simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDevice {
    /// Device name, also the device part of every value key
    pub name: String,

    pub kind: SimulatedDeviceKind,

    /// Time between two polls
    pub poll_interval: Duration,

    /// Random fluctuation around each base value
    pub variance: f64,

    /// Base value per numeric register
    pub base_values: BTreeMap<String, f64>,
}

impl SimulatedDevice {
    /// Create a new simulated device
    pub fn new(name: impl Into<String>, kind: SimulatedDeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            poll_interval: Duration::from_secs(1),
            variance: kind.default_variance(),
            base_values: kind.base_values(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_variance(mut self, variance: f64) -> Self {
        self.variance = variance;
        self
    }

    /// Set a custom base value
    pub fn with_base_value(mut self, register: impl Into<String>, value: f64) -> Self {
        self.base_values.insert(register.into(), value);
        self
    }

    /// Registers this device announces, in catalog order
    pub fn registers(&self) -> Vec<Register> {
        self.kind.registers()
    }

    fn jitter(&self, rng: &mut impl Rng, register: &str) -> f64 {
        let base = self.base_values.get(register).copied().unwrap_or_default();
        if self.variance <= 0.0 {
            return round1(base);
        }
        round1(base + rng.gen_range(-self.variance..=self.variance))
    }

    /// One poll worth of readings. `switch_on` only matters for relays.
    pub fn sample(&self, registers: &[Arc<Register>], switch_on: bool) -> Vec<Value> {
        let mut rng = rand::thread_rng();
        let mut readings: BTreeMap<&str, Payload> = BTreeMap::new();

        match self.kind {
            SimulatedDeviceKind::Meter => {
                let voltage = self.jitter(&mut rng, "voltage");
                let current = self.jitter(&mut rng, "current");
                readings.insert("voltage", Payload::Numeric(voltage));
                readings.insert("current", Payload::Numeric(current));
                readings.insert("power", Payload::Numeric(round1(voltage * current)));
                readings.insert("serial", Payload::Text(format!("SIM-{}", self.name)));
            }
            SimulatedDeviceKind::Relay => {
                let load = if switch_on {
                    self.jitter(&mut rng, "load").max(0.0)
                } else {
                    0.0
                };
                readings.insert("load", Payload::Numeric(load));
            }
            SimulatedDeviceKind::Battery => {
                let current = self.jitter(&mut rng, "current");
                let state = if current > 0.05 {
                    1
                } else if current < -0.05 {
                    2
                } else {
                    0
                };
                readings.insert("voltage", Payload::Numeric(self.jitter(&mut rng, "voltage")));
                readings.insert("current", Payload::Numeric(current));
                readings.insert(
                    "soc",
                    Payload::Numeric(self.jitter(&mut rng, "soc").clamp(0.0, 100.0)),
                );
                readings.insert("state", Payload::Enum(state));
            }
        }

        registers
            .iter()
            .filter_map(|register| {
                let payload = readings.remove(register.name.as_str())?;
                Some(Value::new(self.name.clone(), register.clone(), payload))
            })
            .collect()
    }

    /// Announce registers, then poll and serve commands until `cancel` fires.
    pub async fn run(
        self,
        catalog: RegisterDb,
        state: ValueStorage,
        commands: CommandStore,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let registers: Vec<Arc<Register>> = self.registers().into_iter().map(Arc::new).collect();
        catalog.add(registers.iter().cloned()).await;

        // Initial switch state is published once so consumers see it before any command
        let mut switch_on = false;
        if let Some(switch) = registers.iter().find(|r| r.name == SWITCH) {
            state
                .fill(Value::enumeration(self.name.clone(), switch.clone(), 0))
                .await?;
        }

        let mut pending = commands.subscribe_device(&cancel, self.name.clone()).await?;
        let mut tick = interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(device = %self.name, kind = ?self.kind, "simulated device running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    for value in self.sample(&registers, switch_on) {
                        state.fill(value).await?;
                    }
                }
                Some(command) = pending.recv() => {
                    if let Some(on) = self.apply_command(&command) {
                        switch_on = on;
                        let value = Value::enumeration(
                            self.name.clone(),
                            command.register().clone(),
                            i32::from(on),
                        );
                        state.fill(value).await?;
                    }
                    commands.consume(&command).await?;
                }
            }
        }

        tracing::debug!(device = %self.name, "simulated device stopped");
        Ok(())
    }

    /// New switch position requested by `command`, if it is a valid one.
    fn apply_command(&self, command: &Value) -> Option<bool> {
        if command.register().name != SWITCH {
            tracing::warn!(device = %self.name, command = %command, "unsupported command");
            return None;
        }
        match command.enum_idx() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => {
                tracing::warn!(device = %self.name, command = %command, "invalid switch position");
                None
            }
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Builder for creating multiple simulated devices
pub struct DeviceSimulatorBuilder {
    devices: Vec<SimulatedDevice>,
    poll_interval: Duration,
}

impl DeviceSimulatorBuilder {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Poll interval for devices added after this call
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn add(mut self, count: usize, prefix: &str, kind: SimulatedDeviceKind, tag: &str) -> Self {
        for i in 0..count {
            let device = SimulatedDevice::new(format!("{}-{}-{}", prefix, tag, i), kind)
                .with_poll_interval(self.poll_interval);
            self.devices.push(device);
        }
        self
    }

    pub fn add_meters(self, count: usize, prefix: &str) -> Self {
        self.add(count, prefix, SimulatedDeviceKind::Meter, "meter")
    }

    pub fn add_relays(self, count: usize, prefix: &str) -> Self {
        self.add(count, prefix, SimulatedDeviceKind::Relay, "relay")
    }

    pub fn add_batteries(self, count: usize, prefix: &str) -> Self {
        self.add(count, prefix, SimulatedDeviceKind::Battery, "battery")
    }

    /// Build and return the devices
    pub fn build(self) -> Vec<SimulatedDevice> {
        self.devices
    }

    /// Create a simulator with these devices
    pub fn create_simulator(self, state: ValueStorage, commands: CommandStore) -> DeviceSimulator {
        let mut simulator = DeviceSimulator::new(state, commands);
        simulator.add_devices(self.devices);
        simulator
    }
}

impl Default for DeviceSimulatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

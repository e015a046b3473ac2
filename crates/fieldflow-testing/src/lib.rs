//! Testing utilities for fieldflow
//!
//! This crate provides testing tools including:
//! - Device simulator that publishes readings and obeys commands
//! - Register and value fixtures
//! - Async helpers for reading subscriptions in tests

pub mod device_simulator;
pub mod fixtures;
pub mod test_utils;

pub use device_simulator::{
    DeviceSimulator, DeviceSimulatorBuilder, SimulatedDevice, SimulatedDeviceKind,
};

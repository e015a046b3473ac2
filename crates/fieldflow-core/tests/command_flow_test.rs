//! Command direction integration tests
//!
//! A consumer submits commands, a device task actions them and consumes
//! them with a null reset, and the resulting state reaches the state store.

use std::time::Duration;

use fieldflow_core::prelude::*;
use fieldflow_testing::device_simulator::SWITCH;
use fieldflow_testing::fixtures::mode;
use fieldflow_testing::test_utils::{recv_timeout, RECV_TIMEOUT};
use fieldflow_testing::{DeviceSimulatorBuilder, SimulatedDeviceKind};

#[tokio::test]
async fn test_pending_command_replayed_to_late_device() {
    let commands = CommandStore::with_name("commands");
    let off = Value::enumeration("relay-0", mode(), 0);
    commands.submit(off.clone()).await.unwrap();

    let token = CancellationToken::new();
    let mut device = commands.subscribe_device(&token, "relay-0").await.unwrap();
    assert_eq!(recv_timeout(&mut device, RECV_TIMEOUT).await, Some(off.clone()));

    commands.consume(&off).await.unwrap();
    commands.storage().wait().await.unwrap();
    assert!(commands.pending_for("relay-0").await.unwrap().is_empty());

    // The same toggle can be issued again once consumed
    commands.submit(off.clone()).await.unwrap();
    assert_eq!(recv_timeout(&mut device, RECV_TIMEOUT).await, Some(off));
}

#[tokio::test]
async fn test_unconsumed_repeat_is_suppressed() {
    let commands = CommandStore::with_name("commands");
    let token = CancellationToken::new();
    let mut device = commands.subscribe_device(&token, "relay-0").await.unwrap();

    let on = Value::enumeration("relay-0", mode(), 1);
    commands.submit(on.clone()).await.unwrap();
    commands.submit(on.clone()).await.unwrap();
    commands.storage().wait().await.unwrap();

    assert_eq!(recv_timeout(&mut device, RECV_TIMEOUT).await, Some(on));
    assert!(recv_timeout(&mut device, Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_simulated_relay_round_trip() {
    let state = ValueStorage::with_name("state");
    let commands = CommandStore::with_name("commands");
    let simulator = DeviceSimulatorBuilder::new()
        .poll_interval(Duration::from_millis(10))
        .add_relays(1, "site")
        .add_meters(1, "site")
        .create_simulator(state.clone(), commands.clone());
    assert_eq!(simulator.devices()[0].kind, SimulatedDeviceKind::Relay);

    let token = CancellationToken::new();
    let handles = simulator.start(&token);

    let catalog = simulator.catalog("site-relay-0").unwrap();
    let mut registers = catalog.subscribe(&token, RegisterFilter::writable()).await;
    let switch = recv_timeout(&mut registers, RECV_TIMEOUT).await.unwrap();
    assert_eq!(switch.name, SWITCH);

    let mut load = state
        .subscribe(
            &token,
            ValueFilter::device_name("site-relay-0")
                .and(ValueFilter::register(RegisterFilter::names(["load"]))),
        )
        .await
        .unwrap();

    commands
        .submit(Value::enumeration("site-relay-0", switch.clone(), 1))
        .await
        .unwrap();

    // Load goes positive once the relay is on
    let mut switched_on = false;
    for _ in 0..100 {
        match recv_timeout(&mut load, RECV_TIMEOUT).await {
            Some(v) if v.as_numeric().unwrap_or_default() > 0.0 => {
                switched_on = true;
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    assert!(switched_on);

    state.wait().await.unwrap();
    let relay_state = state
        .get_state_filtered(&ValueFilter::device_name("site-relay-0").and(ValueFilter::writable()))
        .await
        .unwrap();
    assert_eq!(relay_state.len(), 1);
    assert_eq!(relay_state[0].enum_text(), Some("On"));

    token.cancel();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

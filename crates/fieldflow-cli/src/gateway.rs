//! Wires stores, simulated devices and console consumers together.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;

use fieldflow_core::prelude::*;
use fieldflow_testing::DeviceSimulator;

use crate::config::{ConsumerConfig, GatewayConfig};

/// Final counters printed when the gateway stops.
#[derive(Debug, Serialize)]
pub struct GatewayReport {
    pub state: StorageStats,
    pub commands: StorageStats,
    /// Values logged per consumer
    pub forwarded: Vec<(String, u64)>,
}

pub struct Gateway {
    state: ValueStorage,
    commands: CommandStore,
    simulator: DeviceSimulator,
    consumers: Vec<ConsumerConfig>,
}

impl Gateway {
    /// Build every store and catalog described by a validated config.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let state = ValueStorage::new(config.state_storage.clone())?;
        let commands = CommandStore::new(config.command_storage.clone())?;

        let mut simulator = DeviceSimulator::new(state.clone(), commands.clone());
        for device in &config.devices {
            let catalog = RegisterDb::with_config(RegisterDbConfig {
                name: device.name.clone(),
                ..config.register_db.clone()
            })?;
            simulator.add_device_with_catalog(device.to_device(), catalog);
        }

        Ok(Self {
            state,
            commands,
            simulator,
            consumers: config.consumers.clone(),
        })
    }

    /// Run until `cancel` fires, then collect final counters.
    pub async fn run(&self, cancel: CancellationToken) -> Result<GatewayReport> {
        let mut forwarders = Vec::with_capacity(self.consumers.len());
        for consumer in &self.consumers {
            let handle = self.spawn_forwarder(consumer, &cancel).await?;
            forwarders.push((consumer.name.clone(), handle));
        }

        let devices = self.simulator.start(&cancel);
        tracing::info!(
            devices = devices.len(),
            consumers = forwarders.len(),
            "gateway running"
        );

        cancel.cancelled().await;
        tracing::info!("gateway stopping");

        for device in devices {
            match device.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("device task failed: {:#}", e),
                Err(e) => tracing::warn!("device task panicked: {}", e),
            }
        }

        let mut forwarded = Vec::with_capacity(forwarders.len());
        for (name, handle) in forwarders {
            let count = handle.await.unwrap_or_else(|e| {
                tracing::warn!(consumer = %name, "forwarder panicked: {}", e);
                0
            });
            forwarded.push((name, count));
        }

        Ok(GatewayReport {
            state: self.state.stats().await?,
            commands: self.commands.storage().stats().await?,
            forwarded,
        })
    }

    /// Subscribe one consumer and log what it receives until cancelled.
    async fn spawn_forwarder(
        &self,
        consumer: &ConsumerConfig,
        cancel: &CancellationToken,
    ) -> Result<JoinHandle<u64>> {
        let filter = consumer_filter(consumer);
        let values = if consumer.send_initial {
            self.state.subscribe_send_initial(cancel, filter).await?
        } else {
            self.state.subscribe(cancel, filter).await?
        };

        let mut catalogs = Vec::new();
        for (device, catalog) in self.simulator.catalogs() {
            if consumer.devices.is_empty() || consumer.devices.iter().any(|d| d == device) {
                let sub = catalog
                    .subscribe(cancel, RegisterFilter::conf(consumer.registers.clone()))
                    .await;
                let device = device.to_string();
                catalogs.push(sub.into_stream().map(move |r| (device.clone(), r)));
            }
        }

        let name = consumer.name.clone();
        Ok(tokio::spawn(async move {
            let mut values = values;
            let mut registers = stream::select_all(catalogs.into_iter().map(StreamExt::boxed));
            let mut forwarded = 0u64;
            loop {
                tokio::select! {
                    value = values.recv() => match value {
                        Some(value) => {
                            forwarded += 1;
                            tracing::info!(
                                consumer = %name,
                                device = %value.device_name(),
                                register = %value.register().name,
                                value = %value.generic(),
                                unit = %value.register().unit,
                                "value"
                            );
                        }
                        None => break,
                    },
                    Some((device, register)) = registers.next() => {
                        tracing::debug!(
                            consumer = %name,
                            device = %device,
                            register = %register.name,
                            category = %register.category,
                            kind = %register.kind,
                            "register discovered"
                        );
                    }
                }
            }
            forwarded
        }))
    }
}

/// Device selection plus the consumer's register include/skip lists.
fn consumer_filter(consumer: &ConsumerConfig) -> ValueFilter {
    let registers = ValueFilter::register_conf(consumer.registers.clone());
    if consumer.devices.is_empty() {
        return registers;
    }
    let devices = consumer.devices.clone();
    ValueFilter::from_fn(move |v| devices.iter().any(|d| d == v.device_name())).and(registers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> GatewayConfig {
        GatewayConfig::parse(
            r#"
            [[devices]]
            name = "m0"
            kind = "meter"
            poll_interval_ms = 10
            variance = 0.0

            [[devices]]
            name = "r0"
            kind = "relay"
            poll_interval_ms = 10

            [[consumers]]
            name = "meter-only"
            devices = ["m0"]
            registers = { skip_categories = ["Info"] }
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_consumer_filter() {
        let config = config();
        let filter = consumer_filter(&config.consumers[0]);

        let volts = std::sync::Arc::new(Register::number("Essential", "voltage"));
        let serial = std::sync::Arc::new(Register::text("Info", "serial"));
        assert!(filter.matches(&Value::numeric("m0", volts.clone(), 1.0)));
        assert!(!filter.matches(&Value::numeric("r0", volts, 1.0)));
        assert!(!filter.matches(&Value::text("m0", serial, "x")));
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let gateway = Gateway::from_config(&config()).unwrap();
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        let report = gateway.run(cancel).await.unwrap();

        // The meter has zero variance: three numeric registers, one change each
        assert_eq!(report.forwarded, vec![("meter-only".to_string(), 3)]);
        assert!(report.state.suppressed > 0);
        assert!(report.state.keys >= 6);
    }
}

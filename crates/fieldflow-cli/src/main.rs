//! Command-line interface for the fieldflow gateway.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fieldflow_core::CancellationToken;

mod config;
mod gateway;

use config::{GatewayConfig, EXAMPLE_CONFIG};
use gateway::{Gateway, GatewayReport};

/// Environment variable that switches logs to JSON lines
const LOG_JSON_ENV: &str = "FIELDFLOW_LOG_JSON";

/// fieldflow - IoT gateway dataflow with simulated devices.
#[derive(Parser, Debug)]
#[command(name = "fieldflow")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway until Ctrl-C or the given duration elapses.
    Run {
        /// Path to the gateway config file.
        #[arg(short, long)]
        config: PathBuf,
        /// Stop after this many seconds.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Parse and validate a config file.
    Validate {
        /// Path to the gateway config file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print a sample config file.
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Run {
            config,
            duration_secs,
        } => run_gateway(config, duration_secs.map(Duration::from_secs)).await,
        Command::Validate { config } => validate_config(config),
        Command::ExampleConfig => {
            print!("{}", EXAMPLE_CONFIG);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    // Check if JSON logging is requested (for production/container environments)
    let json_logging = std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run_gateway(path: PathBuf, duration: Option<Duration>) -> Result<()> {
    let config = GatewayConfig::load(&path)?;
    config.validate()?;
    let gateway = Gateway::from_config(&config)?;

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        match duration {
            Some(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
            }
        }
        stopper.cancel();
    });

    let report = gateway.run(cancel).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &GatewayReport) {
    for (name, stats) in [("state", &report.state), ("commands", &report.commands)] {
        println!(
            "{}: received={} applied={} suppressed={} dropped={} keys={} subscriptions={}",
            name,
            stats.received,
            stats.applied,
            stats.suppressed,
            stats.dropped_deliveries,
            stats.keys,
            stats.subscriptions
        );
    }
    for (consumer, count) in &report.forwarded {
        println!("consumer {}: forwarded={}", consumer, count);
    }
    if let Ok(json) = serde_json::to_string(report) {
        tracing::debug!(report = %json, "final report");
    }
}

fn validate_config(path: PathBuf) -> Result<()> {
    let config = GatewayConfig::load(&path)?;
    config.validate()?;

    println!("Configuration OK: {}", path.display());
    println!(
        "  state store: {} (overflow={})",
        config.state_storage.name, config.state_storage.overflow
    );
    println!(
        "  command store: {} (overflow={})",
        config.command_storage.name, config.command_storage.overflow
    );
    println!("  devices: {}", config.devices.len());
    for device in &config.devices {
        println!(
            "    {} ({:?}, every {}ms)",
            device.name, device.kind, device.poll_interval_ms
        );
    }
    println!("  consumers: {}", config.consumers.len());
    for consumer in &config.consumers {
        let devices = if consumer.devices.is_empty() {
            "all devices".to_string()
        } else {
            consumer.devices.join(", ")
        };
        println!("    {} <- {}", consumer.name, devices);
    }
    Ok(())
}

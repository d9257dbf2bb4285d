//! relayd binary entry point.
//!
//! Usage: relayd --config <destinations.json> [--destination <id>]
//!
//! Reads newline-delimited messages from stdin and hands each one to the
//! configured destinations. On end of input the queues get a bounded amount
//! of time to drain before every backend is shut down.

mod pump;

use anyhow::{bail, Context};
use clap::Parser;
use pump::{drain, pump_lines, Route};
use relay_core::{Dispatcher, RelayConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};

/// relayd: fan stdin messages out to TCP, UDP, MQTT and cloud queue destinations.
#[derive(Parser, Debug)]
#[command(name = "relayd")]
#[command(about = "Relay newline-delimited messages from stdin to configured destinations")]
struct Args {
    /// JSON file describing the destinations.
    #[arg(long, env = "RELAY_CONFIG")]
    config: PathBuf,

    /// Send every line to this destination only. Defaults to all destinations.
    #[arg(long)]
    destination: Option<String>,

    /// Seconds to wait for queues to drain once stdin is closed.
    #[arg(long, env = "RELAY_DRAIN_TIMEOUT_SECS", default_value = "5")]
    drain_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write JSONL logs to this file.
    #[arg(long, env = "RELAY_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "relayd".into(),
        default_level: args.log_level.clone(),
        log_path: args.log_file.clone(),
        also_stderr: true,
    })?;

    info!("relayd starting...");

    let config = RelayConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if config.destinations.is_empty() {
        bail!("{} defines no destinations", args.config.display());
    }

    let dispatcher = Dispatcher::from_config(&config, &relay_transports::default_registry())?;

    let route = match args.destination {
        Some(id) if dispatcher.get(&id).is_none() => bail!("Unknown destination: {id}"),
        Some(id) => Route::Destination(id),
        None => Route::Broadcast,
    };

    // Disabled destinations never connect, so they never drain.
    let watched: Vec<String> = config
        .destinations
        .iter()
        .filter(|(_, backend)| !backend.disabled)
        .map(|(id, _)| id.clone())
        .collect();

    info!(
        config = %args.config.display(),
        destinations = dispatcher.len(),
        route = ?route,
        "Configuration loaded"
    );

    dispatcher.connect_all();

    let stdin = BufReader::new(tokio::io::stdin());
    let interrupted = tokio::select! {
        result = pump_lines(stdin, &dispatcher, &route) => {
            let relayed = result?;
            info!(relayed, "Input closed, draining queues");
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if !interrupted {
        let timeout = Duration::from_secs(args.drain_timeout_secs);
        tokio::select! {
            left = drain(&dispatcher, &watched, timeout) => {
                if left > 0 {
                    warn!(undelivered = left, "Drain timed out with undelivered messages");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting...");
            }
        }
    } else {
        info!("Received shutdown signal, exiting...");
    }

    dispatcher.shutdown().await;
    info!("relayd stopped");
    Ok(())
}

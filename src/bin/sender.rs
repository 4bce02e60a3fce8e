//! Sender process entry point
//!
//! Wires configuration, telemetry, the vendor dispatch engine and the
//! cluster coordinator together, then runs the coordinator status loop
//! until a shutdown signal arrives. Message intake (the RPC surface the
//! API layer pushes messages through) lives outside this crate.

use clap::Parser;
use herald::config::{ComponentFactory, SenderConfig};
use herald::coordinator::{self, UPDATE_PERIOD};
use herald::dispatch::DispatchEngine;
use herald::metrics::MetricsSink;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sender", about = "Herald sender process")]
struct Args {
    /// Path to the sender TOML configuration
    #[arg(long, env = "HERALD_CONFIG", default_value = "sender.toml")]
    config: PathBuf,
    /// Override the advertised host
    #[arg(long)]
    host: Option<String>,
    /// Override the advertised port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> herald::Result<()> {
    herald::telemetry::init_tracing();

    let args = Args::parse();
    let mut config = SenderConfig::from_toml(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| herald::Error::Config(format!("metrics exporter: {}", e)))?;
        info!("Serving Prometheus metrics on {}", addr);
    }

    let sink = Arc::new(MetricsSink::new());
    let registry = ComponentFactory::create_registry(&config)?;
    let engine = Arc::new(DispatchEngine::new(registry, Arc::clone(&sink)));
    info!(
        "Dispatch engine ready with {} vendor instances",
        engine.registry().total_instances()
    );

    let coordinator = ComponentFactory::create_coordinator(&config, Arc::clone(&sink)).await?;
    coordinator.join().await?;
    info!("Joined cluster as {}", config.address());

    let period = if config.update_period_secs > 0 {
        Duration::from_secs(config.update_period_secs)
    } else {
        UPDATE_PERIOD
    };
    let shutdown = CancellationToken::new();
    let status_loop = tokio::spawn(coordinator::run_status_updates(
        Arc::clone(&coordinator),
        Arc::clone(&sink),
        period,
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Err(e) = status_loop.await {
        error!("Coordinator status loop died: {}", e);
        sink.task_failure();
    }
    coordinator.leave_cluster().await;

    info!("Sender shut down cleanly");
    Ok(())
}

//! RPC server binary.
//!
//! ```text
//! load config → build registry → register handlers → serve
//!     → wait for SIGINT/SIGTERM → close (bounded, once) → exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::oneshot;

use rpc_lifecycle::config::{load_config, ServerConfig};
use rpc_lifecycle::lifecycle::{signals, startup};
use rpc_lifecycle::net::{handler_impl, Echo};
use rpc_lifecycle::observability::{logging, metrics};
use rpc_lifecycle::ServiceDesc;

#[derive(Parser)]
#[command(name = "rpc-lifecycle")]
#[command(about = "Multi-service RPC server with bounded graceful shutdown", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level override (ignored when RUST_LOG is set).
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init(level)?;

    tracing::info!(
        config = ?cli.config,
        services = config.services.len(),
        "rpc-lifecycle v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = startup::build_registry(&config);
    if registry.is_empty() {
        tracing::warn!("No services configured");
    }

    registry.register(&ServiceDesc::new("echo"), handler_impl(Echo))?;
    registry.on_shutdown(|| tracing::info!("Shutdown hooks running"));

    let failed = registry.serve()?;
    if !failed.is_empty() {
        tracing::warn!(failed = ?failed, "Some services failed to start");
    }

    let reason = signals::wait_for_signal().await?;
    tracing::info!(signal = %reason, "Shutdown signal received");

    let (ack, acked) = oneshot::channel();
    registry.close(Some(ack)).await?;
    let _ = acked.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

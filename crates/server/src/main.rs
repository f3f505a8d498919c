//! exgw-server binary
//!
//! Loads configuration, initializes tracing, builds the [`Gateway`] for the
//! enabled exchanges, keeps their clock offsets fresh, and serves the HTTP
//! routes until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use exgw_core::config::AppConfig;
use exgw_execution::Gateway;
use exgw_server::server::{run_server, AppState};

/// Multi-exchange REST gateway
#[derive(Parser, Debug)]
#[command(name = "exgw-server", about = "Multi-exchange REST gateway")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config)?;

    exgw_core::logging::init_tracing(config.server.json_logs)
        .context("failed to install tracing subscriber")?;

    let gateway = Arc::new(Gateway::from_config(&config));
    info!(
        exchanges = ?gateway.exchanges(),
        bind_addr = %config.server.bind_addr,
        "starting exgw-server"
    );
    if gateway.exchanges().is_empty() {
        warn!("no exchanges enabled; every gateway call will be rejected");
    }

    gateway.sync_all_clocks().await;

    let cancel = CancellationToken::new();
    let clock_task = gateway.clone().spawn_clock_sync(
        Duration::from_millis(config.clock.sync_interval_ms),
        cancel.clone(),
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                shutdown.cancel();
            }
            Err(err) => warn!(error = %err, "failed to listen for ctrl-c"),
        }
    });

    let state = Arc::new(AppState::new(gateway));
    let served = run_server(state, &config.server.bind_addr, cancel.clone()).await;

    cancel.cancel();
    if let Err(err) = clock_task.await {
        warn!(error = %err, "clock sync task ended abnormally");
    }
    served
}

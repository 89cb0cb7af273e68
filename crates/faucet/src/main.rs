//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use faucet_common::utils::logging::init_logging;
use rsk_faucet::{api, EligibilityTracker, FaucetConfig, FaucetMetrics, FaucetService, Sweeper};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (TOML, JSON or YAML)
    #[arg(short, long, env = "FAUCET_CONFIG")]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Dispense amount (in wei)
    #[arg(long)]
    dispense_amount: Option<String>,

    /// Chain id
    #[arg(long)]
    chain_id: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FaucetConfig::load(args.config.as_deref())?;

    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
        config.port = None;
    }

    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }

    if let Some(amount) = args.dispense_amount {
        config.dispense_amount = amount;
    }

    if let Some(chain_id) = args.chain_id {
        config.chain_id = chain_id;
    }

    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting RSK Faucet v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Server address: {}", config.listen_addr());
    info!("  RPC URL: {}", config.rpc_endpoint());
    info!("  Chain id: {}", config.chain_id);
    info!("  Dispense amount: {} wei", config.dispense_amount);
    info!("  Gas limit: {}", config.gas_limit);
    info!("  Verification: {:?} (fail open: {})", config.verification.mode, config.verification.fail_open);

    let metrics = FaucetMetrics::new().context("Failed to register metrics")?;
    let tracker = Arc::new(EligibilityTracker::new());
    let sweeper = Sweeper::start(tracker.clone(), config.sweep_interval());

    let service = Arc::new(FaucetService::from_config(&config, tracker, metrics)?);
    let app = api::router(service.clone(), config.cors_enabled);

    let addr: SocketAddr = config
        .listen_addr()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("RSK Faucet started on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    sweeper.stop().await;
    service.shutdown().await;
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

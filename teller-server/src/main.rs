//! Teller Server
//!
//! Binds source-chain deposit addresses to destination-chain addresses and
//! pays out every deposit at a fixed exchange rate.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::ConfigLoader;
use server::{build_router, run_server};
use shutdown::shutdown_signal;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use teller_core::backends::{NoopScanner, NoopSender, PooledAllocator};
use teller_core::client::ExchangeClient;
use teller_core::framework::DatabaseProcessor;
use teller_core::processors::ExchangeEngine;
use tokio::sync::{oneshot, watch};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Teller - deposit address binding and cross-chain payout service
#[derive(Parser, Debug)]
#[command(name = "teller-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "TELLER_CONFIG", default_value = "./teller-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting teller-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ConfigLoader::new(&args.config, args.listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Open the deposit store
    tracing::info!("Opening deposit store at {:?}", config.store_path);
    let db = DatabaseProcessor::open(&config.store_path)
        .await
        .map_err(|e| {
            tracing::error!("Failed to open deposit store: {}", e);
            e
        })?;

    let allocator = PooledAllocator::from_file(db.clone(), &config.pool_file)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load address pool {:?}: {}", config.pool_file, e);
            e
        })?;

    // No chain backends are wired in yet: deposits are never observed and
    // payouts stay in awaiting_send.
    let scanner = Arc::new(NoopScanner::new());
    let sender = Arc::new(NoopSender);

    let (engine, commands) = ExchangeEngine::new(db.clone(), config.exchange, scanner, sender);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (engine_done_tx, engine_done_rx) = oneshot::channel::<()>();
    let engine_handle = tokio::spawn(async move {
        let result = engine.run(shutdown_rx).await;
        let _ = engine_done_tx.send(());
        result
    });

    let client = ExchangeClient::new(commands, Arc::new(allocator), config.client);
    let router = build_router(AppState::new(client));

    // Run the server
    tracing::info!("Starting HTTP server on {}", config.listen);
    let shutdown = async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = engine_done_rx => {
                tracing::error!("Exchange engine stopped, shutting down server");
            }
        }
    };
    let result = run_server(router, config.listen, shutdown).await;

    // Stop the engine and let it drain its queues
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Exchange engine already stopped");
    }
    match engine_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Exchange engine failed: {}", e),
        Err(e) => tracing::error!("Exchange engine task panicked: {}", e),
    }

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

//! Gavel - sealed-bid auction indexer.
//!
//! # Usage
//!
//! ```bash
//! # Start against a local node
//! gavel --factory-address 0x5FbDB2315678afecb367f032d93F642f64180aa3
//!
//! # Start with environment overrides
//! DATABASE_URL=postgres://localhost/gavel RPC_URL=ws://localhost:8545 gavel
//! ```

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};

use gavel_core::error::IndexerError;
use gavel_core::metrics::init_metrics;
use gavel_core::models::Address;
use gavel_core::ports::EventSource;
use gavel_core::services::{EventProcessor, IndexerConfig, IndexerService, SubscriptionManager};
use gavel_evm::{EvmClient, EvmClientConfig};
use gavel_storage::{Database, DatabaseConfig, PgRepositories};

/// Gavel CLI - sealed-bid auction indexer.
#[derive(Parser, Debug)]
#[command(name = "gavel")]
#[command(about = "Gavel - sealed-bid auction indexer")]
#[command(version)]
struct Cli {
    /// EVM node WebSocket URL.
    #[arg(long, env = "RPC_URL", default_value = "ws://127.0.0.1:8545")]
    rpc_url: String,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/gavel"
    )]
    database_url: String,

    /// Address of the auction factory contract.
    #[arg(long, env = "FACTORY_ADDRESS", value_parser = parse_address)]
    factory_address: Address,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,

    /// Purge all indexed data from the database and exit.
    ///
    /// This will delete all auctions, commitments, settlements and
    /// notifications. Schema/migrations are preserved.
    #[arg(long)]
    purge: bool,

    /// Skip confirmation prompt for destructive operations (like --purge).
    #[arg(long, short = 'y')]
    yes: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Parse a 0x-prefixed contract address.
fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_hex(s).map_err(|e| format!("Invalid address '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Gavel Indexer");
    debug!(rpc_url = %cli.rpc_url, "EVM endpoint");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    let db_config = DatabaseConfig::for_indexer(&cli.database_url);

    info!("🗄️  Connecting to database...");
    let db = Database::connect(&db_config)
        .await
        .context("Failed to connect to database")?;

    db.migrate().await.context("Failed to run migrations")?;
    info!("🗄️  Database ready (migrations applied)");

    if cli.migrate_only {
        info!("🛑 --migrate-only flag set, exiting");
        return Ok(());
    }

    if cli.purge {
        return handle_purge(&db, cli.yes).await;
    }

    let db = Arc::new(db);
    let repositories = Arc::new(PgRepositories::new(db.clone()));

    // ─────────────────────────────────────────────────────────────────────────
    // 📡 EVM CONNECTION
    // ─────────────────────────────────────────────────────────────────────────
    info!("📡 Connecting to EVM node...");
    let evm_config = EvmClientConfig {
        ws_url: cli.rpc_url.clone(),
    };

    let evm_client = EvmClient::connect(evm_config)
        .await
        .context("Failed to connect to EVM node")?;

    let evm_client = Arc::new(evm_client);

    let chain_id = evm_client.chain_id().await?;
    let head = evm_client.latest_block().await?;

    info!(
        chain_id,
        head,
        factory = %cli.factory_address,
        "🔗 Chain connected"
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let processor = Arc::new(EventProcessor::new(repositories.clone()));
    let subscriptions = Arc::new(SubscriptionManager::new(
        evm_client.clone(),
        repositories.clone(),
        processor,
        shutdown_tx.subscribe(),
    ));

    let indexer_config = IndexerConfig {
        factory: cli.factory_address.clone(),
    };

    let indexer = IndexerService::new(
        indexer_config,
        evm_client.clone(),
        repositories.clone(),
        subscriptions,
    );

    let indexer_shutdown_tx = shutdown_tx.clone();
    let indexer_handle = tokio::spawn(
        async move {
            if let Err(e) = indexer.run(shutdown_rx).await {
                match &e {
                    IndexerError::ShutdownRequested => {}
                    _ => {
                        error!(error = ?e, "❌ Indexer error");
                        // Nothing left to serve once the indexer is dead
                        let _ = indexer_shutdown_tx.send(true);
                    }
                }
            }
        }
        .instrument(info_span!("indexer")),
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Gavel ready");
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    shutdown_signal(shutdown_tx.subscribe()).await;

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(std::time::Duration::from_secs(30), indexer_handle).await {
        Ok(_) => debug!("Indexer stopped"),
        Err(_) => warn!("⚠️  Indexer shutdown timed out"),
    }

    db.close().await;

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for a shutdown trigger: Ctrl+C, SIGTERM, or an internal stop.
async fn shutdown_signal(mut stop_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let internal = async {
        while !*stop_rx.borrow() {
            if stop_rx.changed().await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = internal => {},
    }
}

/// Handle the --purge command.
async fn handle_purge(db: &Database, skip_confirmation: bool) -> Result<()> {
    warn!("⚠️  PURGE MODE: This will delete ALL indexed data!");
    warn!("   - All auctions, commitments, settlements, notifications");
    warn!("   - Schema and migrations will be preserved");

    if !skip_confirmation {
        print!("\n🔴 Are you sure you want to purge all data? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("❌ Purge cancelled");
            return Ok(());
        }
    }

    info!("🗑️  Purging database...");

    let stats = db.purge().await.context("Failed to purge database")?;

    info!("✅ Database purged successfully");
    info!("   ⚖️  Auctions removed: {}", stats.auctions_removed);
    info!("   🔒 Commitments removed: {}", stats.commitments_removed);
    info!("   💸 Settlements removed: {}", stats.settlements_removed);
    info!("   🔔 Notifications removed: {}", stats.notifications_removed);
    info!("   The indexer will start from a clean slate on next run");

    Ok(())
}

//! Transfer market service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the database, and runs the scheduler and HTTP API until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use transfer_market::api;
use transfer_market::clock::SystemClock;
use transfer_market::config;
use transfer_market::engine::scheduler::Scheduler;
use transfer_market::market::TransferMarket;
use transfer_market::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    info!(
        market = %cfg.market.name,
        database = %cfg.database.url,
        settlement_interval_secs = cfg.scheduler.settlement_interval_secs,
        "Transfer market starting up"
    );

    let db = storage::connect(&cfg.database.url, cfg.database.max_connections).await?;
    let market = Arc::new(TransferMarket::new(
        db.clone(),
        Arc::new(SystemClock),
        cfg.transfers.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(market.clone(), &cfg.scheduler);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let api_task = if cfg.api.enabled {
        let state = market.clone();
        let port = cfg.api.port;
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(state, port, rx).await {
                error!(error = %e, "API server exited with error");
            }
        }))
    } else {
        info!("API disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task panicked");
    }
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            error!(error = %e, "API task panicked");
        }
    }

    db.close().await;
    info!("Transfer market shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("transfer_market=info"));

    let json_logging = std::env::var("TRANSFER_MARKET_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

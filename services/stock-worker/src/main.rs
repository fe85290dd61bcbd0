use anyhow::Context;
use common::config::AppConfig;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use stock_engine::{StockReservationService, StockSyncService};
use stock_store::PostgresStockStore;
use tokio::sync::watch;

mod scheduler;

use scheduler::StockScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (.env is read here)
    let config = AppConfig::from_env().context("invalid configuration")?;

    init_telemetry(TelemetryConfig::from(&config))
        .map_err(|e| anyhow::anyhow!("failed to initialise telemetry: {}", e))?;

    tracing::info!(
        service = %config.service_name,
        reservation_ttl_minutes = config.reservations.default_ttl_minutes,
        "Starting stock worker"
    );

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url())
        .await
        .context("failed to connect to PostgreSQL")?;

    tracing::info!("Database connection established");

    tracing::info!("Running stock migrations...");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let store = Arc::new(PostgresStockStore::new(pool));
    let reservations = Arc::new(StockReservationService::new(
        store.clone(),
        &config.reservations,
    ));
    let sync = Arc::new(StockSyncService::new(store, config.sync.page_size));

    let scheduler = StockScheduler::new(
        reservations,
        sync,
        Duration::from_secs(config.reservations.cleanup_interval_secs),
        Duration::from_secs(config.sync.interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;

    tracing::info!("Stock worker stopped");
    shutdown_telemetry();

    Ok(())
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime Broker Archiver
//!
//! Periodically folds the operation history of deleted instances into
//! archive summaries. Request handling lives in the embedding broker; this
//! binary only runs the archive sweep against the shared database.

use anyhow::Result;
use tracing::{error, info};

use runtime_broker_core::archive::ArchiveWorker;
use runtime_broker_core::config::Config;
use runtime_broker_core::store::{SqliteStore, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Runtime Broker Archiver");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        poll_interval_secs = config.archive.poll_interval.as_secs(),
        batch_size = config.archive.batch_size,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let store = SqliteStore::connect(&config.database_url).await?;
    info!("Database connection established, migrations applied");

    let worker = std::sync::Arc::new(ArchiveWorker::new(
        Storage::from_backend(store),
        config.archive.clone(),
    ));
    let shutdown = worker.shutdown_handle();

    let worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    if let Err(e) = worker_handle.await {
        error!("Archive worker task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launchbay Environment - Preview and Deployment Server
//!
//! An HTTP server responsible for:
//! - Preview lifecycle (install, start, status, stop)
//! - Production deploys (provision, build, start, record)
//! - Per-project PostgreSQL provisioning

use std::sync::Arc;
use tracing::{info, warn};

use launchbay_environment::config::Config;
use launchbay_environment::migrations;
use launchbay_environment::runner::{NativeRunner, Runner};
use launchbay_environment::runtime::LaunchbayRuntimeBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "launchbay_environment=info,launchbay=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        projects_dir = %config.projects_dir.display(),
        port_range = ?config.port_range,
        provisioning = config.admin_database_url.is_some(),
        "Starting Launchbay Environment"
    );

    if config.admin_database_url.is_none() {
        warn!("DB_ADMIN_URL is not set; deploys will fail at database provisioning");
    }

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    migrations::run(&pool).await?;

    info!("Database schema verified");

    let runner = Arc::new(NativeRunner::new());
    info!(runner_type = runner.runner_type(), "Runner initialized");

    let runtime = LaunchbayRuntimeBuilder::from_config(&config)
        .pool(pool)
        .runner(runner)
        .build()?
        .start()
        .await?;

    info!(addr = %config.http_addr, "Launchbay server ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Launchbay Environment shut down");

    Ok(())
}

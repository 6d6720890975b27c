// Main entry point for the company-kernel service

use std::sync::Arc;

use anyhow::{Context, Result};
use kernel_core::config::Config;
use kernel_core::kernel::commands::LoggingDispatcher;
use kernel_core::kernel::store::KernelStore;
use kernel_core::server::middleware::resolver_for;
use kernel_core::server::{build_app, build_state};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kernel_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting company-kernel mission control plane");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(db_path = %config.db_path, "Configuration loaded");

    // Open the durable store and apply migrations
    let store = KernelStore::connect(&config.db_path)
        .await
        .context("Failed to open kernel database")?;
    store
        .migrate()
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Store ready");

    // Build application
    let resolver = resolver_for(&config.auth_mode);
    let state = build_state(store, resolver, Arc::new(LoggingDispatcher));
    let app = build_app(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received shutdown signal");
}

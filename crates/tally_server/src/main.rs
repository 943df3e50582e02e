//! TALLY server binary

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tally_runtime::AggregationEngine;
use tally_server::{AppState, ServerConfig, router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_tracing(&config);

    let engine = Arc::new(AggregationEngine::start(config.runtime_config()));
    info!(
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        job_ttl_secs = ?config.job_ttl_secs,
        schemas = engine.registry().len(),
        "Engine started"
    );

    let app = router(AppState::new(Arc::clone(&engine)), config.permissive_cors);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    info!(address = %config.bind, "Starting TALLY server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    engine.shutdown().await;
    info!("Server shut down");
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! trawl-fetch entry point.
//!
//! Loads configuration, assembles the fetch pipeline and serves it over
//! HTTP. Logs are JSON on stderr, filtered by `RUST_LOG`.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use trawl_core::AppConfig;

mod error;
mod handler;
mod pipeline;

use handler::AppState;
use pipeline::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let pipeline = Pipeline::build(&config).await?;

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(listen = %config.listen, storage = %config.storage.kind, "starting trawl-fetch");

    let app = handler::router(AppState { service: pipeline.service.clone() });
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("shutting down");
    pipeline.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}

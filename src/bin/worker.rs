//! Standalone worker for split deployments.
//!
//! Pulls tasks from the shared Redis queue and records progress in Postgres,
//! so any number of these can run next to API servers started with
//! `EMBEDDED_WORKER=false`.

use meshgen_api::{
    app_state::AppState,
    config::AppConfig,
    services::worker::{WorkerPool, WorkerSettings},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting generation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if !AppState::is_distributed(&config) {
        tracing::error!(
            "Standalone workers need DATABASE_URL and REDIS_URL; in-memory state is not shared between processes"
        );
        std::process::exit(1);
    }

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize worker state");

    let pool = WorkerPool::spawn(state, WorkerSettings::from_config(&config));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown signal received, finishing in-flight jobs");
    pool.shutdown().await;
}

use axum::routing::get;
use tracing_subscriber::EnvFilter;

use meshgen_api::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::worker::{WorkerPool, WorkerSettings},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing meshgen-api server");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize application state");

    let workers = if config.embedded_worker {
        Some(WorkerPool::spawn(
            state.clone(),
            WorkerSettings::from_config(&config),
        ))
    } else {
        tracing::info!("Embedded worker disabled, jobs run in standalone workers");
        None
    };

    let app = routes::router(state, config.max_body_bytes).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    if let Some(workers) = workers {
        tracing::info!("Waiting for in-flight jobs to finish");
        workers.shutdown().await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

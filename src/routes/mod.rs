use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod generate;
pub mod health;
pub mod metrics;
pub mod outputs;

/// Build the API routes with the standard middleware stack.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/generate", post(generate::submit_generation))
        .route("/status/{job_id}", get(generate::get_job_status))
        .route("/outputs/{job_id}/{name}", get(outputs::download_output))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

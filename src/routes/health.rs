use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub job_store: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_probe<E: std::fmt::Display>(result: Result<(), E>, start: std::time::Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Health probe failed");
                Self {
                    status: "error".to_string(),
                    latency_ms: None,
                }
            }
        }
    }
}

/// GET /health: liveness probe with dependency status.
///
/// Always answers 200 while the process is up; a failing dependency only
/// degrades the reported status.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let start = std::time::Instant::now();
    let job_store = ComponentHealth::from_probe(state.jobs.health_check().await, start);

    let start = std::time::Instant::now();
    let queue = ComponentHealth::from_probe(state.queue.health_check().await, start);

    let all_healthy = job_store.status == "ok" && queue.status == "ok";

    Json(HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { job_store, queue },
    })
}

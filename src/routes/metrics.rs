use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe the job metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(
        "generation_jobs_submitted_total",
        "Total generation jobs accepted"
    );
    metrics::describe_counter!(
        "generation_jobs_completed_total",
        "Total generation jobs that produced a model"
    );
    metrics::describe_counter!(
        "generation_jobs_failed_total",
        "Total generation jobs that failed"
    );
    metrics::describe_histogram!(
        "generation_job_duration_seconds",
        "Time from dequeue to terminal state"
    );
    metrics::describe_gauge!(
        "generation_queue_depth",
        "Current number of pending tasks in the queue"
    );

    Ok(Arc::new(handle))
}

/// GET /metrics: Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

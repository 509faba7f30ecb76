use std::path::Path;

use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::generation::GenerateRequest;
use crate::models::job::GenerationJob;
use crate::services::queue::QueuedTask;
use crate::services::storage::{validate_file_name, validate_output_name};

/// Accept a generation request: validate it, record the job and queue its task.
///
/// Nothing is written unless every referenced input exists. Returns as soon
/// as the task is queued; the worker may not have picked it up yet.
pub async fn submit(state: &AppState, request: GenerateRequest) -> ApiResult<GenerationJob> {
    request
        .validate()
        .map_err(|report| ApiError::Validation(report.to_string()))?;

    let prompt = request
        .prompt
        .ok_or_else(|| ApiError::Validation("prompt is required".to_string()))?;
    let image_filenames = request
        .image_filenames
        .ok_or_else(|| ApiError::Validation("image_filenames is required".to_string()))?;

    for name in &image_filenames {
        validate_file_name(name)?;
    }
    let output_name = request
        .output_filename
        .map(|name| normalize_output_name(&name))
        .transpose()?;

    for name in &image_filenames {
        if !state.inputs.exists(name).await? {
            tracing::info!(missing = %name, "Rejected submission with missing input");
            return Err(ApiError::InputNotFound(name.clone()));
        }
    }

    let job = state.jobs.create(prompt, image_filenames, output_name).await?;
    let task = QueuedTask {
        job_id: job.id,
        prompt: job.prompt.clone(),
        input_keys: job.input_keys.clone(),
        output_key: job.artifact_key(),
    };

    if let Err(e) = state.queue.enqueue(&task).await {
        if let Err(discard_err) = state.jobs.discard(job.id).await {
            tracing::error!(job_id = %job.id, error = %discard_err, "Failed to discard unqueued job");
        }
        tracing::warn!(job_id = %job.id, error = %e, "Failed to enqueue generation job");
        return Err(e.into());
    }

    metrics::counter!("generation_jobs_submitted_total").increment(1);
    if let Ok(depth) = state.queue.depth().await {
        metrics::gauge!("generation_queue_depth").set(depth as f64);
    }

    tracing::info!(
        job_id = %job.id,
        inputs = job.input_keys.len(),
        output = %task.output_key,
        "Generation job queued"
    );

    Ok(job)
}

/// Look up a job by its textual id. Anything that is not a known id is a 404.
pub async fn status(state: &AppState, job_id: &str) -> ApiResult<GenerationJob> {
    let id = Uuid::parse_str(job_id).map_err(|_| ApiError::JobNotFound(job_id.to_string()))?;
    state
        .jobs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::JobNotFound(job_id.to_string()))
}

/// URL-safe file name, `.glb` appended when it carries no extension.
fn normalize_output_name(name: &str) -> ApiResult<String> {
    validate_output_name(name)?;
    if Path::new(name).extension().is_some() {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}.glb"))
    }
}

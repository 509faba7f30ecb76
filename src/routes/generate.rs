use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::generation::{GenerateRequest, GenerateResponse, JobStatusResponse};
use crate::services::submission;

/// POST /generate: queue a 3D generation job for existing input images.
pub async fn submit_generation(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<GenerateResponse>)> {
    let Json(request) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;

    let job = submission::submit(&state, request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            job_id: job.id,
            status: job.status,
            message: "3D generation job queued".to_string(),
        }),
    ))
}

/// GET /status/{job_id}: current state of a generation job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = submission::status(&state, &job_id).await?;
    Ok(Json(JobStatusResponse::from_job(&job, &state.public_base_url)))
}

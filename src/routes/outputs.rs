use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::services::generator::GLB_CONTENT_TYPE;
use crate::services::storage::{validate_file_name, StorageError};

/// GET /outputs/{job_id}/{name}: download a generated model.
pub async fn download_output(
    State(state): State<AppState>,
    Path((job_id, name)): Path<(String, String)>,
) -> ApiResult<Response> {
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| ApiError::OutputNotFound(format!("{job_id}/{name}")))?;
    validate_file_name(&name)?;
    let key = format!("{job_id}/{name}");

    let data = match state.outputs.download(&key).await {
        Ok(data) => data,
        Err(StorageError::NotFound(_)) => return Err(ApiError::OutputNotFound(key)),
        Err(e) => return Err(e.into()),
    };

    let headers = [
        (header::CONTENT_TYPE, GLB_CONTENT_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        ),
    ];
    Ok((headers, data).into_response())
}

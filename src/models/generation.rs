use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{GenerationJob, JobStatus};

/// Request body for `POST /generate`.
///
/// Required fields are optional here so that a missing field is reported as a
/// validation error rather than a body rejection.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct GenerateRequest {
    #[garde(length(chars, min = 1, max = 2000))]
    #[serde(default)]
    pub prompt: Option<String>,

    #[garde(length(min = 1, max = 16))]
    #[serde(default)]
    pub image_filenames: Option<Vec<String>>,

    #[garde(length(chars, min = 1, max = 255))]
    #[serde(default)]
    pub output_filename: Option<String>,
}

/// Response after submitting a generation job.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub prompt: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl JobStatusResponse {
    /// Render a job for clients, resolving the output key against the public
    /// artifact route.
    pub fn from_job(job: &GenerationJob, public_base_url: &str) -> Self {
        let output_url = match (job.status, job.output_key.as_deref()) {
            (JobStatus::Completed, Some(key)) => Some(format!(
                "{}/outputs/{}",
                public_base_url.trim_end_matches('/'),
                key
            )),
            _ => None,
        };
        let error = match job.status {
            JobStatus::Failed => job.error.clone(),
            _ => None,
        };

        Self {
            job_id: job.id,
            status: job.status,
            prompt: job.prompt.clone(),
            submitted_at: job.submitted_at,
            completed_at: job.completed_at,
            output_url,
            error,
        }
    }
}

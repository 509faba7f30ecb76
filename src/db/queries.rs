use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{GenerationJob, InvalidTransition, JobStatus, JobUpdate};
use crate::services::job_store::{JobStore, StoreError};

/// Job store backed by the `generation_jobs` table.
///
/// Transitions are a single conditional `UPDATE`, so the forward-only rule is
/// enforced by the database even with several worker processes.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<GenerationJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Corrupt(format!("unknown status {status_str:?}")))?;

    Ok(GenerationJob {
        id: row.try_get("id")?,
        status,
        prompt: row.try_get("prompt")?,
        input_keys: row.try_get("input_keys")?,
        output_name: row.try_get("output_name")?,
        output_key: row.try_get("output_key")?,
        error: row.try_get("error")?,
        submitted_at: row.try_get("submitted_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(
        &self,
        prompt: String,
        input_keys: Vec<String>,
        output_name: Option<String>,
    ) -> Result<GenerationJob, StoreError> {
        let job = GenerationJob::new(prompt, input_keys, output_name);
        sqlx::query(
            r#"
            INSERT INTO generation_jobs (id, status, prompt, input_keys, output_name, submitted_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.prompt)
        .bind(&job.input_keys)
        .bind(&job.output_name)
        .bind(job.submitted_at)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<GenerationJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, prompt, input_keys, output_name, output_key, error,
                   submitted_at, updated_at, completed_at
            FROM generation_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<GenerationJob, StoreError> {
        let next = update.target();
        let allowed: Vec<String> = update
            .allowed_from()
            .into_iter()
            .map(|status| status.as_str().to_string())
            .collect();
        let (output_key, error) = match update {
            JobUpdate::Stage(_) => (None, None),
            JobUpdate::Complete { output_key } => (Some(output_key), None),
            JobUpdate::Fail { error } => (None, Some(error)),
        };

        let row = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = $2,
                output_key = COALESCE($3, output_key),
                error = COALESCE($4, error),
                completed_at = CASE WHEN $2 IN ('completed', 'failed') THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            RETURNING id, status, prompt, input_keys, output_name, output_key, error,
                      submitted_at, updated_at, completed_at
            "#,
        )
        .bind(id)
        .bind(next.as_str())
        .bind(output_key)
        .bind(error)
        .bind(&allowed)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => match self.get(id).await? {
                Some(current) => Err(InvalidTransition {
                    from: current.status,
                    to: next,
                }
                .into()),
                None => Err(StoreError::NotFound(id)),
            },
        }
    }

    async fn discard(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM generation_jobs WHERE id = $1 AND status = 'queued'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM generation_jobs
            WHERE status IN ('completed', 'failed') AND completed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{GenerationJob, InvalidTransition, JobUpdate};

/// Index of generation jobs keyed by id.
///
/// `create` and `discard` belong to the submission path; `update` belongs to
/// whichever worker owns the job. Every `update` is applied atomically: a
/// reader sees either the whole transition or none of it.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(
        &self,
        prompt: String,
        input_keys: Vec<String>,
        output_name: Option<String>,
    ) -> Result<GenerationJob, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<GenerationJob>, StoreError>;

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<GenerationJob, StoreError>;

    /// Remove a record that was never handed to a worker.
    async fn discard(&self, id: Uuid) -> Result<(), StoreError>;

    /// Drop terminal jobs that finished before `cutoff`. Returns how many were removed.
    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Process-local job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, GenerationJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        prompt: String,
        input_keys: Vec<String>,
        output_name: Option<String>,
    ) -> Result<GenerationJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = loop {
            let candidate = GenerationJob::new(prompt.clone(), input_keys.clone(), output_name.clone());
            if !jobs.contains_key(&candidate.id) {
                break candidate;
            }
        };
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<GenerationJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<GenerationJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.apply(update, Utc::now())?;
        Ok(job.clone())
    }

    async fn discard(&self, id: Uuid) -> Result<(), StoreError> {
        self.jobs.write().await.remove(&id);
        Ok(())
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

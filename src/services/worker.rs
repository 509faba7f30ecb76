//! Background execution of generation tasks.
//!
//! Each worker pulls one task at a time and is the only writer of that job's
//! record until it reaches a terminal state. With the default pool size of one,
//! jobs run strictly in submission order and the generator is never shared.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::AppConfig;
use crate::models::job::{JobStatus, JobUpdate};
use crate::services::generator::GenerationError;
use crate::services::job_store::StoreError;
use crate::services::queue::{QueueError, QueuedTask};
use crate::services::storage::StorageError;

/// Attempts at writing a job's terminal state before giving up on it.
const TERMINAL_WRITE_ATTEMPTS: u32 = 4;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub workers: usize,
    /// How long one dequeue attempt waits before re-checking for shutdown.
    pub poll_interval: Duration,
    pub job_timeout: Option<Duration>,
    pub retention: Option<Duration>,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.worker_count.max(1),
            poll_interval: config.poll_interval(),
            job_timeout: config.job_timeout(),
            retention: config.job_retention(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval: Duration::from_secs(1),
            job_timeout: Some(Duration::from_secs(600)),
            retention: None,
        }
    }
}

/// Handle to the running workers (and the retention sweeper, if enabled).
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(state: AppState, settings: WorkerSettings) -> Self {
        let (shutdown, signal) = watch::channel(false);
        let mut handles = Vec::with_capacity(settings.workers + 1);

        for worker in 0..settings.workers.max(1) {
            handles.push(tokio::spawn(run_worker(
                worker,
                state.clone(),
                settings.clone(),
                signal.clone(),
            )));
        }

        if let Some(ttl) = settings.retention {
            handles.push(tokio::spawn(run_retention_sweeper(state, ttl, signal)));
        }

        tracing::info!(workers = settings.workers, "Worker pool started");
        Self { shutdown, handles }
    }

    /// Stop taking new tasks and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    state: AppState,
    settings: WorkerSettings,
    shutdown: watch::Receiver<bool>,
) {
    tracing::info!(worker, "Worker ready, starting job processing loop");

    // Shutdown is only checked between dequeue attempts, so a running job is
    // never interrupted.
    while !*shutdown.borrow() {
        match process_next_job(&state, &settings).await {
            Ok(true) => {
                tracing::debug!(worker, "Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!(worker, "No jobs available");
            }
            Err(e) => {
                tracing::error!(worker, error = %e, "Error processing job");
                tokio::time::sleep(settings.poll_interval).await;
            }
        }
    }
}

/// Process the next task from the queue.
/// Returns Ok(true) if a task was processed, Ok(false) if none arrived in time.
pub async fn process_next_job(state: &AppState, settings: &WorkerSettings) -> Result<bool, WorkerError> {
    let task = match state.queue.dequeue(settings.poll_interval).await? {
        Some(task) => task,
        None => return Ok(false),
    };

    if let Ok(depth) = state.queue.depth().await {
        metrics::gauge!("generation_queue_depth").set(depth as f64);
    }

    // The task is acknowledged whatever the outcome, so it is never redelivered.
    let outcome = run_job(state, &task, settings.job_timeout).await;
    state.queue.complete(&task).await?;
    outcome?;
    Ok(true)
}

/// Drive one job to a terminal state. Returns that state.
///
/// Execution failures end up in the job record; only store failures are
/// returned as errors.
pub async fn run_job(
    state: &AppState,
    task: &QueuedTask,
    timeout: Option<Duration>,
) -> Result<JobStatus, WorkerError> {
    tracing::info!(
        job_id = %task.job_id,
        inputs = task.input_keys.len(),
        output = %task.output_key,
        "Processing generation job"
    );
    let started = Instant::now();

    let mut scratch_keys = Vec::new();
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, execute(state, task, &mut scratch_keys))
            .await
            .unwrap_or(Err(ProcessingError::TimedOut(limit))),
        None => execute(state, task, &mut scratch_keys).await,
    };

    release_scratch(state, task, &scratch_keys).await;

    let elapsed = started.elapsed();
    metrics::histogram!("generation_job_duration_seconds").record(elapsed.as_secs_f64());

    match outcome {
        Ok(()) => {
            record_outcome(
                state,
                task.job_id,
                JobUpdate::Complete {
                    output_key: task.output_key.clone(),
                },
            )
            .await?;
            metrics::counter!("generation_jobs_completed_total").increment(1);
            tracing::info!(
                job_id = %task.job_id,
                duration_ms = elapsed.as_millis() as u64,
                output = %task.output_key,
                "Job completed successfully"
            );
            Ok(JobStatus::Completed)
        }
        Err(e) => {
            tracing::error!(job_id = %task.job_id, error = %e, "Job processing failed");
            record_outcome(state, task.job_id, JobUpdate::Fail { error: e.to_string() }).await?;
            metrics::counter!("generation_jobs_failed_total").increment(1);
            Ok(JobStatus::Failed)
        }
    }
}

/// Write a job's terminal state, retrying transient store failures with
/// exponential backoff.
async fn record_outcome(state: &AppState, job_id: Uuid, update: JobUpdate) -> Result<(), StoreError> {
    let mut delay = TERMINAL_WRITE_BACKOFF;
    let mut attempt = 1;
    loop {
        match state.jobs.update(job_id, update.clone()).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_transient() && attempt < TERMINAL_WRITE_ATTEMPTS => {
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    error = %e,
                    "Failed to record job outcome, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Giving up on recording job outcome");
                return Err(e);
            }
        }
    }
}

/// Background removal, mesh generation and artifact upload.
///
/// Every scratch key is recorded before it is written so the caller can clean
/// up after a failure or timeout.
async fn execute(
    state: &AppState,
    task: &QueuedTask,
    scratch_keys: &mut Vec<String>,
) -> Result<(), ProcessingError> {
    state
        .jobs
        .update(task.job_id, JobUpdate::Stage(JobStatus::ProcessingBackgroundRemoval))
        .await?;

    for (index, input_key) in task.input_keys.iter().enumerate() {
        tracing::debug!(job_id = %task.job_id, input = %input_key, "Removing background");
        let original = state.inputs.download(input_key).await?;
        let processed = state.generator.remove_background(original).await?;

        let scratch_key = format!("{}/{}.png", task.job_id, index);
        scratch_keys.push(scratch_key.clone());
        state.scratch.upload(&scratch_key, &processed, "image/png").await?;
    }

    state
        .jobs
        .update(task.job_id, JobUpdate::Stage(JobStatus::Processing3dGeneration))
        .await?;

    let mut images = Vec::with_capacity(scratch_keys.len());
    for key in scratch_keys.iter() {
        images.push(state.scratch.download(key).await?);
    }

    tracing::debug!(job_id = %task.job_id, generator = state.generator.name(), "Generating mesh");
    let mesh = state.generator.generate_mesh(&task.prompt, images).await?;
    state
        .generator
        .save(&mesh, state.outputs.as_ref(), &task.output_key)
        .await?;
    Ok(())
}

async fn release_scratch(state: &AppState, task: &QueuedTask, keys: &[String]) {
    for key in keys {
        if let Err(e) = state.scratch.delete(key).await {
            tracing::warn!(job_id = %task.job_id, key = %key, error = %e, "Failed to delete scratch artifact");
        }
    }
}

async fn run_retention_sweeper(state: AppState, ttl: Duration, mut shutdown: watch::Receiver<bool>) {
    let Ok(max_age) = chrono::Duration::from_std(ttl) else {
        tracing::warn!(ttl_secs = ttl.as_secs(), "Retention period out of range, sweeper disabled");
        return;
    };
    let mut ticker = tokio::time::interval(ttl.min(Duration::from_secs(60)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let cutoff = chrono::Utc::now() - max_age;
        match state.jobs.purge_finished_before(cutoff).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "Purged expired jobs"),
            Err(e) => tracing::error!(error = %e, "Failed to purge expired jobs"),
        }
    }
}

/// Why a job failed; the message is stored on the job record.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("{0}")]
    Generation(#[from] GenerationError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("job timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Infrastructure failures that stop a worker from recording job progress.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

use std::sync::Arc;

use crate::config::{AppConfig, StorageBackend};
use crate::db::{self, queries::PgJobStore};
use crate::services::{
    generator::{GenerationAdapter, GenerationError, LocalGenerator, RemoteGenerator},
    job_store::{JobStore, MemoryJobStore},
    queue::{MemoryQueue, QueueError, RedisQueue, TaskQueue},
    storage::{LocalStore, ObjectStore, R2Store, StorageError},
};

/// Shared application state passed to route handlers and workers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
    /// Source images referenced by submissions.
    pub inputs: Arc<dyn ObjectStore>,
    /// Background-removed intermediates, deleted once a job ends.
    pub scratch: Arc<dyn ObjectStore>,
    /// Generated models.
    pub outputs: Arc<dyn ObjectStore>,
    pub generator: Arc<dyn GenerationAdapter>,
    pub public_base_url: Arc<str>,
}

/// Object stores for the three artifact kinds.
pub struct Stores {
    pub inputs: Arc<dyn ObjectStore>,
    pub scratch: Arc<dyn ObjectStore>,
    pub outputs: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        stores: Stores,
        generator: Arc<dyn GenerationAdapter>,
        public_base_url: &str,
    ) -> Self {
        Self {
            jobs,
            queue,
            inputs: stores.inputs,
            scratch: stores.scratch,
            outputs: stores.outputs,
            generator,
            public_base_url: Arc::from(public_base_url.trim_end_matches('/')),
        }
    }

    /// Build every backend selected by `config`.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let jobs: Arc<dyn JobStore> = match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL job store");
                let pool = db::init_pool(url, config.worker_count.max(1)).await?;
                tracing::info!("Running database migrations");
                db::run_migrations(&pool).await?;
                Arc::new(PgJobStore::new(pool))
            }
            None => {
                tracing::info!("Using in-memory job store");
                Arc::new(MemoryJobStore::new())
            }
        };

        let queue: Arc<dyn TaskQueue> = match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting to Redis task queue");
                Arc::new(RedisQueue::new(
                    url,
                    config.queue_capacity(),
                    config.poll_interval(),
                )?)
            }
            None => {
                tracing::info!(capacity = ?config.queue_capacity(), "Using in-memory task queue");
                Arc::new(MemoryQueue::new(config.queue_capacity()))
            }
        };

        let stores = build_stores(config).await?;

        let generator: Arc<dyn GenerationAdapter> = match &config.generator_url {
            Some(url) => {
                tracing::info!(generator_url = %url, "Using remote generator");
                Arc::new(RemoteGenerator::new(url, config.job_timeout())?)
            }
            None => {
                tracing::info!("Using built-in placeholder generator");
                Arc::new(LocalGenerator::new())
            }
        };

        Ok(Self::new(jobs, queue, stores, generator, &config.public_base_url))
    }

    /// True when both the job store and the queue can be shared across processes.
    pub fn is_distributed(config: &AppConfig) -> bool {
        config.database_url.is_some() && config.redis_url.is_some()
    }
}

async fn build_stores(config: &AppConfig) -> Result<Stores, StartupError> {
    let backend = config
        .storage()
        .map_err(|_| StartupError::Config(format!("unknown STORAGE_BACKEND {:?}", config.storage_backend)))?;

    match backend {
        StorageBackend::Local => {
            tracing::info!(
                input_dir = %config.input_dir,
                output_dir = %config.output_dir,
                scratch_dir = %config.scratch_dir,
                "Using local storage"
            );
            Ok(Stores {
                inputs: Arc::new(LocalStore::new(&config.input_dir).await?),
                scratch: Arc::new(LocalStore::new(&config.scratch_dir).await?),
                outputs: Arc::new(LocalStore::new(&config.output_dir).await?),
            })
        }
        StorageBackend::R2 => {
            let required = |value: &Option<String>, name: &str| {
                value
                    .clone()
                    .ok_or_else(|| StartupError::Config(format!("{name} is required for R2 storage")))
            };
            let bucket = required(&config.r2_bucket, "R2_BUCKET")?;
            let endpoint = required(&config.r2_endpoint, "R2_ENDPOINT")?;
            let access_key = required(&config.r2_access_key, "R2_ACCESS_KEY")?;
            let secret_key = required(&config.r2_secret_key, "R2_SECRET_KEY")?;

            tracing::info!(bucket = %bucket, "Using R2 storage");
            let store = |prefix: &str| -> Result<Arc<dyn ObjectStore>, StartupError> {
                Ok(Arc::new(R2Store::new(
                    &bucket,
                    &endpoint,
                    &access_key,
                    &secret_key,
                    prefix,
                )?))
            };
            Ok(Stores {
                inputs: store("inputs")?,
                scratch: store("scratch")?,
                outputs: store("outputs")?,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generator error: {0}")]
    Generator(#[from] GenerationError),
}

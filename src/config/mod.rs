use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use strum::{Display, EnumString};

/// Where input images, scratch artifacts and generated models live.
#[derive(Debug, Clone, Copy, PartialEq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StorageBackend {
    Local,
    R2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prefix for the `output_url` handed to clients.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// "local" or "r2"
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,

    /// Local directory holding submitted source images
    #[serde(default = "default_input_dir")]
    pub input_dir: String,

    /// Local directory receiving generated models
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Local directory for background-removed intermediates
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    pub r2_bucket: Option<String>,
    pub r2_endpoint: Option<String>,
    pub r2_access_key: Option<String>,
    pub r2_secret_key: Option<String>,

    /// PostgreSQL connection string. Jobs are kept in memory when unset.
    pub database_url: Option<String>,

    /// Redis connection string. Tasks are queued in memory when unset.
    pub redis_url: Option<String>,

    /// Base URL of a remote inference server. The built-in generator is used when unset.
    pub generator_url: Option<String>,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Maximum pending tasks, 0 for unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-job timeout in seconds, 0 to disable.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Purge finished jobs older than this. Kept forever when unset.
    pub job_retention_secs: Option<u64>,

    /// Run the worker pool inside the API process.
    #[serde(default = "default_embedded_worker")]
    pub embedded_worker: bool,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_input_dir() -> String {
    "uploads".to_string()
}

fn default_output_dir() -> String {
    "outputs".to_string()
}

fn default_scratch_dir() -> String {
    "scratch".to_string()
}

fn default_worker_count() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    100
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_embedded_worker() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn storage(&self) -> Result<StorageBackend, strum::ParseError> {
        StorageBackend::from_str(&self.storage_backend)
    }

    pub fn queue_capacity(&self) -> Option<usize> {
        (self.queue_capacity > 0).then_some(self.queue_capacity)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn job_retention(&self) -> Option<Duration> {
        self.job_retention_secs.map(Duration::from_secs)
    }
}

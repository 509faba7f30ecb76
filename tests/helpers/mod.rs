//! Test helpers for driving a live server over HTTP

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshgen_api::{
    app_state::{AppState, Stores},
    models::job::JobStatus,
    routes,
    services::{
        generator::{GenerationAdapter, GenerationError, Mesh},
        job_store::MemoryJobStore,
        queue::MemoryQueue,
        storage::{LocalStore, ObjectStore},
        worker::{WorkerPool, WorkerSettings},
    },
};
use serde::Deserialize;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from POST /generate
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response from GET /status/{job_id}
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub prompt: String,
    pub submitted_at: String,
    pub completed_at: Option<String>,
    pub output_url: Option<String>,
    pub error: Option<String>,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Generator stand-in: passes images through and emits a tiny fake GLB.
pub struct StubGenerator {
    pub mesh_delay: Duration,
    pub fail_mesh: bool,
}

#[async_trait]
impl GenerationAdapter for StubGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn remove_background(&self, image: Vec<u8>) -> Result<Vec<u8>, GenerationError> {
        Ok(image)
    }

    async fn generate_mesh(&self, prompt: &str, images: Vec<Vec<u8>>) -> Result<Mesh, GenerationError> {
        sleep(self.mesh_delay).await;
        if self.fail_mesh {
            return Err(GenerationError::InvalidOutput("mesh backend unavailable".to_string()));
        }
        if images.is_empty() {
            return Err(GenerationError::NoInput);
        }
        let mut data = b"glTF".to_vec();
        data.extend_from_slice(prompt.as_bytes());
        Ok(Mesh::glb(data))
    }
}

/// A server bound to an ephemeral port with in-memory backends and a running worker.
pub struct TestServer {
    pub base_url: String,
    pub client: reqwest::Client,
    pub jobs: Arc<MemoryJobStore>,
    pub scratch: Arc<LocalStore>,
    root: PathBuf,
    workers: Option<WorkerPool>,
    server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(generator: StubGenerator) -> Self {
        Self::start_with(generator, true).await
    }

    /// Start without workers, so jobs stay queued.
    pub async fn start_idle() -> Self {
        Self::start_with(
            StubGenerator {
                mesh_delay: Duration::ZERO,
                fail_mesh: false,
            },
            false,
        )
        .await
    }

    async fn start_with(generator: StubGenerator, with_workers: bool) -> Self {
        let root = std::env::temp_dir().join(format!("meshgen-api-test-{}", Uuid::new_v4()));
        let inputs = LocalStore::new(root.join("uploads")).await.unwrap();
        inputs.upload("chair.png", b"chair-image", "image/png").await.unwrap();
        inputs.upload("table.png", b"table-image", "image/png").await.unwrap();
        let scratch = Arc::new(LocalStore::new(root.join("scratch")).await.unwrap());
        let outputs = LocalStore::new(root.join("outputs")).await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let jobs = Arc::new(MemoryJobStore::new());
        let state = AppState::new(
            jobs.clone(),
            Arc::new(MemoryQueue::new(None)),
            Stores {
                inputs: Arc::new(inputs),
                scratch: scratch.clone(),
                outputs: Arc::new(outputs),
            },
            Arc::new(generator),
            &base_url,
        );

        let workers = with_workers.then(|| {
            WorkerPool::spawn(
                state.clone(),
                WorkerSettings {
                    poll_interval: Duration::from_millis(20),
                    job_timeout: Some(Duration::from_secs(10)),
                    ..WorkerSettings::default()
                },
            )
        });

        let app = routes::router(state, 1024 * 1024);
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            jobs,
            scratch,
            root,
            workers,
            server,
        }
    }

    pub async fn submit(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn status(&self, job_id: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/status/{}", self.base_url, job_id))
            .send()
            .await
            .unwrap()
    }

    /// Poll until the job is terminal, recording every status observed on the way.
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> (StatusResponse, Vec<JobStatus>) {
        let mut seen = Vec::new();
        for _ in 0..500 {
            let response = self.status(&job_id.to_string()).await;
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let body: StatusResponse = response.json().await.unwrap();
            seen.push(body.status);
            if body.status.is_terminal() {
                return (body, seen);
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("Job {job_id} did not finish in time; observed {seen:?}");
    }

    pub async fn stop(self) {
        if let Some(workers) = self.workers {
            workers.shutdown().await;
        }
        self.server.abort();
        let _ = tokio::fs::remove_dir_all(&self.root).await;
    }
}

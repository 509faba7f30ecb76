//! HTTP-level tests against a server on an ephemeral port.
//!
//! Backends are in-memory and the generator is a stub, so these run without
//! any external infrastructure.

mod helpers;

use std::collections::HashSet;
use std::time::Duration;

use helpers::*;
use meshgen_api::models::job::JobStatus;
use meshgen_api::services::storage::ObjectStore;
use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

fn fast() -> StubGenerator {
    StubGenerator {
        mesh_delay: Duration::ZERO,
        fail_mesh: false,
    }
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start(fast()).await;

    let response = server
        .client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "meshgen-api");
    assert_eq!(body["checks"]["job_store"]["status"], "ok");
    assert_eq!(body["checks"]["queue"]["status"], "ok");

    server.stop().await;
}

#[tokio::test]
async fn test_generate_runs_to_completion_and_serves_the_model() {
    let server = TestServer::start(fast()).await;

    let response = server
        .submit(json!({
            "prompt": "a wooden chair",
            "image_filenames": ["chair.png"],
            "output_filename": "chair"
        }))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: GenerateResponse = response.json().await.unwrap();
    assert_eq!(accepted.status, JobStatus::Queued);
    assert_eq!(accepted.message, "3D generation job queued");

    let (done, _) = server.wait_for_terminal(accepted.job_id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.job_id, accepted.job_id);
    assert_eq!(done.prompt, "a wooden chair");
    assert!(done.completed_at.is_some());
    assert!(done.error.is_none());

    let output_url = done.output_url.expect("completed job has an output url");
    assert_eq!(
        output_url,
        format!("{}/outputs/{}/chair.glb", server.base_url, accepted.job_id)
    );

    let download = server.client.get(&output_url).send().await.unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(
        download.headers()["content-type"].to_str().unwrap(),
        "model/gltf-binary"
    );
    let bytes = download.bytes().await.unwrap();
    assert_eq!(&bytes[..], b"glTFa wooden chair");

    server.stop().await;
}

#[tokio::test]
async fn test_default_output_name_uses_job_id() {
    let server = TestServer::start(fast()).await;

    let accepted: GenerateResponse = server
        .submit(json!({"prompt": "a table", "image_filenames": ["table.png"]}))
        .await
        .json()
        .await
        .unwrap();

    let (done, _) = server.wait_for_terminal(accepted.job_id).await;
    assert_eq!(
        done.output_url.as_deref(),
        Some(
            format!(
                "{}/outputs/{}/{}.glb",
                server.base_url, accepted.job_id, accepted.job_id
            )
            .as_str()
        )
    );

    server.stop().await;
}

#[tokio::test]
async fn test_missing_input_is_rejected_without_creating_a_job() {
    let server = TestServer::start(fast()).await;

    let response = server
        .submit(json!({
            "prompt": "a chair",
            "image_filenames": ["chair.png", "missing.png"]
        }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.code, "INPUT_NOT_FOUND");
    assert!(body.error.contains("missing.png"), "error was: {}", body.error);

    assert_eq!(server.jobs.len().await, 0);
    server.stop().await;
}

#[tokio::test]
async fn test_invalid_requests_are_400() {
    let server = TestServer::start(fast()).await;

    let cases = [
        json!({"image_filenames": ["chair.png"]}),
        json!({"prompt": "a chair"}),
        json!({"prompt": "", "image_filenames": ["chair.png"]}),
        json!({"prompt": "a chair", "image_filenames": []}),
    ];
    for case in cases {
        let response = server.submit(case.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "request: {case}");
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.code, "VALIDATION_ERROR");
    }

    let response = server
        .client
        .post(format!("{}/generate", server.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(server.jobs.len().await, 0);
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_and_malformed_job_ids_are_404() {
    let server = TestServer::start_idle().await;

    for id in [Uuid::new_v4().to_string(), "not-a-job".to_string()] {
        let response = server.status(&id).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.code, "JOB_NOT_FOUND");
    }

    server.stop().await;
}

#[tokio::test]
async fn test_failed_generation_is_reported_and_scratch_is_released() {
    let server = TestServer::start(StubGenerator {
        mesh_delay: Duration::ZERO,
        fail_mesh: true,
    })
    .await;

    let accepted: GenerateResponse = server
        .submit(json!({"prompt": "a chair", "image_filenames": ["chair.png", "table.png"]}))
        .await
        .json()
        .await
        .unwrap();

    let (done, _) = server.wait_for_terminal(accepted.job_id).await;
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.output_url.is_none());
    let error = done.error.expect("failed job carries an error");
    assert!(error.contains("mesh backend unavailable"), "error was: {error}");

    for index in 0..2 {
        let key = format!("{}/{}.png", accepted.job_id, index);
        assert!(!server.scratch.exists(&key).await.unwrap(), "{key} left behind");
    }

    server.stop().await;
}

#[tokio::test]
async fn test_observed_statuses_only_move_forward() {
    let server = TestServer::start(StubGenerator {
        mesh_delay: Duration::from_millis(150),
        fail_mesh: false,
    })
    .await;

    let accepted: GenerateResponse = server
        .submit(json!({"prompt": "a lamp", "image_filenames": ["chair.png"]}))
        .await
        .json()
        .await
        .unwrap();

    let (done, seen) = server.wait_for_terminal(accepted.job_id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert!(
        seen.windows(2).all(|pair| pair[0].rank() <= pair[1].rank()),
        "statuses went backwards: {seen:?}"
    );
    assert!(seen.contains(&JobStatus::Processing3dGeneration), "observed {seen:?}");

    server.stop().await;
}

#[tokio::test]
async fn test_status_reads_are_stable() {
    let server = TestServer::start_idle().await;

    let accepted: GenerateResponse = server
        .submit(json!({"prompt": "a chair", "image_filenames": ["chair.png"]}))
        .await
        .json()
        .await
        .unwrap();

    let first: StatusResponse = server
        .status(&accepted.job_id.to_string())
        .await
        .json()
        .await
        .unwrap();
    let second: StatusResponse = server
        .status(&accepted.job_id.to_string())
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(first.status, JobStatus::Queued);
    assert_eq!(first, second);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_submissions_get_distinct_ids() {
    let server = TestServer::start_idle().await;

    let submissions = (0..20).map(|i| {
        server.submit(json!({
            "prompt": format!("chair {i}"),
            "image_filenames": ["chair.png"]
        }))
    });
    let responses = futures::future::join_all(submissions).await;

    let mut ids = HashSet::new();
    for response in responses {
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let accepted: GenerateResponse = response.json().await.unwrap();
        ids.insert(accepted.job_id);
    }
    assert_eq!(ids.len(), 20);
    assert_eq!(server.jobs.len().await, 20);

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_output_is_404() {
    let server = TestServer::start_idle().await;

    let response = server
        .client
        .get(format!("{}/outputs/{}/nothing.glb", server.base_url, Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .client
        .get(format!("{}/outputs/not-a-job/nothing.glb", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_jobs_sharing_an_output_name_keep_their_own_models() {
    let server = TestServer::start(fast()).await;

    let mut urls = Vec::new();
    for prompt in ["job A", "job B"] {
        let accepted: GenerateResponse = server
            .submit(json!({
                "prompt": prompt,
                "image_filenames": ["chair.png"],
                "output_filename": "model.glb"
            }))
            .await
            .json()
            .await
            .unwrap();
        let (done, _) = server.wait_for_terminal(accepted.job_id).await;
        assert_eq!(done.status, JobStatus::Completed);
        urls.push(done.output_url.expect("completed job has an output url"));
    }
    assert_ne!(urls[0], urls[1]);

    for (url, prompt) in urls.iter().zip(["job A", "job B"]) {
        let bytes = server.client.get(url).send().await.unwrap().bytes().await.unwrap();
        assert_eq!(&bytes[..], format!("glTF{prompt}").as_bytes());
    }

    server.stop().await;
}

#[tokio::test]
async fn test_output_names_with_url_reserved_characters_are_rejected() {
    let server = TestServer::start(fast()).await;

    for name in ["chair#1", "chair?v=2", "50%", "my chair"] {
        let response = server
            .submit(json!({
                "prompt": "a chair",
                "image_filenames": ["chair.png"],
                "output_filename": name
            }))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "name: {name:?}");
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.code, "VALIDATION_ERROR");
    }

    assert_eq!(server.jobs.len().await, 0);
    server.stop().await;
}

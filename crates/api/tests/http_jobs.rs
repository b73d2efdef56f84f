//! Endpoint tests against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use slidegen_api::app::build_app;
use slidegen_core::{
    ErrorClass, JobError, JobOutcome, StepName, WorkerId,
};
use slidegen_queue::{EngineStore, JobQueue, MemoryStore};

fn app_with_store() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn EngineStore> = store.clone();
    (build_app(dyn_store), store)
}

fn create_body() -> String {
    serde_json::json!({
        "project_id": "018f3b3a-0000-7000-8000-000000000001",
        "title": "launch deck",
        "page_size": "16:9",
        "images": [{
            "id": "018f3b3a-0000-7000-8000-000000000002",
            "ordinal": 0,
            "storage_key": "uploads/launch.png",
            "sha256": "ab".repeat(32),
            "original_filename": "launch.png",
        }],
    })
    .to_string()
}

async fn post(app: &Router, uri: &str, body: String) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = app_with_store();
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_then_fetch_a_job() {
    let (app, _) = app_with_store();

    let (status, created) = post(&app, "/jobs", create_body()).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = get(&app, &format!("/jobs/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "queued");
    assert_eq!(body["job"]["attempt"], 1);
    assert_eq!(body["job"]["title"], "launch deck");
    assert!(body["events"].as_array().unwrap().is_empty());
    assert!(body["artifacts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_specs_are_rejected() {
    let (app, _) = app_with_store();
    let body = serde_json::json!({
        "project_id": "018f3b3a-0000-7000-8000-000000000001",
        "title": "no images",
        "images": [],
    })
    .to_string();
    let (status, body) = post(&app, "/jobs", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_spec");
}

#[tokio::test]
async fn unknown_job_is_404_and_bad_id_is_400() {
    let (app, _) = app_with_store();
    let (status, _) = get(&app, "/jobs/018f3b3a-dead-7000-8000-00000000beef").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = get(&app, "/jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn retry_requires_a_failed_job() {
    let (app, store) = app_with_store();
    let (_, created) = post(&app, "/jobs", create_body()).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = post(&app, &format!("/jobs/{id}/retry"), String::new()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "not_failed");

    // Fail the job through the store, as a worker would.
    let worker = WorkerId::new("w1");
    let job = store
        .claim_next(&worker, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    store
        .complete(
            job.id,
            &worker,
            JobOutcome::Failed {
                error: JobError {
                    class: ErrorClass::Transient,
                    code: "provider_unavailable".into(),
                    message: "503".into(),
                    step: Some(StepName::ExtractLayouts),
                },
            },
        )
        .await
        .unwrap();

    let (status, body) = post(&app, &format!("/jobs/{id}/retry"), String::new()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["retry_of"].as_str().unwrap(), id);

    let new_id = body["id"].as_str().unwrap();
    let (_, projection) = get(&app, &format!("/jobs/{new_id}")).await;
    assert_eq!(projection["job"]["attempt"], 2);
    assert_eq!(projection["job"]["retry_of"].as_str().unwrap(), id);
}

#[tokio::test]
async fn cancel_marks_the_job_canceled() {
    let (app, _) = app_with_store();
    let (_, created) = post(&app, "/jobs", create_body()).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = post(&app, &format!("/jobs/{id}/cancel"), String::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "canceled");
}

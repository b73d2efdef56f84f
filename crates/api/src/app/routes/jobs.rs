//! Job endpoints: enqueue, status projection, retry, cancel.
//!
//! Workers never go through this surface; they talk to the store directly.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use slidegen_core::JobId;
use slidegen_queue::EngineStore;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job))
        .route("/:id", get(get_job))
        .route("/:id/retry", post(retry_job))
        .route("/:id/cancel", post(cancel_job))
}

/// POST /jobs
///
/// Validates the spec and enqueues a job; a worker picks it up from there.
pub async fn create_job(
    Extension(store): Extension<Arc<dyn EngineStore>>,
    Json(request): Json<dto::CreateJobRequest>,
) -> axum::response::Response {
    match store.enqueue(request.into_spec()).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// GET /jobs/:id
///
/// The full status projection: job row, event history and artifact index.
pub async fn get_job(
    Extension(store): Extension<Arc<dyn EngineStore>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_id(&id) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id");
    };

    let job = match store.get(job_id).await {
        Ok(job) => job,
        Err(e) => return errors::engine_error_to_response(e),
    };
    let events = match store.list_events(job_id).await {
        Ok(events) => events,
        Err(e) => return errors::engine_error_to_response(e),
    };
    let artifacts = match store.list_artifacts(job_id).await {
        Ok(artifacts) => artifacts,
        Err(e) => return errors::engine_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "job": dto::job_to_json(&job),
            "events": events.iter().map(dto::event_to_json).collect::<Vec<_>>(),
            "artifacts": artifacts.iter().map(dto::artifact_to_json).collect::<Vec<_>>(),
        })),
    )
        .into_response()
}

/// POST /jobs/:id/retry
///
/// Only failed jobs below their attempt cap; inserts a fresh queued row.
pub async fn retry_job(
    Extension(store): Extension<Arc<dyn EngineStore>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_id(&id) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id");
    };
    match store.retry(job_id).await {
        Ok(new_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": new_id.to_string(),
                "retry_of": job_id.to_string(),
            })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// POST /jobs/:id/cancel
///
/// Cooperative: a running job halts at its next step boundary.
pub async fn cancel_job(
    Extension(store): Extension<Arc<dyn EngineStore>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_id(&id) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id");
    };
    if let Err(e) = store.cancel(job_id).await {
        return errors::engine_error_to_response(e);
    }
    match store.get(job_id).await {
        Ok(job) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": job.id.to_string(),
                "status": job.status.as_str(),
            })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

fn parse_id(s: &str) -> Option<JobId> {
    s.parse::<JobId>().ok()
}

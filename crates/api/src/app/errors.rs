use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use slidegen_core::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::InvalidSpec(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_spec", msg),
        EngineError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        EngineError::NotOwner(_) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        EngineError::NotFailed(id) => json_error(
            StatusCode::CONFLICT,
            "not_failed",
            format!("job {id} is not in a failed state"),
        ),
        EngineError::RetryExhausted { .. } => {
            json_error(StatusCode::CONFLICT, "retry_exhausted", err.to_string())
        }
        EngineError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

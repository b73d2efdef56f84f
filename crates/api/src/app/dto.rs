use serde::Deserialize;
use serde_json::json;

use slidegen_core::{ImageRef, Job, JobSpec, PageSize, ProjectId, DEFAULT_MAX_ATTEMPTS};
use slidegen_queue::{Artifact, JobEvent};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub page_size: PageSize,
    pub images: Vec<ImageRef>,
    pub max_attempts: Option<u32>,
}

impl CreateJobRequest {
    pub fn into_spec(self) -> JobSpec {
        JobSpec {
            project_id: self.project_id,
            title: self.title,
            page_size: self.page_size,
            images: self.images,
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

// -------------------------
// Response JSON
// -------------------------

pub fn job_to_json(job: &Job) -> serde_json::Value {
    json!({
        "id": job.id.to_string(),
        "project_id": job.project_id.to_string(),
        "title": job.spec.title,
        "page_size": job.spec.page_size.as_str(),
        "status": job.status.as_str(),
        "step": job.step.map(|s| s.as_str()),
        "attempt": job.attempt,
        "max_attempts": job.max_attempts,
        "retry_of": job.retry_of.map(|id| id.to_string()),
        "presentation": job.presentation_id.as_ref().map(|id| json!({
            "id": id,
            "url": job.presentation_url,
        })),
        "error": job.error.as_ref().map(|e| json!({
            "class": e.class.as_str(),
            "code": e.code,
            "message": e.message,
            "step": e.step.map(|s| s.as_str()),
        })),
        "created_at": job.created_at.to_rfc3339(),
        "started_at": job.started_at.map(|t| t.to_rfc3339()),
        "finished_at": job.finished_at.map(|t| t.to_rfc3339()),
    })
}

pub fn event_to_json(event: &JobEvent) -> serde_json::Value {
    json!({
        "ts": event.ts.to_rfc3339(),
        "level": event.level.as_str(),
        "step": event.step.map(|s| s.as_str()),
        "message": event.message,
        "payload": event.payload,
    })
}

pub fn artifact_to_json(artifact: &Artifact) -> serde_json::Value {
    json!({
        "kind": artifact.kind.as_str(),
        "storage_key": artifact.storage_key,
        "sha256": artifact.sha256,
        "meta": artifact.meta,
        "created_at": artifact.created_at.to_rfc3339(),
    })
}

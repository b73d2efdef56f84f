//! Row types persisted alongside the job table: events, step markers,
//! artifact index entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use slidegen_core::{JobId, StepName};

/// Severity of a job event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(EventLevel::Info),
            "warning" => Some(EventLevel::Warning),
            "error" => Some(EventLevel::Error),
            _ => None,
        }
    }
}

/// Append-only audit record for a job.
///
/// Ordering is by timestamp, with the insertion sequence breaking ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Insertion sequence assigned by the store.
    pub seq: i64,
    pub job_id: JobId,
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub step: Option<StepName>,
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

/// Status of a step marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStatus {
    Started,
    Completed,
    Failed,
}

impl MarkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerStatus::Started => "started",
            MarkerStatus::Completed => "completed",
            MarkerStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(MarkerStatus::Started),
            "completed" => Some(MarkerStatus::Completed),
            "failed" => Some(MarkerStatus::Failed),
            _ => None,
        }
    }
}

/// Idempotency gate for one (job, step) pair. Unique per pair; a step
/// re-executes only while its marker is absent or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMarker {
    pub job_id: JobId,
    pub step: StepName,
    pub status: MarkerStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Storage key of the step's primary output, when it has one.
    pub result_key: Option<String>,
}

impl StepMarker {
    pub fn is_completed(&self) -> bool {
        self.status == MarkerStatus::Completed
    }
}

/// Named categories of job outputs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    InputManifest,
    LayoutRaw,
    LayoutClean,
    RunConfig,
    Presentation,
    Trace,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::InputManifest => "input_manifest",
            ArtifactKind::LayoutRaw => "layout_raw",
            ArtifactKind::LayoutClean => "layout_clean",
            ArtifactKind::RunConfig => "run_config",
            ArtifactKind::Presentation => "presentation",
            ArtifactKind::Trace => "trace",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "input_manifest" => Some(ArtifactKind::InputManifest),
            "layout_raw" => Some(ArtifactKind::LayoutRaw),
            "layout_clean" => Some(ArtifactKind::LayoutClean),
            "run_config" => Some(ArtifactKind::RunConfig),
            "presentation" => Some(ArtifactKind::Presentation),
            "trace" => Some(ArtifactKind::Trace),
            _ => None,
        }
    }
}

impl core::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index entry pointing at an immutable output blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub job_id: JobId,
    pub kind: ArtifactKind,
    pub storage_key: String,
    pub sha256: String,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

//! Store traits: the queue contract plus the event log, step markers and
//! artifact index that hang off a job.
//!
//! All four traits are implemented by both backends ([`crate::MemoryStore`]
//! for tests/dev, [`crate::PostgresStore`] for production), so the pipeline
//! and worker code stay backend-agnostic behind `Arc<dyn EngineStore>`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use slidegen_core::{EngineResult, JobId, JobOutcome, JobSpec, StepName, WorkerId};

use crate::types::{Artifact, ArtifactKind, EventLevel, JobEvent, MarkerStatus, StepMarker};

/// The durable work queue. The sole coordination point between workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a queued row for a validated spec. `InvalidSpec` otherwise.
    async fn enqueue(&self, spec: JobSpec) -> EngineResult<JobId>;

    /// Fetch one job. `NotFound` if absent.
    async fn get(&self, job_id: JobId) -> EngineResult<slidegen_core::Job>;

    /// Atomically claim the oldest eligible row: queued, or running with an
    /// expired lease (crash recovery). Contending callers never block each
    /// other; each gets a different row or `None`.
    async fn claim_next(
        &self,
        worker: &WorkerId,
        lease: Duration,
    ) -> EngineResult<Option<slidegen_core::Job>>;

    /// Extend the caller's lease. `NotOwner` when the stored claim no longer
    /// matches (lease lapsed and another worker took over).
    async fn heartbeat(&self, job_id: JobId, worker: &WorkerId, lease: Duration)
    -> EngineResult<()>;

    /// Persist the step cursor. `NotOwner` under the same condition.
    async fn advance_step(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        step: StepName,
    ) -> EngineResult<()>;

    /// Record the external presentation handle on the row so the create step
    /// can skip itself on re-entry.
    async fn set_presentation(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        presentation_id: &str,
        presentation_url: &str,
    ) -> EngineResult<()>;

    /// Terminal transition: set succeeded/failed, release the claim, stamp
    /// the finish time and error summary.
    async fn complete(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        outcome: JobOutcome,
    ) -> EngineResult<()>;

    /// Create a fresh attempt for a failed job. `NotFailed` unless the prior
    /// row is terminal-failed, `RetryExhausted` at the attempt cap.
    async fn retry(&self, job_id: JobId) -> EngineResult<JobId>;

    /// Externally triggered cooperative cancel. Queued rows stop being
    /// claimable; running jobs halt at the next step boundary.
    async fn cancel(&self, job_id: JobId) -> EngineResult<()>;

    /// Cancellation flag checked by the step machine between steps.
    async fn is_canceled(&self, job_id: JobId) -> EngineResult<bool>;
}

/// Append-only, time-ordered record of step transitions and messages.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append_event(
        &self,
        job_id: JobId,
        level: EventLevel,
        step: Option<StepName>,
        message: &str,
        payload: Option<Value>,
    ) -> EngineResult<()>;

    /// Events for a job, oldest first.
    async fn list_events(&self, job_id: JobId) -> EngineResult<Vec<JobEvent>>;
}

/// Idempotency markers, one per (job, step).
#[async_trait]
pub trait StepMarkers: Send + Sync {
    /// The marker for this pair, if any.
    async fn marker(&self, job_id: JobId, step: StepName) -> EngineResult<Option<StepMarker>>;

    /// Record that a step began. Upserts: re-running after a failure resets
    /// the pair to `started`.
    async fn begin_step(&self, job_id: JobId, step: StepName) -> EngineResult<()>;

    /// Finalize the pair. `Completed` markers short-circuit re-execution.
    async fn finish_step(
        &self,
        job_id: JobId,
        step: StepName,
        status: MarkerStatus,
        result_key: Option<&str>,
    ) -> EngineResult<()>;
}

/// Index of immutable output blobs, by job and kind.
#[async_trait]
pub trait ArtifactIndex: Send + Sync {
    async fn record_artifact(&self, artifact: Artifact) -> EngineResult<()>;

    /// Whether an entry with this exact key exists (per-item idempotency in
    /// the extract step).
    async fn artifact_exists(&self, job_id: JobId, key: &str) -> EngineResult<bool>;

    /// The latest write of one kind, if any.
    async fn latest_artifact(
        &self,
        job_id: JobId,
        kind: ArtifactKind,
    ) -> EngineResult<Option<Artifact>>;

    /// All entries of one kind, in insertion order.
    async fn list_artifacts_of_kind(
        &self,
        job_id: JobId,
        kind: ArtifactKind,
    ) -> EngineResult<Vec<Artifact>>;

    /// Every entry for a job, in insertion order.
    async fn list_artifacts(&self, job_id: JobId) -> EngineResult<Vec<Artifact>>;
}

/// Everything a pipeline run needs from the store.
pub trait EngineStore: JobQueue + EventLog + StepMarkers + ArtifactIndex {}

impl<T: JobQueue + EventLog + StepMarkers + ArtifactIndex> EngineStore for T {}

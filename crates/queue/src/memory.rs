//! In-memory store for tests and single-process dev runs.
//!
//! Semantics mirror the Postgres backend: one async mutex around the whole
//! state plays the role of the claim transaction, so concurrent
//! `claim_next` callers observe the same at-most-one-owner guarantee.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use slidegen_core::{
    EngineError, EngineResult, Job, JobId, JobOutcome, JobSpec, JobStatus, StepName, WorkerId,
};

use crate::store::{ArtifactIndex, EventLog, JobQueue, StepMarkers};
use crate::types::{Artifact, ArtifactKind, EventLevel, JobEvent, MarkerStatus, StepMarker};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    /// Enqueue order; claim scans oldest-first.
    fifo: Vec<JobId>,
    events: Vec<JobEvent>,
    event_seq: i64,
    markers: HashMap<(JobId, StepName), StepMarker>,
    artifacts: Vec<Artifact>,
}

impl Inner {
    fn job(&self, job_id: JobId) -> EngineResult<&Job> {
        self.jobs.get(&job_id).ok_or(EngineError::NotFound(job_id))
    }

    /// Ownership guard shared by heartbeat/advance/complete: the row must be
    /// running and still claimed by the caller.
    fn owned_mut(&mut self, job_id: JobId, worker: &WorkerId) -> EngineResult<&mut Job> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(EngineError::NotFound(job_id))?;
        if job.status != JobStatus::Running || job.claimed_by.as_ref() != Some(worker) {
            return Err(EngineError::NotOwner(job_id));
        }
        Ok(job)
    }
}

/// Fully in-memory implementation of the engine store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(&self, spec: JobSpec) -> EngineResult<JobId> {
        let job = Job::from_spec(spec)?;
        let id = job.id;
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(id, job);
        inner.fifo.push(id);
        Ok(id)
    }

    async fn get(&self, job_id: JobId) -> EngineResult<Job> {
        let inner = self.inner.lock().await;
        inner.job(job_id).cloned()
    }

    async fn claim_next(&self, worker: &WorkerId, lease: Duration) -> EngineResult<Option<Job>> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let candidate = inner
            .fifo
            .iter()
            .copied()
            .find(|id| inner.jobs.get(id).map(|j| j.claimable(now)).unwrap_or(false));
        let Some(id) = candidate else {
            return Ok(None);
        };
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(EngineError::NotFound(id))?;
        job.status = JobStatus::Running;
        job.claimed_by = Some(worker.clone());
        job.lease_expires_at = Some(now + chrono::Duration::from_std(lease).unwrap_or_default());
        job.started_at.get_or_insert(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn heartbeat(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        lease: Duration,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let job = inner.owned_mut(job_id, worker)?;
        job.lease_expires_at = Some(now + chrono::Duration::from_std(lease).unwrap_or_default());
        job.updated_at = now;
        Ok(())
    }

    async fn advance_step(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        step: StepName,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.owned_mut(job_id, worker)?;
        job.step = Some(step);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn set_presentation(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        presentation_id: &str,
        presentation_url: &str,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.owned_mut(job_id, worker)?;
        job.presentation_id = Some(presentation_id.to_string());
        job.presentation_url = Some(presentation_url.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        outcome: JobOutcome,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(EngineError::NotFound(job_id))?;

        // A cancel that landed mid-step wins: release the claim, keep the
        // terminal canceled status.
        if job.status == JobStatus::Canceled && job.claimed_by.as_ref() == Some(worker) {
            job.claimed_by = None;
            job.lease_expires_at = None;
            return Ok(());
        }

        if job.status != JobStatus::Running || job.claimed_by.as_ref() != Some(worker) {
            return Err(EngineError::NotOwner(job_id));
        }

        match outcome {
            JobOutcome::Succeeded { presentation_url } => {
                job.status = JobStatus::Succeeded;
                if presentation_url.is_some() {
                    job.presentation_url = presentation_url;
                }
            }
            JobOutcome::Failed { error } => {
                job.status = JobStatus::Failed;
                job.error = Some(error);
            }
            JobOutcome::Canceled => {
                job.status = JobStatus::Canceled;
            }
        }
        job.claimed_by = None;
        job.lease_expires_at = None;
        job.finished_at = Some(now);
        job.updated_at = now;
        // Terminal rows never become claimable again; drop them from the
        // claim scan.
        inner.fifo.retain(|&id| id != job_id);
        Ok(())
    }

    async fn retry(&self, job_id: JobId) -> EngineResult<JobId> {
        let mut inner = self.inner.lock().await;
        let prior = inner.job(job_id)?;
        if prior.status != JobStatus::Failed {
            return Err(EngineError::NotFailed(job_id));
        }
        if prior.attempt >= prior.max_attempts {
            return Err(EngineError::RetryExhausted {
                id: job_id,
                attempt: prior.attempt,
                max_attempts: prior.max_attempts,
            });
        }
        let next = prior.next_attempt();
        let next_id = next.id;
        inner.jobs.insert(next_id, next);
        inner.fifo.push(next_id);
        Ok(next_id)
    }

    async fn cancel(&self, job_id: JobId) -> EngineResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(EngineError::NotFound(job_id))?;
        // Succeeded/failed rows are immutable; canceling them is a no-op.
        if !job.status.is_terminal() {
            job.status = JobStatus::Canceled;
            job.finished_at = Some(now);
            job.updated_at = now;
            inner.fifo.retain(|&id| id != job_id);
        }
        Ok(())
    }

    async fn is_canceled(&self, job_id: JobId) -> EngineResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.job(job_id)?.status == JobStatus::Canceled)
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append_event(
        &self,
        job_id: JobId,
        level: EventLevel,
        step: Option<StepName>,
        message: &str,
        payload: Option<Value>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        inner.job(job_id)?;
        inner.event_seq += 1;
        let seq = inner.event_seq;
        inner.events.push(JobEvent {
            seq,
            job_id,
            ts: Utc::now(),
            level,
            step,
            message: message.to_string(),
            payload,
        });
        Ok(())
    }

    async fn list_events(&self, job_id: JobId) -> EngineResult<Vec<JobEvent>> {
        let inner = self.inner.lock().await;
        let mut events: Vec<JobEvent> = inner
            .events
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.seq.cmp(&b.seq)));
        Ok(events)
    }
}

#[async_trait]
impl StepMarkers for MemoryStore {
    async fn marker(&self, job_id: JobId, step: StepName) -> EngineResult<Option<StepMarker>> {
        let inner = self.inner.lock().await;
        Ok(inner.markers.get(&(job_id, step)).cloned())
    }

    async fn begin_step(&self, job_id: JobId, step: StepName) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        inner.markers.insert(
            (job_id, step),
            StepMarker {
                job_id,
                step,
                status: MarkerStatus::Started,
                started_at: Utc::now(),
                finished_at: None,
                result_key: None,
            },
        );
        Ok(())
    }

    async fn finish_step(
        &self,
        job_id: JobId,
        step: StepName,
        status: MarkerStatus,
        result_key: Option<&str>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        let marker = inner
            .markers
            .get_mut(&(job_id, step))
            .ok_or_else(|| EngineError::storage(format!("no marker for {job_id}/{step}")))?;
        marker.status = status;
        marker.finished_at = Some(Utc::now());
        marker.result_key = result_key.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl ArtifactIndex for MemoryStore {
    async fn record_artifact(&self, artifact: Artifact) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        inner.artifacts.push(artifact);
        Ok(())
    }

    async fn artifact_exists(&self, job_id: JobId, key: &str) -> EngineResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .artifacts
            .iter()
            .any(|a| a.job_id == job_id && a.storage_key == key))
    }

    async fn latest_artifact(
        &self,
        job_id: JobId,
        kind: ArtifactKind,
    ) -> EngineResult<Option<Artifact>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .artifacts
            .iter()
            .rev()
            .find(|a| a.job_id == job_id && a.kind == kind)
            .cloned())
    }

    async fn list_artifacts_of_kind(
        &self,
        job_id: JobId,
        kind: ArtifactKind,
    ) -> EngineResult<Vec<Artifact>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .artifacts
            .iter()
            .filter(|a| a.job_id == job_id && a.kind == kind)
            .cloned()
            .collect())
    }

    async fn list_artifacts(&self, job_id: JobId) -> EngineResult<Vec<Artifact>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .artifacts
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }
}

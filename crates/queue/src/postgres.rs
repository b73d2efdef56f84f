//! Postgres-backed engine store.
//!
//! The claim path is the one piece with real concurrency: a transaction
//! wrapping a `FOR UPDATE SKIP LOCKED` read plus the ownership update, so
//! contending workers each grab a different eligible row (or none) without
//! blocking on each other. Every other mutation is a single guarded UPDATE
//! whose WHERE clause re-checks claim ownership; zero affected rows is then
//! disambiguated into `NotFound` vs `NotOwner`.
//!
//! ## Thread safety
//!
//! `PostgresStore` is `Send + Sync`; all operations go through the SQLx
//! connection pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use slidegen_core::{
    EngineError, EngineResult, Job, JobError, JobId, JobOutcome, JobSpec, JobStatus, ProjectId,
    StepName, WorkerId,
};

use crate::store::{ArtifactIndex, EventLog, JobQueue, StepMarkers};
use crate::types::{Artifact, ArtifactKind, EventLevel, JobEvent, MarkerStatus, StepMarker};

const JOB_COLUMNS: &str = "id, project_id, spec, status, step, attempt, max_attempts, retry_of, \
     claimed_by, lease_expires_at, presentation_id, presentation_url, error, \
     created_at, started_at, finished_at, updated_at";

/// Postgres implementation of the queue, event log, markers and artifact
/// index.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and run the schema migrations.
    pub async fn connect(database_url: &str) -> EngineResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| EngineError::storage(format!("connect: {e}")))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| EngineError::storage(format!("migrate: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Turn a zero-rows guarded update into the right error.
    async fn ownership_error(&self, job_id: JobId) -> EngineError {
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await;
        match exists {
            Ok(Some(_)) => EngineError::NotOwner(job_id),
            Ok(None) => EngineError::NotFound(job_id),
            Err(e) => map_sqlx_error("ownership_check", e),
        }
    }
}

#[async_trait]
impl JobQueue for PostgresStore {
    #[instrument(skip(self, spec), fields(project_id = %spec.project_id), err)]
    async fn enqueue(&self, spec: JobSpec) -> EngineResult<JobId> {
        let job = Job::from_spec(spec)?;
        let spec_json = serde_json::to_value(&job.spec)
            .map_err(|e| EngineError::storage(format!("serialize spec: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, project_id, spec, status, attempt, max_attempts, created_at, updated_at)
            VALUES ($1, $2, $3, 'queued', $4, $5, $6, $6)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.project_id.as_uuid())
        .bind(&spec_json)
        .bind(job.attempt as i32)
        .bind(job.max_attempts as i32)
        .bind(job.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        Ok(job.id)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> EngineResult<Job> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .ok_or(EngineError::NotFound(job_id))?;

        JobRow::from_row(&row)
            .map_err(|e| EngineError::storage(format!("decode job row: {e}")))?
            .try_into()
    }

    #[instrument(skip(self, lease), fields(worker = %worker), err)]
    async fn claim_next(&self, worker: &WorkerId, lease: Duration) -> EngineResult<Option<Job>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Locking read that skips rows a concurrent claimer already holds.
        let row = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE status = 'queued'
               OR (status = 'running' AND lease_expires_at <= NOW())
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_select", e))?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(None);
        };
        let id: uuid::Uuid = row
            .try_get("id")
            .map_err(|e| EngineError::storage(format!("decode claim id: {e}")))?;

        let claimed = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                claimed_by = $2,
                lease_expires_at = NOW() + make_interval(secs => $3),
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(worker.as_str())
        .bind(lease.as_secs_f64())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_update", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        let job: Job = JobRow::from_row(&claimed)
            .map_err(|e| EngineError::storage(format!("decode job row: {e}")))?
            .try_into()?;
        Ok(Some(job))
    }

    #[instrument(skip(self, lease), fields(job_id = %job_id, worker = %worker), err)]
    async fn heartbeat(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        lease: Duration,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + make_interval(secs => $3),
                updated_at = NOW()
            WHERE id = $1 AND claimed_by = $2 AND status = 'running'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker.as_str())
        .bind(lease.as_secs_f64())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("heartbeat", e))?;

        if result.rows_affected() == 0 {
            return Err(self.ownership_error(job_id).await);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id, step = %step), err)]
    async fn advance_step(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        step: StepName,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET step = $3, updated_at = NOW()
            WHERE id = $1 AND claimed_by = $2 AND status = 'running'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker.as_str())
        .bind(step.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("advance_step", e))?;

        if result.rows_affected() == 0 {
            return Err(self.ownership_error(job_id).await);
        }
        Ok(())
    }

    #[instrument(skip(self, presentation_url), fields(job_id = %job_id), err)]
    async fn set_presentation(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        presentation_id: &str,
        presentation_url: &str,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET presentation_id = $3, presentation_url = $4, updated_at = NOW()
            WHERE id = $1 AND claimed_by = $2 AND status = 'running'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker.as_str())
        .bind(presentation_id)
        .bind(presentation_url)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_presentation", e))?;

        if result.rows_affected() == 0 {
            return Err(self.ownership_error(job_id).await);
        }
        Ok(())
    }

    #[instrument(skip(self, outcome), fields(job_id = %job_id, worker = %worker), err)]
    async fn complete(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        outcome: JobOutcome,
    ) -> EngineResult<()> {
        let (status, error_json, presentation_url) = match outcome {
            JobOutcome::Succeeded { presentation_url } => {
                (JobStatus::Succeeded, None, presentation_url)
            }
            JobOutcome::Failed { error } => {
                let json = serde_json::to_value(&error)
                    .map_err(|e| EngineError::storage(format!("serialize error: {e}")))?;
                (JobStatus::Failed, Some(json), None)
            }
            JobOutcome::Canceled => (JobStatus::Canceled, None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3,
                error = $4,
                presentation_url = COALESCE($5, presentation_url),
                claimed_by = NULL,
                lease_expires_at = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND claimed_by = $2 AND status = 'running'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker.as_str())
        .bind(status.as_str())
        .bind(error_json)
        .bind(presentation_url)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete", e))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // A cancel that landed mid-step wins; just release the claim.
        let released = sqlx::query(
            r#"
            UPDATE jobs SET claimed_by = NULL, lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1 AND claimed_by = $2 AND status = 'canceled'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_release", e))?;

        if released.rows_affected() > 0 {
            return Ok(());
        }
        Err(self.ownership_error(job_id).await)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn retry(&self, job_id: JobId) -> EngineResult<JobId> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("retry_select", e))?
        .ok_or(EngineError::NotFound(job_id))?;

        let prior: Job = JobRow::from_row(&row)
            .map_err(|e| EngineError::storage(format!("decode job row: {e}")))?
            .try_into()?;

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
        let spec_json = serde_json::to_value(&next.spec)
            .map_err(|e| EngineError::storage(format!("serialize spec: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, project_id, spec, status, attempt, max_attempts, retry_of, created_at, updated_at)
            VALUES ($1, $2, $3, 'queued', $4, $5, $6, $7, $7)
            "#,
        )
        .bind(next.id.as_uuid())
        .bind(next.project_id.as_uuid())
        .bind(&spec_json)
        .bind(next.attempt as i32)
        .bind(next.max_attempts as i32)
        .bind(job_id.as_uuid())
        .bind(next.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("retry_insert", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(next.id)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn cancel(&self, job_id: JobId) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'canceled', finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(job_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cancel", e))?;

        if result.rows_affected() == 0 {
            // Terminal rows are immutable; canceling them is a no-op, but a
            // missing row is an error.
            let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = $1")
                .bind(job_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("cancel_check", e))?;
            if exists.is_none() {
                return Err(EngineError::NotFound(job_id));
            }
        }
        Ok(())
    }

    async fn is_canceled(&self, job_id: JobId) -> EngineResult<bool> {
        let row = sqlx::query("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("is_canceled", e))?
            .ok_or(EngineError::NotFound(job_id))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| EngineError::storage(format!("decode status: {e}")))?;
        Ok(status == JobStatus::Canceled.as_str())
    }
}

#[async_trait]
impl EventLog for PostgresStore {
    async fn append_event(
        &self,
        job_id: JobId,
        level: EventLevel,
        step: Option<StepName>,
        message: &str,
        payload: Option<Value>,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_events (job_id, level, step, message, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(level.as_str())
        .bind(step.map(|s| s.as_str()))
        .bind(message)
        .bind(payload)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_event", e))?;
        Ok(())
    }

    async fn list_events(&self, job_id: JobId) -> EngineResult<Vec<JobEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, ts, level, step, message, payload
            FROM job_events
            WHERE job_id = $1
            ORDER BY ts ASC, id ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_events", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let decoded = EventRow::from_row(&row)
                .map_err(|e| EngineError::storage(format!("decode event row: {e}")))?;
            events.push(decoded.try_into()?);
        }
        Ok(events)
    }
}

#[async_trait]
impl StepMarkers for PostgresStore {
    async fn marker(&self, job_id: JobId, step: StepName) -> EngineResult<Option<StepMarker>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, step, status, started_at, finished_at, result_key
            FROM job_step_markers
            WHERE job_id = $1 AND step = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(step.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("marker", e))?;

        match row {
            Some(row) => {
                let decoded = MarkerRow::from_row(&row)
                    .map_err(|e| EngineError::storage(format!("decode marker row: {e}")))?;
                Ok(Some(decoded.try_into()?))
            }
            None => Ok(None),
        }
    }

    async fn begin_step(&self, job_id: JobId, step: StepName) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_step_markers (job_id, step, status, started_at)
            VALUES ($1, $2, 'started', NOW())
            ON CONFLICT (job_id, step) DO UPDATE
            SET status = 'started', started_at = NOW(), finished_at = NULL, result_key = NULL
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(step.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("begin_step", e))?;
        Ok(())
    }

    async fn finish_step(
        &self,
        job_id: JobId,
        step: StepName,
        status: MarkerStatus,
        result_key: Option<&str>,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_step_markers
            SET status = $3, finished_at = NOW(), result_key = $4
            WHERE job_id = $1 AND step = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(step.as_str())
        .bind(status.as_str())
        .bind(result_key)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish_step", e))?;

        if result.rows_affected() == 0 {
            return Err(EngineError::storage(format!(
                "no marker for {job_id}/{step}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactIndex for PostgresStore {
    async fn record_artifact(&self, artifact: Artifact) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_artifacts (job_id, kind, storage_key, sha256, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(artifact.job_id.as_uuid())
        .bind(artifact.kind.as_str())
        .bind(&artifact.storage_key)
        .bind(&artifact.sha256)
        .bind(&artifact.meta)
        .bind(artifact.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_artifact", e))?;
        Ok(())
    }

    async fn artifact_exists(&self, job_id: JobId, key: &str) -> EngineResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM job_artifacts WHERE job_id = $1 AND storage_key = $2 LIMIT 1",
        )
        .bind(job_id.as_uuid())
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("artifact_exists", e))?;
        Ok(row.is_some())
    }

    async fn latest_artifact(
        &self,
        job_id: JobId,
        kind: ArtifactKind,
    ) -> EngineResult<Option<Artifact>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, kind, storage_key, sha256, meta, created_at
            FROM job_artifacts
            WHERE job_id = $1 AND kind = $2
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(kind.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_artifact", e))?;

        match row {
            Some(row) => {
                let decoded = ArtifactRow::from_row(&row)
                    .map_err(|e| EngineError::storage(format!("decode artifact row: {e}")))?;
                Ok(Some(decoded.try_into()?))
            }
            None => Ok(None),
        }
    }

    async fn list_artifacts_of_kind(
        &self,
        job_id: JobId,
        kind: ArtifactKind,
    ) -> EngineResult<Vec<Artifact>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, kind, storage_key, sha256, meta, created_at
            FROM job_artifacts
            WHERE job_id = $1 AND kind = $2
            ORDER BY id ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(kind.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_artifacts_of_kind", e))?;

        decode_artifacts(rows)
    }

    async fn list_artifacts(&self, job_id: JobId) -> EngineResult<Vec<Artifact>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, kind, storage_key, sha256, meta, created_at
            FROM job_artifacts
            WHERE job_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_artifacts", e))?;

        decode_artifacts(rows)
    }
}

fn decode_artifacts(rows: Vec<PgRow>) -> EngineResult<Vec<Artifact>> {
    let mut artifacts = Vec::with_capacity(rows.len());
    for row in rows {
        let decoded = ArtifactRow::from_row(&row)
            .map_err(|e| EngineError::storage(format!("decode artifact row: {e}")))?;
        artifacts.push(decoded.try_into()?);
    }
    Ok(artifacts)
}

/// Map SQLx errors to the engine taxonomy.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::Database(db_err) => EngineError::storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            EngineError::storage(format!("connection pool closed in {operation}"))
        }
        other => EngineError::storage(format!("sqlx error in {operation}: {other}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    project_id: uuid::Uuid,
    spec: Value,
    status: String,
    step: Option<String>,
    attempt: i32,
    max_attempts: i32,
    retry_of: Option<uuid::Uuid>,
    claimed_by: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    presentation_id: Option<String>,
    presentation_url: Option<String>,
    error: Option<Value>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            spec: row.try_get("spec")?,
            status: row.try_get("status")?,
            step: row.try_get("step")?,
            attempt: row.try_get("attempt")?,
            max_attempts: row.try_get("max_attempts")?,
            retry_of: row.try_get("retry_of")?,
            claimed_by: row.try_get("claimed_by")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            presentation_id: row.try_get("presentation_id")?,
            presentation_url: row.try_get("presentation_url")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = EngineError;

    fn try_from(row: JobRow) -> Result<Self, EngineError> {
        let spec: JobSpec = serde_json::from_value(row.spec)
            .map_err(|e| EngineError::storage(format!("decode job spec: {e}")))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| EngineError::storage(format!("unknown job status: {}", row.status)))?;
        let step = match row.step.as_deref() {
            Some(s) => Some(
                StepName::parse(s)
                    .ok_or_else(|| EngineError::storage(format!("unknown step: {s}")))?,
            ),
            None => None,
        };
        let error: Option<JobError> = match row.error {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| EngineError::storage(format!("decode job error: {e}")))?,
            ),
            None => None,
        };
        Ok(Job {
            id: JobId::from_uuid(row.id),
            project_id: ProjectId::from_uuid(row.project_id),
            spec,
            status,
            step,
            attempt: row.attempt as u32,
            max_attempts: row.max_attempts as u32,
            retry_of: row.retry_of.map(JobId::from_uuid),
            claimed_by: row.claimed_by.map(WorkerId::from),
            lease_expires_at: row.lease_expires_at,
            presentation_id: row.presentation_id,
            presentation_url: row.presentation_url,
            error,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct EventRow {
    id: i64,
    job_id: uuid::Uuid,
    ts: DateTime<Utc>,
    level: String,
    step: Option<String>,
    message: String,
    payload: Option<Value>,
}

impl<'r> FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            ts: row.try_get("ts")?,
            level: row.try_get("level")?,
            step: row.try_get("step")?,
            message: row.try_get("message")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl TryFrom<EventRow> for JobEvent {
    type Error = EngineError;

    fn try_from(row: EventRow) -> Result<Self, EngineError> {
        let level = EventLevel::parse(&row.level)
            .ok_or_else(|| EngineError::storage(format!("unknown event level: {}", row.level)))?;
        let step = match row.step.as_deref() {
            Some(s) => Some(
                StepName::parse(s)
                    .ok_or_else(|| EngineError::storage(format!("unknown step: {s}")))?,
            ),
            None => None,
        };
        Ok(JobEvent {
            seq: row.id,
            job_id: JobId::from_uuid(row.job_id),
            ts: row.ts,
            level,
            step,
            message: row.message,
            payload: row.payload,
        })
    }
}

#[derive(Debug)]
struct MarkerRow {
    job_id: uuid::Uuid,
    step: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    result_key: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for MarkerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MarkerRow {
            job_id: row.try_get("job_id")?,
            step: row.try_get("step")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            result_key: row.try_get("result_key")?,
        })
    }
}

impl TryFrom<MarkerRow> for StepMarker {
    type Error = EngineError;

    fn try_from(row: MarkerRow) -> Result<Self, EngineError> {
        let step = StepName::parse(&row.step)
            .ok_or_else(|| EngineError::storage(format!("unknown step: {}", row.step)))?;
        let status = MarkerStatus::parse(&row.status).ok_or_else(|| {
            EngineError::storage(format!("unknown marker status: {}", row.status))
        })?;
        Ok(StepMarker {
            job_id: JobId::from_uuid(row.job_id),
            step,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            result_key: row.result_key,
        })
    }
}

#[derive(Debug)]
struct ArtifactRow {
    job_id: uuid::Uuid,
    kind: String,
    storage_key: String,
    sha256: String,
    meta: Option<Value>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ArtifactRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ArtifactRow {
            job_id: row.try_get("job_id")?,
            kind: row.try_get("kind")?,
            storage_key: row.try_get("storage_key")?,
            sha256: row.try_get("sha256")?,
            meta: row.try_get("meta")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = EngineError;

    fn try_from(row: ArtifactRow) -> Result<Self, EngineError> {
        let kind = ArtifactKind::parse(&row.kind)
            .ok_or_else(|| EngineError::storage(format!("unknown artifact kind: {}", row.kind)))?;
        Ok(Artifact {
            job_id: JobId::from_uuid(row.job_id),
            kind,
            storage_key: row.storage_key,
            sha256: row.sha256,
            meta: row.meta,
            created_at: row.created_at,
        })
    }
}

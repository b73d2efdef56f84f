//! The step machine: walks the fixed step order for one claimed job.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use chrono::Utc;

use slidegen_core::{EngineResult, Job, JobError, StepError, StepName, WorkerId};
use slidegen_queue::{
    Artifact, ArtifactKind, ArtifactStorage, EngineStore, EventLevel, MarkerStatus,
};

use crate::providers::{AnalysisProvider, SlidesProvider, TokenProvider};
use crate::steps::{self, StepFailure, StepResult};

/// Everything a pipeline run needs, shared across steps.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn EngineStore>,
    pub blobs: Arc<dyn ArtifactStorage>,
    pub analysis: Arc<dyn AnalysisProvider>,
    pub slides: Arc<dyn SlidesProvider>,
    pub tokens: Arc<dyn TokenProvider>,
    /// Identity the claim was taken under; all guarded writes use it.
    pub worker: WorkerId,
}

/// How a run ended. `Err` from [`StepMachine::run`] is reserved for
/// infrastructure faults and stale claims; those abandon the attempt.
#[derive(Debug)]
pub enum PipelineOutcome {
    Succeeded { presentation_url: Option<String> },
    Failed(JobError),
    Canceled,
}

/// Drives one claimed job through the pipeline.
pub struct StepMachine {
    deps: PipelineDeps,
}

impl StepMachine {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Run every remaining step for `job`.
    ///
    /// Completed markers short-circuit: a resumed attempt re-executes only
    /// the step that was in flight when the previous owner died.
    #[instrument(skip(self, job), fields(job_id = %job.id, attempt = job.attempt))]
    pub async fn run(&self, job: &Job) -> EngineResult<PipelineOutcome> {
        let store = &self.deps.store;

        for step in StepName::ORDER {
            // Cooperative cancellation, checked at every step boundary.
            if store.is_canceled(job.id).await? {
                info!(step = %step, "job canceled, halting pipeline");
                store
                    .append_event(
                        job.id,
                        EventLevel::Info,
                        Some(step),
                        "canceled before step",
                        None,
                    )
                    .await?;
                return Ok(PipelineOutcome::Canceled);
            }

            if let Some(marker) = store.marker(job.id, step).await? {
                if marker.is_completed() {
                    tracing::debug!(step = %step, "marker completed, skipping");
                    continue;
                }
            }

            store.advance_step(job.id, &self.deps.worker, step).await?;
            store.begin_step(job.id, step).await?;
            store
                .append_event(job.id, EventLevel::Info, Some(step), "step started", None)
                .await?;

            match self.execute(job, step).await {
                Ok(result_key) => {
                    store
                        .finish_step(job.id, step, MarkerStatus::Completed, result_key.as_deref())
                        .await?;
                    store
                        .append_event(
                            job.id,
                            EventLevel::Info,
                            Some(step),
                            "step completed",
                            result_key
                                .as_deref()
                                .map(|k| serde_json::json!({ "result_key": k })),
                        )
                        .await?;
                }
                Err(StepFailure::Classified(err)) => {
                    warn!(step = %step, class = %err.class, code = %err.code, "step failed");
                    store
                        .finish_step(job.id, step, MarkerStatus::Failed, None)
                        .await?;
                    store
                        .append_event(
                            job.id,
                            EventLevel::Error,
                            Some(step),
                            &err.message,
                            Some(serde_json::json!({
                                "class": err.class.as_str(),
                                "code": err.code,
                            })),
                        )
                        .await?;
                    self.write_trace(job, step, &err).await?;
                    return Ok(PipelineOutcome::Failed(JobError::from_step(err, step)));
                }
                Err(StepFailure::Engine(err)) => return Err(err),
            }
        }

        // The presentation url landed on the row in the create step.
        let finished = store.get(job.id).await?;
        Ok(PipelineOutcome::Succeeded {
            presentation_url: finished.presentation_url,
        })
    }

    /// Persist a plain-text trace for a failed run so the error survives
    /// retries, which start a fresh row.
    async fn write_trace(&self, job: &Job, step: StepName, err: &StepError) -> EngineResult<()> {
        let key = format!("jobs/{}/trace.txt", job.id);
        let body = format!(
            "job {} attempt {} failed at step {}\nclass: {}\ncode: {}\n\n{}\n",
            job.id, job.attempt, step, err.class, err.code, err.message
        );
        let sha = self.deps.blobs.write_bytes(&key, body.as_bytes()).await?;
        self.deps
            .store
            .record_artifact(Artifact {
                job_id: job.id,
                kind: ArtifactKind::Trace,
                storage_key: key,
                sha256: sha,
                meta: Some(serde_json::json!({
                    "step": step.as_str(),
                    "class": err.class.as_str(),
                    "code": err.code,
                })),
                created_at: Utc::now(),
            })
            .await
    }

    async fn execute(&self, job: &Job, step: StepName) -> StepResult {
        match step {
            StepName::ValidateInputs => steps::validate_inputs(&self.deps, job).await,
            StepName::ExtractLayouts => steps::extract_layouts(&self.deps, job).await,
            StepName::CleanLayouts => steps::clean_layouts(&self.deps, job).await,
            StepName::CreatePresentation => steps::create_presentation(&self.deps, job).await,
            StepName::BuildSlides => steps::build_slides(&self.deps, job).await,
        }
    }
}

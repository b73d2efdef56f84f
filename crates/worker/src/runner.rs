//! The worker loop: claim, heartbeat, run the pipeline, report.
//!
//! Workers coordinate solely through `claim_next`; there is no membership
//! or leader election. A worker that dies mid-run simply stops renewing its
//! lease and the job becomes claimable again, with markers limiting the
//! re-run to the step that was in flight.

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use slidegen_core::{EngineError, Job, JobOutcome};
use slidegen_pipeline::{PipelineDeps, PipelineOutcome, StepMachine};

use crate::config::WorkerConfig;

pub struct Worker {
    config: WorkerConfig,
    deps: PipelineDeps,
}

impl Worker {
    /// `deps.worker` must be the identity claims are taken under; it is
    /// overwritten from the config to keep the two in sync.
    pub fn new(config: WorkerConfig, mut deps: PipelineDeps) -> Self {
        deps.worker = config.worker_id.clone();
        Self { config, deps }
    }

    /// Poll until `shutdown` fires. In-flight jobs finish their current
    /// claim before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker = %self.config.worker_id, "worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self
                .deps
                .store
                .claim_next(&self.config.worker_id, self.config.lease)
                .await
            {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_delay()) => {}
                    }
                }
                Err(err) => {
                    warn!(%err, "claim scan failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_delay()) => {}
                    }
                }
            }
        }
        info!(worker = %self.config.worker_id, "worker stopped");
    }

    fn poll_delay(&self) -> std::time::Duration {
        let jitter_ms = self.config.poll_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.config.poll_interval + std::time::Duration::from_millis(jitter)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, attempt = job.attempt))]
    async fn process(&self, job: Job) {
        info!(step = ?job.step, "claimed job");

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.deps.clone(),
            self.config.clone(),
            job.id,
            heartbeat_stop.clone(),
        ));

        // The pipeline runs in its own task so a panic in a step is
        // contained to this job; the lease then expires and another worker
        // resumes from the markers.
        let machine = StepMachine::new(self.deps.clone());
        let run_job = job.clone();
        let run = tokio::spawn(async move { machine.run(&run_job).await });
        let result = run.await;

        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(EngineError::NotOwner(id))) => {
                warn!(job_id = %id, "claim lost mid-run, abandoning");
                return;
            }
            Ok(Err(err)) => {
                error!(%err, "pipeline aborted, leaving recovery to the lease");
                return;
            }
            Err(join_err) => {
                error!(%join_err, "pipeline task panicked, leaving recovery to the lease");
                return;
            }
        };

        let report = match outcome {
            PipelineOutcome::Succeeded { presentation_url } => {
                info!("job succeeded");
                JobOutcome::Succeeded { presentation_url }
            }
            PipelineOutcome::Failed(error) => {
                warn!(%error, "job failed");
                JobOutcome::Failed { error }
            }
            PipelineOutcome::Canceled => {
                // The row is already terminal-canceled; completing releases
                // the claim and changes nothing else.
                info!("job canceled");
                JobOutcome::Canceled
            }
        };

        match self
            .deps
            .store
            .complete(job.id, &self.config.worker_id, report)
            .await
        {
            Ok(()) => {}
            Err(EngineError::NotOwner(id)) => {
                warn!(job_id = %id, "claim lost before completion");
            }
            Err(err) => error!(%err, "failed to record job outcome"),
        }
    }
}

/// Renew the lease until stopped. A failed renewal ends the task; the step
/// machine will hit `NotOwner` on its next guarded write.
async fn heartbeat_loop(
    deps: PipelineDeps,
    config: WorkerConfig,
    job_id: slidegen_core::JobId,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval());
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Err(err) = deps
            .store
            .heartbeat(job_id, &config.worker_id, config.lease)
            .await
        {
            warn!(%job_id, %err, "heartbeat failed, stopping renewals");
            return;
        }
    }
}

//! End-to-end pipeline runs against the in-memory store and stub providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use slidegen_core::{
    ErrorClass, ImageId, ImageRef, Job, JobOutcome, JobSpec, PageSize, ProjectId, StepError,
    StepName, WorkerId,
};
use slidegen_pipeline::{
    Credentials, PipelineDeps, PipelineOutcome, PresentationHandle, SlidePlan, SlidesProvider,
    StaticTokenProvider, StepMachine, StubAnalysisProvider, StubSlidesProvider,
};
use slidegen_queue::{
    ArtifactKind, ArtifactIndex, EventLog, JobQueue, MarkerStatus, MemoryArtifactStorage,
    MemoryStore, StepMarkers,
};

/// Slides backend whose `populate` fails transiently a set number of times.
struct FlakySlidesProvider {
    inner: StubSlidesProvider,
    failures_left: AtomicUsize,
}

impl FlakySlidesProvider {
    fn failing(times: usize) -> Self {
        Self {
            inner: StubSlidesProvider::new(),
            failures_left: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl SlidesProvider for FlakySlidesProvider {
    async fn find_or_create_presentation(
        &self,
        creds: &Credentials,
        request_key: &str,
        title: &str,
        page_size: PageSize,
    ) -> Result<PresentationHandle, StepError> {
        self.inner
            .find_or_create_presentation(creds, request_key, title, page_size)
            .await
    }

    async fn populate(
        &self,
        creds: &Credentials,
        presentation_id: &str,
        slides: &[SlidePlan],
    ) -> Result<usize, StepError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StepError::transient(
                "provider_unavailable",
                "503 from slides backend",
            ));
        }
        self.inner.populate(creds, presentation_id, slides).await
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    analysis: Arc<StubAnalysisProvider>,
    worker: WorkerId,
    machine: StepMachine,
}

impl Harness {
    fn new(slides: Arc<dyn SlidesProvider>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let analysis = Arc::new(StubAnalysisProvider::new());
        let worker = WorkerId::new("w1");
        let machine = StepMachine::new(PipelineDeps {
            store: store.clone(),
            blobs: Arc::new(MemoryArtifactStorage::new()),
            analysis: analysis.clone(),
            slides,
            tokens: Arc::new(StaticTokenProvider::default()),
            worker: worker.clone(),
        });
        Self {
            store,
            analysis,
            worker,
            machine,
        }
    }

    async fn enqueue_and_claim(&self, spec: JobSpec) -> Job {
        self.store.enqueue(spec).await.unwrap();
        self.store
            .claim_next(&self.worker, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap()
    }
}

fn image(ordinal: u32, name: &str) -> ImageRef {
    ImageRef {
        id: ImageId::new(),
        ordinal,
        storage_key: format!("uploads/{name}"),
        sha256: format!("{ordinal:02x}").repeat(32),
        original_filename: name.to_string(),
    }
}

fn spec() -> JobSpec {
    JobSpec {
        project_id: ProjectId::new(),
        title: "quarterly infographics".to_string(),
        page_size: PageSize::Widescreen16x9,
        images: vec![image(0, "cover.png"), image(1, "revenue.png")],
        max_attempts: 3,
    }
}

#[tokio::test]
async fn full_run_succeeds_with_all_markers_and_artifacts() {
    let h = Harness::new(Arc::new(StubSlidesProvider::new()));
    let job = h.enqueue_and_claim(spec()).await;

    let outcome = h.machine.run(&job).await.unwrap();
    let url = match outcome {
        PipelineOutcome::Succeeded { presentation_url } => presentation_url.unwrap(),
        other => panic!("expected success, got {other:?}"),
    };
    assert!(url.starts_with("https://slides.invalid/d/"));

    for step in StepName::ORDER {
        let marker = h.store.marker(job.id, step).await.unwrap().unwrap();
        assert_eq!(marker.status, MarkerStatus::Completed, "{step}");
    }

    let raw = h
        .store
        .list_artifacts_of_kind(job.id, ArtifactKind::LayoutRaw)
        .await
        .unwrap();
    assert_eq!(raw.len(), 2);
    let clean = h
        .store
        .list_artifacts_of_kind(job.id, ArtifactKind::LayoutClean)
        .await
        .unwrap();
    assert_eq!(clean.len(), 2);
    for kind in [
        ArtifactKind::InputManifest,
        ArtifactKind::RunConfig,
        ArtifactKind::Presentation,
    ] {
        assert!(
            h.store.latest_artifact(job.id, kind).await.unwrap().is_some(),
            "{kind}"
        );
    }

    let events = h.store.list_events(job.id).await.unwrap();
    // Started and completed for each of the five steps.
    assert_eq!(events.len(), 10);

    // The row carries the deck handle.
    let row = h.store.get(job.id).await.unwrap();
    assert!(row.presentation_id.is_some());
}

#[tokio::test]
async fn completed_markers_short_circuit_re_execution() {
    let h = Harness::new(Arc::new(StubSlidesProvider::new()));
    let job = h.enqueue_and_claim(spec()).await;

    h.machine.run(&job).await.unwrap();
    assert_eq!(h.analysis.call_count(), 2);

    // Same claimed job run again, as after a crash between the last marker
    // write and `complete`: everything is skipped.
    let outcome = h.machine.run(&job).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Succeeded { .. }));
    assert_eq!(h.analysis.call_count(), 2);
}

#[tokio::test]
async fn transient_build_failure_halts_with_classified_error() {
    let h = Harness::new(Arc::new(FlakySlidesProvider::failing(usize::MAX)));
    let job = h.enqueue_and_claim(spec()).await;

    let outcome = h.machine.run(&job).await.unwrap();
    let error = match outcome {
        PipelineOutcome::Failed(error) => error,
        other => panic!("expected failure, got {other:?}"),
    };
    assert_eq!(error.class, ErrorClass::Transient);
    assert_eq!(error.step, Some(StepName::BuildSlides));

    // Earlier steps completed; only the build marker is failed.
    let create = h
        .store
        .marker(job.id, StepName::CreatePresentation)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(create.status, MarkerStatus::Completed);
    let build = h
        .store
        .marker(job.id, StepName::BuildSlides)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(build.status, MarkerStatus::Failed);

    // A failed run leaves a trace artifact behind for inspection.
    let trace = h
        .store
        .latest_artifact(job.id, ArtifactKind::Trace)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trace.storage_key, format!("jobs/{}/trace.txt", job.id));
    let meta = trace.meta.unwrap();
    assert_eq!(meta["class"], "transient");
    assert_eq!(meta["step"], "build_slides");
}

#[tokio::test]
async fn retry_after_transient_failure_runs_a_clean_slate_and_succeeds() {
    let h = Harness::new(Arc::new(FlakySlidesProvider::failing(1)));
    let job = h.enqueue_and_claim(spec()).await;

    let outcome = h.machine.run(&job).await.unwrap();
    let error = match outcome {
        PipelineOutcome::Failed(error) => error,
        other => panic!("expected failure, got {other:?}"),
    };
    h.store
        .complete(job.id, &h.worker, JobOutcome::Failed { error })
        .await
        .unwrap();
    assert_eq!(h.analysis.call_count(), 2);

    let retry_id = h.store.retry(job.id).await.unwrap();
    let retried = h
        .store
        .claim_next(&h.worker, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retried.id, retry_id);

    let outcome = h.machine.run(&retried).await.unwrap();
    let url = match outcome {
        PipelineOutcome::Succeeded { presentation_url } => presentation_url,
        other => panic!("expected success, got {other:?}"),
    };
    assert!(url.is_some());

    // Markers are keyed by job id: the fresh attempt re-extracted.
    assert_eq!(h.analysis.call_count(), 4);
}

#[tokio::test]
async fn cancel_is_observed_at_the_next_step_boundary() {
    let h = Harness::new(Arc::new(StubSlidesProvider::new()));
    let job = h.enqueue_and_claim(spec()).await;

    h.store.cancel(job.id).await.unwrap();

    let outcome = h.machine.run(&job).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Canceled));

    // Nothing executed.
    for step in StepName::ORDER {
        assert!(h.store.marker(job.id, step).await.unwrap().is_none());
    }
}

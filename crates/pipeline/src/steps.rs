//! The five pipeline steps.
//!
//! Each step is idempotent against partial external side effects:
//! deterministic artifact keys derived from the job id make re-writes land
//! on the same object, and the presentation is created under a request key
//! the backend deduplicates on. Classified failures ([`StepError`]) fail the
//! job; store or blob faults ([`EngineError`]) abort the attempt and leave
//! recovery to lease expiry.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use slidegen_core::{
    bbox_px_to_pt, compute_fit, layout, EngineError, Job, Layout, StepError,
};
use slidegen_queue::{read_json, write_json, Artifact, ArtifactKind};

use crate::machine::PipelineDeps;
use crate::providers::{PlacedRegion, SlidePlan};

/// Why a step did not complete.
#[derive(Debug)]
pub enum StepFailure {
    /// Classified failure; the job transitions to failed.
    Classified(StepError),
    /// Infrastructure fault; the attempt is abandoned and the lease
    /// performs recovery.
    Engine(EngineError),
}

impl From<StepError> for StepFailure {
    fn from(err: StepError) -> Self {
        StepFailure::Classified(err)
    }
}

impl From<EngineError> for StepFailure {
    fn from(err: EngineError) -> Self {
        StepFailure::Engine(err)
    }
}

/// `Ok` carries the marker's result key, when the step has a primary output.
pub type StepResult = Result<Option<String>, StepFailure>;

/// Summary persisted with the `presentation` artifact.
#[derive(Debug, Serialize, Deserialize)]
pub struct PresentationSummary {
    pub presentation_id: String,
    pub url: String,
    pub slide_count: usize,
}

fn manifest_key(job: &Job) -> String {
    format!("jobs/{}/input_manifest.json", job.id)
}

fn raw_layout_key(job: &Job, ordinal: u32, sha256: &str) -> String {
    // Validated specs carry 64 hex chars, but truncation stays
    // boundary-safe regardless of input.
    let short = sha256.get(..8).unwrap_or(sha256);
    format!("jobs/{}/layouts/raw_{:03}_{}.json", job.id, ordinal, short)
}

fn run_config_key(job: &Job) -> String {
    format!("jobs/{}/run_config.json", job.id)
}

fn presentation_key(job: &Job) -> String {
    format!("jobs/{}/presentation.json", job.id)
}

/// The idempotent create key: one deck per job, ever.
pub fn presentation_request_key(job: &Job) -> String {
    format!("deck-{}", job.id)
}

/// Check the spec and credentials, then persist the input manifest.
pub async fn validate_inputs(deps: &PipelineDeps, job: &Job) -> StepResult {
    job.spec
        .validate()
        .map_err(|e| StepError::permanent("invalid_spec", e.to_string()))?;
    deps.tokens.credentials_for(job.project_id).await?;

    let key = manifest_key(job);
    let manifest = json!({
        "title": job.spec.title,
        "page_size": job.spec.page_size.as_str(),
        "images": job.spec.ordered_images().iter().map(|i| json!({
            "id": i.id,
            "ordinal": i.ordinal,
            "storage_key": i.storage_key,
            "sha256": i.sha256,
        })).collect::<Vec<_>>(),
    });
    let sha = write_json(deps.blobs.as_ref(), &key, &manifest).await?;
    deps.store
        .record_artifact(Artifact {
            job_id: job.id,
            kind: ArtifactKind::InputManifest,
            storage_key: key.clone(),
            sha256: sha,
            meta: None,
            created_at: Utc::now(),
        })
        .await?;
    Ok(Some(key))
}

/// Run the analysis provider over each image, oldest ordinal first.
///
/// Re-entrant mid-list: images whose raw layout already landed in the index
/// are skipped, so a crash after image 3 of 5 re-analyzes only 4 and 5.
pub async fn extract_layouts(deps: &PipelineDeps, job: &Job) -> StepResult {
    for image in job.spec.ordered_images() {
        let key = raw_layout_key(job, image.ordinal, &image.sha256);
        if deps.store.artifact_exists(job.id, &key).await? {
            tracing::debug!(job_id = %job.id, key, "raw layout already extracted");
            continue;
        }
        let layout = deps.analysis.extract_layout(image).await?;
        let sha = write_json(deps.blobs.as_ref(), &key, &layout).await?;
        deps.store
            .record_artifact(Artifact {
                job_id: job.id,
                kind: ArtifactKind::LayoutRaw,
                storage_key: key,
                sha256: sha,
                meta: Some(json!({ "image_id": image.id, "ordinal": image.ordinal })),
                created_at: Utc::now(),
            })
            .await?;
    }
    Ok(None)
}

/// Normalize every raw layout and persist the cleaned versions plus the run
/// configuration used.
pub async fn clean_layouts(deps: &PipelineDeps, job: &Job) -> StepResult {
    let raw = deps
        .store
        .list_artifacts_of_kind(job.id, ArtifactKind::LayoutRaw)
        .await?;
    if raw.is_empty() {
        return Err(StepError::permanent("no_layouts", "no raw layouts to clean").into());
    }

    let mut region_counts = Vec::with_capacity(raw.len());
    for artifact in &raw {
        let layout: Layout = read_json(deps.blobs.as_ref(), &artifact.storage_key).await?;
        let cleaned = layout::clean(layout);
        region_counts.push(cleaned.regions.len());

        let key = artifact.storage_key.replacen("/raw_", "/clean_", 1);
        let sha = write_json(deps.blobs.as_ref(), &key, &cleaned).await?;
        deps.store
            .record_artifact(Artifact {
                job_id: job.id,
                kind: ArtifactKind::LayoutClean,
                storage_key: key,
                sha256: sha,
                meta: artifact.meta.clone(),
                created_at: Utc::now(),
            })
            .await?;
    }

    let key = run_config_key(job);
    let config = json!({
        "page_size": job.spec.page_size.as_str(),
        "min_region_pt": 10.0,
        "layouts": raw.len(),
        "regions_per_layout": region_counts,
    });
    let sha = write_json(deps.blobs.as_ref(), &key, &config).await?;
    deps.store
        .record_artifact(Artifact {
            job_id: job.id,
            kind: ArtifactKind::RunConfig,
            storage_key: key.clone(),
            sha256: sha,
            meta: None,
            created_at: Utc::now(),
        })
        .await?;
    Ok(Some(key))
}

/// Find-or-create the external presentation and persist its handle on the
/// job row.
pub async fn create_presentation(deps: &PipelineDeps, job: &Job) -> StepResult {
    // A crash between the provider call and the marker write leaves the
    // handle on the row; skip straight through.
    let current = deps.store.get(job.id).await?;
    if current.presentation_id.is_some() {
        tracing::debug!(job_id = %job.id, "presentation already created");
        return Ok(None);
    }

    let creds = deps.tokens.credentials_for(job.project_id).await?;
    let handle = deps
        .slides
        .find_or_create_presentation(
            &creds,
            &presentation_request_key(job),
            &job.spec.title,
            job.spec.page_size,
        )
        .await?;
    deps.store
        .set_presentation(job.id, &deps.worker, &handle.id, &handle.url)
        .await?;
    Ok(None)
}

/// Fit the cleaned layouts onto slides and fill the presentation.
pub async fn build_slides(deps: &PipelineDeps, job: &Job) -> StepResult {
    let current = deps.store.get(job.id).await?;
    let presentation_id = current.presentation_id.ok_or_else(|| {
        StepError::permanent("missing_presentation", "no presentation on the job row")
    })?;
    let presentation_url = current.presentation_url.unwrap_or_default();

    let clean = deps
        .store
        .list_artifacts_of_kind(job.id, ArtifactKind::LayoutClean)
        .await?;
    if clean.is_empty() {
        return Err(StepError::permanent("no_layouts", "no clean layouts to build from").into());
    }

    let (page_w, page_h) = job.spec.page_size.dimensions_pt();
    let mut plans = Vec::with_capacity(clean.len());
    for (idx, artifact) in clean.iter().enumerate() {
        let layout: Layout = read_json(deps.blobs.as_ref(), &artifact.storage_key).await?;
        let fit = compute_fit(layout.image_px.width, layout.image_px.height, page_w, page_h);
        let ordinal = artifact
            .meta
            .as_ref()
            .and_then(|m| m.get("ordinal"))
            .and_then(|v| v.as_u64())
            .unwrap_or(idx as u64) as u32;
        let regions = layout
            .regions
            .iter()
            .map(|region| {
                let (x_pt, y_pt, w_pt, h_pt) = bbox_px_to_pt(&region.bbox, &fit);
                PlacedRegion {
                    region: region.clone(),
                    x_pt,
                    y_pt,
                    w_pt,
                    h_pt,
                }
            })
            .collect();
        plans.push(SlidePlan {
            ordinal,
            fit,
            regions,
        });
    }
    plans.sort_by_key(|p| p.ordinal);

    let creds = deps.tokens.credentials_for(job.project_id).await?;
    let slide_count = deps
        .slides
        .populate(&creds, &presentation_id, &plans)
        .await?;

    let key = presentation_key(job);
    let summary = PresentationSummary {
        presentation_id,
        url: presentation_url,
        slide_count,
    };
    let sha = write_json(deps.blobs.as_ref(), &key, &summary).await?;
    deps.store
        .record_artifact(Artifact {
            job_id: job.id,
            kind: ArtifactKind::Presentation,
            storage_key: key.clone(),
            sha256: sha,
            meta: Some(json!({ "slide_count": slide_count })),
            created_at: Utc::now(),
        })
        .await?;
    Ok(Some(key))
}

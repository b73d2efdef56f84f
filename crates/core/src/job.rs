//! Job model: spec, status, step cursor, claim state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult, JobError};
use crate::id::{ImageId, JobId, ProjectId, WorkerId};

/// Default attempt cap applied at enqueue time.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed; no owner.
    Queued,
    /// Claimed by a worker with a live lease.
    Running,
    /// Terminal: the pipeline ran to completion.
    Succeeded,
    /// Terminal: a step failed; see the error summary.
    Failed,
    /// Terminal: canceled externally; never claimed again.
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named pipeline steps, in execution order.
///
/// The pipeline is fixed and linear; [`StepName::ORDER`] is the single
/// dispatch table the step machine walks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    ValidateInputs,
    ExtractLayouts,
    CleanLayouts,
    CreatePresentation,
    BuildSlides,
}

impl StepName {
    /// Execution order of the pipeline.
    pub const ORDER: [StepName; 5] = [
        StepName::ValidateInputs,
        StepName::ExtractLayouts,
        StepName::CleanLayouts,
        StepName::CreatePresentation,
        StepName::BuildSlides,
    ];

    pub fn first() -> StepName {
        Self::ORDER[0]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::ValidateInputs => "validate_inputs",
            StepName::ExtractLayouts => "extract_layouts",
            StepName::CleanLayouts => "clean_layouts",
            StepName::CreatePresentation => "create_presentation",
            StepName::BuildSlides => "build_slides",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validate_inputs" => Some(StepName::ValidateInputs),
            "extract_layouts" => Some(StepName::ExtractLayouts),
            "clean_layouts" => Some(StepName::CleanLayouts),
            "create_presentation" => Some(StepName::CreatePresentation),
            "build_slides" => Some(StepName::BuildSlides),
            _ => None,
        }
    }
}

impl core::fmt::Display for StepName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target slide page size.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSize {
    #[serde(rename = "16:9")]
    Widescreen16x9,
    #[serde(rename = "16:10")]
    Widescreen16x10,
    #[serde(rename = "4:3")]
    Standard4x3,
}

impl PageSize {
    /// Page dimensions in points (Google Slides presets).
    pub fn dimensions_pt(&self) -> (f64, f64) {
        match self {
            PageSize::Widescreen16x9 => (720.0, 405.0),
            PageSize::Widescreen16x10 => (720.0, 450.0),
            PageSize::Standard4x3 => (720.0, 540.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageSize::Widescreen16x9 => "16:9",
            PageSize::Widescreen16x10 => "16:10",
            PageSize::Standard4x3 => "4:3",
        }
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::Widescreen16x9
    }
}

/// Reference to an uploaded source image. Bytes live in the external upload
/// store; the engine only carries the locator and integrity hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: ImageId,
    /// Position of the image in the deck (0-based).
    pub ordinal: u32,
    pub storage_key: String,
    pub sha256: String,
    pub original_filename: String,
}

/// Everything needed to enqueue a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub page_size: PageSize,
    pub images: Vec<ImageRef>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl JobSpec {
    /// Validate the spec before a row is created.
    pub fn validate(&self) -> EngineResult<()> {
        if self.title.trim().is_empty() {
            return Err(EngineError::InvalidSpec("title must not be empty".into()));
        }
        if self.images.is_empty() {
            return Err(EngineError::InvalidSpec(
                "job requires at least one image".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidSpec(
                "max_attempts must be at least 1".into(),
            ));
        }
        let mut ordinals: Vec<u32> = self.images.iter().map(|i| i.ordinal).collect();
        ordinals.sort_unstable();
        ordinals.dedup();
        if ordinals.len() != self.images.len() {
            return Err(EngineError::InvalidSpec(
                "image ordinals must be unique".into(),
            ));
        }
        for image in &self.images {
            if image.storage_key.trim().is_empty() {
                return Err(EngineError::InvalidSpec(format!(
                    "image {} has no storage key",
                    image.id
                )));
            }
            if image.sha256.len() != 64
                || !image.sha256.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(EngineError::InvalidSpec(format!(
                    "image {} has a malformed sha256 (expected 64 hex chars)",
                    image.id
                )));
            }
        }
        Ok(())
    }

    /// Images in deck order.
    pub fn ordered_images(&self) -> Vec<&ImageRef> {
        let mut images: Vec<&ImageRef> = self.images.iter().collect();
        images.sort_by_key(|i| i.ordinal);
        images
    }
}

/// A queue row: one attempt of one conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub spec: JobSpec,
    pub status: JobStatus,
    /// Step cursor; `None` until the first claim.
    pub step: Option<StepName>,
    /// Attempt number, 1-based. Retries create a new row with attempt + 1.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Lineage to the failed row this attempt retries, if any.
    pub retry_of: Option<JobId>,
    pub claimed_by: Option<WorkerId>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub presentation_id: Option<String>,
    pub presentation_url: Option<String>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build the initial queued row for a validated spec.
    pub fn from_spec(spec: JobSpec) -> EngineResult<Self> {
        spec.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: JobId::new(),
            project_id: spec.project_id,
            max_attempts: spec.max_attempts,
            spec,
            status: JobStatus::Queued,
            step: None,
            attempt: 1,
            retry_of: None,
            claimed_by: None,
            lease_expires_at: None,
            presentation_id: None,
            presentation_url: None,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        })
    }

    /// Build the fresh queued row for a retry of this (failed) job.
    ///
    /// Cursor, claim, presentation handle and error all reset; only the spec
    /// and lineage carry over. Callers enforce the failed/attempt-cap
    /// preconditions.
    pub fn next_attempt(&self) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            project_id: self.project_id,
            spec: self.spec.clone(),
            status: JobStatus::Queued,
            step: None,
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            retry_of: Some(self.id),
            claimed_by: None,
            lease_expires_at: None,
            presentation_id: None,
            presentation_url: None,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    /// Whether the claim held on this row has expired as of `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match self.lease_expires_at {
            Some(expiry) => expiry <= now,
            None => true,
        }
    }

    /// Whether `claim_next` may hand this row to a worker at `now`.
    pub fn claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued => true,
            // Crash recovery: a running row whose lease lapsed is fair game.
            JobStatus::Running => self.lease_expired(now),
            _ => false,
        }
    }
}

/// Terminal outcome reported by a worker via `complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded { presentation_url: Option<String> },
    Failed { error: JobError },
    /// The run stopped at a step boundary because the row was canceled.
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClass, StepError};

    fn spec() -> JobSpec {
        JobSpec {
            project_id: ProjectId::new(),
            title: "Q3 infographics".to_string(),
            page_size: PageSize::Widescreen16x9,
            images: vec![ImageRef {
                id: ImageId::new(),
                ordinal: 0,
                storage_key: "uploads/a.png".to_string(),
                sha256: "ab".repeat(32),
                original_filename: "a.png".to_string(),
            }],
            max_attempts: 3,
        }
    }

    #[test]
    fn spec_requires_images() {
        let mut s = spec();
        s.images.clear();
        assert!(matches!(s.validate(), Err(EngineError::InvalidSpec(_))));
    }

    #[test]
    fn spec_rejects_duplicate_ordinals() {
        let mut s = spec();
        let mut dup = s.images[0].clone();
        dup.id = ImageId::new();
        s.images.push(dup);
        assert!(matches!(s.validate(), Err(EngineError::InvalidSpec(_))));
    }

    #[test]
    fn spec_rejects_malformed_sha256() {
        // Non-hex bytes, including ones that are not char boundaries at
        // every offset, must never reach the queue.
        let mut s = spec();
        s.images[0].sha256 = "aaaaaaa\u{e9}aaaa".to_string();
        assert!(matches!(s.validate(), Err(EngineError::InvalidSpec(_))));

        let mut s = spec();
        s.images[0].sha256 = "ab".repeat(31);
        assert!(matches!(s.validate(), Err(EngineError::InvalidSpec(_))));

        let mut s = spec();
        s.images[0].sha256 = "zz".repeat(32);
        assert!(matches!(s.validate(), Err(EngineError::InvalidSpec(_))));
    }

    #[test]
    fn new_job_starts_queued_on_attempt_one() {
        let job = Job::from_spec(spec()).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt, 1);
        assert!(job.step.is_none());
        assert!(job.claimed_by.is_none());
    }

    #[test]
    fn next_attempt_resets_cursor_and_links_lineage() {
        let mut job = Job::from_spec(spec()).unwrap();
        job.status = JobStatus::Failed;
        job.step = Some(StepName::BuildSlides);
        job.error = Some(JobError::from_step(
            StepError::new(ErrorClass::Transient, "x", "y"),
            StepName::BuildSlides,
        ));

        let retry = job.next_attempt();
        assert_ne!(retry.id, job.id);
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.retry_of, Some(job.id));
        assert_eq!(retry.status, JobStatus::Queued);
        assert!(retry.step.is_none());
        assert!(retry.error.is_none());
        assert!(retry.presentation_id.is_none());
    }

    #[test]
    fn canceled_rows_are_never_claimable() {
        let mut job = Job::from_spec(spec()).unwrap();
        job.status = JobStatus::Canceled;
        assert!(!job.claimable(Utc::now()));
    }

    #[test]
    fn running_rows_claimable_only_after_lease_expiry() {
        let mut job = Job::from_spec(spec()).unwrap();
        job.status = JobStatus::Running;
        job.claimed_by = Some(WorkerId::new("w1"));
        job.lease_expires_at = Some(Utc::now() + chrono::Duration::seconds(30));
        assert!(!job.claimable(Utc::now()));

        job.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(job.claimable(Utc::now()));
    }

    #[test]
    fn step_order_is_stable() {
        assert_eq!(StepName::first(), StepName::ValidateInputs);
        for step in StepName::ORDER {
            assert_eq!(StepName::parse(step.as_str()), Some(step));
        }
    }
}

//! Engine error model.
//!
//! Two layers: [`EngineError`] covers the queue contract (claim races,
//! retry preconditions, storage faults), while [`StepError`] carries the
//! recovery classification a pipeline step attaches to its failure. Step
//! failures never escape the step machine as process crashes; they are
//! folded into the job's error summary as a [`JobError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::JobId;
use crate::job::StepName;

/// Result type used across the queue and pipeline layers.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the queue contract operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Enqueue-time rejection; no row is created.
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    /// The referenced job does not exist.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The caller's claim is stale: the lease expired and another worker
    /// re-claimed the row. The caller must stop work on the job immediately.
    #[error("worker no longer owns job {0}")]
    NotOwner(JobId),

    /// Retry requested for a job that is not in a terminal-failed state.
    #[error("job {0} is not in a failed state")]
    NotFailed(JobId),

    /// Retry requested but the attempt cap is already reached.
    #[error("job {id} exhausted its retries (attempt {attempt} of {max_attempts})")]
    RetryExhausted {
        id: JobId,
        attempt: u32,
        max_attempts: u32,
    },

    /// Underlying store failure (connection loss, constraint violation, ...).
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Recovery classification for a step failure.
///
/// Drives whether the external caller is offered a retry: `Transient` and
/// `Quota` failures are worth re-running the job later, `Permanent` is not.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network blip, provider 5xx — retrying the whole job later may help.
    Transient,
    /// Invalid input or configuration; retrying cannot help without change.
    Permanent,
    /// Provider rate limit; the caller should back off before retrying.
    Quota,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Quota => "quota",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(ErrorClass::Transient),
            "permanent" => Some(ErrorClass::Permanent),
            "quota" => Some(ErrorClass::Quota),
            _ => None,
        }
    }

    /// Whether a retry is worth offering for this class.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

impl core::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure raised by a pipeline step or provider call.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct StepError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
}

impl StepError {
    pub fn new(class: ErrorClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, code, message)
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, code, message)
    }

    pub fn quota(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Quota, code, message)
    }
}

/// Error summary persisted on a failed job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
    /// The step that failed, when the failure came from step execution.
    pub step: Option<StepName>,
}

impl JobError {
    pub fn from_step(err: StepError, step: StepName) -> Self {
        Self {
            class: err.class,
            code: err.code,
            message: err.message,
            step: Some(step),
        }
    }
}

impl core::fmt::Display for JobError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.step {
            Some(step) => write!(f, "[{}] {} at {}: {}", self.class, self.code, step, self.message),
            None => write!(f, "[{}] {}: {}", self.class, self.code, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_class_round_trips() {
        for class in [ErrorClass::Transient, ErrorClass::Permanent, ErrorClass::Quota] {
            assert_eq!(ErrorClass::parse(class.as_str()), Some(class));
        }
        assert_eq!(ErrorClass::parse("fatal"), None);
    }

    #[test]
    fn permanent_is_not_retriable() {
        assert!(ErrorClass::Transient.is_retriable());
        assert!(ErrorClass::Quota.is_retriable());
        assert!(!ErrorClass::Permanent.is_retriable());
    }

    #[test]
    fn job_error_mentions_failing_step() {
        let err = JobError::from_step(
            StepError::transient("provider_unavailable", "503 from analysis provider"),
            StepName::ExtractLayouts,
        );
        let text = err.to_string();
        assert!(text.contains("extract_layouts"));
        assert!(text.contains("transient"));
    }
}

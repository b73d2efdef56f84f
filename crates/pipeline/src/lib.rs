//! `slidegen-pipeline` — the conversion pipeline run against a claimed job.
//!
//! A fixed linear step machine (validate → extract → clean → create →
//! build), with idempotency markers making every step safe to re-enter
//! after a crash, and provider traits at the seams to the analysis and
//! slides backends.

pub mod machine;
pub mod providers;
pub mod steps;

pub use machine::{PipelineDeps, PipelineOutcome, StepMachine};
pub use providers::{
    AnalysisProvider, Credentials, PlacedRegion, PresentationHandle, SlidePlan, SlidesProvider,
    StaticTokenProvider, StubAnalysisProvider, StubSlidesProvider, TokenProvider,
};

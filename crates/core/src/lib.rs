//! `slidegen-core` — domain foundation for the conversion engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure
//! concerns): typed identifiers, the job model, the layout model produced by
//! image analysis, and the error taxonomy shared by the queue and pipeline.

pub mod error;
pub mod geometry;
pub mod id;
pub mod job;
pub mod layout;

pub use error::{EngineError, EngineResult, ErrorClass, JobError, StepError};
pub use geometry::{bbox_px_to_pt, compute_fit, Fit};
pub use id::{ImageId, JobId, ProjectId, WorkerId};
pub use job::{
    ImageRef, Job, JobOutcome, JobSpec, JobStatus, PageSize, StepName, DEFAULT_MAX_ATTEMPTS,
};
pub use layout::{BBox, ImageSize, Layout, Region, RegionKind, TextStyle};

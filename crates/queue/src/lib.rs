//! `slidegen-queue` — durable job queue and run-state storage.
//!
//! The queue is a table in the relational store; workers coordinate purely
//! through claims and leases on its rows. Alongside the queue live the
//! event log, the step markers that make re-execution idempotent, and the
//! artifact index pointing into blob storage.

pub mod blob;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use blob::{
    read_json, sha256_hex, write_json, ArtifactStorage, FsArtifactStorage, MemoryArtifactStorage,
};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::{ArtifactIndex, EngineStore, EventLog, JobQueue, StepMarkers};
pub use types::{Artifact, ArtifactKind, EventLevel, JobEvent, MarkerStatus, StepMarker};

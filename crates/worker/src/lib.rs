//! `slidegen-worker` — poll/claim/heartbeat loop around the pipeline.

pub mod config;
pub mod runner;

pub use config::WorkerConfig;
pub use runner::Worker;

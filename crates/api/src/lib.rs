//! `slidegen-api` — thin HTTP surface over the job queue.

pub mod app;

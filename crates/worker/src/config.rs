//! Worker configuration from the environment.

use std::time::Duration;

use anyhow::Context;

use slidegen_core::WorkerId;

const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_POLL_JITTER_MS: u64 = 1000;
const DEFAULT_LEASE_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: WorkerId,
    /// Sleep between empty claim scans, before jitter.
    pub poll_interval: Duration,
    /// Random extra sleep added to each poll, decorrelating workers that
    /// started together.
    pub poll_jitter: Duration,
    pub lease: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let worker_id = std::env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id());
        Ok(Self {
            worker_id: WorkerId::new(worker_id),
            poll_interval: Duration::from_secs(env_u64("POLL_INTERVAL_SECS", DEFAULT_POLL_SECS)?),
            poll_jitter: Duration::from_millis(env_u64(
                "POLL_JITTER_MS",
                DEFAULT_POLL_JITTER_MS,
            )?),
            lease: Duration::from_secs(env_u64("LEASE_SECS", DEFAULT_LEASE_SECS)?),
        })
    }

    /// Renewal cadence; a third of the lease leaves two missed beats of
    /// slack before another worker may reclaim.
    pub fn heartbeat_interval(&self) -> Duration {
        self.lease / 3
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::new(default_worker_id()),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            poll_jitter: Duration::from_millis(DEFAULT_POLL_JITTER_MS),
            lease: Duration::from_secs(DEFAULT_LEASE_SECS),
        }
    }
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{host}-{}", std::process::id())
}

fn env_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("{name} must be an integer, got {value:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_a_third_of_the_lease() {
        let config = WorkerConfig {
            lease: Duration::from_secs(60),
            ..WorkerConfig::default()
        };
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(20));
    }

    #[test]
    fn default_worker_id_includes_the_pid() {
        let id = default_worker_id();
        assert!(id.ends_with(&std::process::id().to_string()));
    }
}

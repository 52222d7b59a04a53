//! Processor configuration
//!
//! This module provides `ProcessorConfig` for configuring the job processor.

use crate::job::DEFAULT_MAX_ATTEMPTS;
use crate::retry::RetryPolicy;
use core_config::{env_parse, ConfigError, FromEnv};
use std::time::Duration;

/// Configuration for the job processor
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of worker loops started by `start`
    pub workers: usize,

    /// Capacity of the bounded in-memory queue
    pub queue_capacity: usize,

    /// Wall-clock bound on a single handler attempt
    pub job_timeout: Duration,

    /// Attempts allowed per job
    pub max_attempts: u32,

    /// Backoff for handlers that do not declare their own
    pub retry_policy: RetryPolicy,

    /// How often the loader re-offers due retries to the queue
    pub loader_interval: Duration,
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the handler timeout
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Set the attempt ceiling
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the default retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the loader tick
    pub fn with_loader_interval(mut self, interval: Duration) -> Self {
        self.loader_interval = interval;
        self
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1000,
            job_timeout: Duration::from_secs(5 * 60),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_policy: RetryPolicy::quadratic_seconds(),
            loader_interval: Duration::from_secs(1),
        }
    }
}

impl FromEnv for ProcessorConfig {
    /// Reads:
    /// - JOB_WORKERS (4)
    /// - JOB_QUEUE_CAPACITY (1000)
    /// - JOB_TIMEOUT_SECS (300)
    /// - JOB_MAX_ATTEMPTS (3)
    /// - JOB_LOADER_INTERVAL_MS (1000)
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::default()
            .with_workers(env_parse("JOB_WORKERS", "4")?)
            .with_queue_capacity(env_parse("JOB_QUEUE_CAPACITY", "1000")?)
            .with_job_timeout(Duration::from_secs(env_parse("JOB_TIMEOUT_SECS", "300")?))
            .with_max_attempts(env_parse("JOB_MAX_ATTEMPTS", "3")?)
            .with_loader_interval(Duration::from_millis(env_parse(
                "JOB_LOADER_INTERVAL_MS",
                "1000",
            )?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_policy, RetryPolicy::quadratic_seconds());
    }

    #[test]
    fn test_builder_clamps_zero_values() {
        let config = ProcessorConfig::new()
            .with_workers(0)
            .with_queue_capacity(0)
            .with_max_attempts(0);
        assert_eq!(config.workers, 1);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars(
            [
                ("JOB_WORKERS", None::<&str>),
                ("JOB_QUEUE_CAPACITY", None),
                ("JOB_TIMEOUT_SECS", None),
                ("JOB_MAX_ATTEMPTS", None),
                ("JOB_LOADER_INTERVAL_MS", None),
            ],
            || {
                let config = ProcessorConfig::from_env().unwrap();
                assert_eq!(config.workers, 4);
                assert_eq!(config.loader_interval, Duration::from_secs(1));
            },
        );
    }

    #[test]
    fn test_from_env_overrides() {
        temp_env::with_vars(
            [("JOB_WORKERS", Some("8")), ("JOB_TIMEOUT_SECS", Some("30"))],
            || {
                let config = ProcessorConfig::from_env().unwrap();
                assert_eq!(config.workers, 8);
                assert_eq!(config.job_timeout, Duration::from_secs(30));
            },
        );
    }

    #[test]
    fn test_from_env_invalid_number() {
        temp_env::with_var("JOB_QUEUE_CAPACITY", Some("lots"), || {
            let err = ProcessorConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("JOB_QUEUE_CAPACITY"));
        });
    }
}

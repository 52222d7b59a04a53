//! Queue worker configuration

use crate::models::DEFAULT_MAX_ATTEMPTS;
use core_config::{env_parse, ConfigError, FromEnv};
use job_worker::RetryPolicy;
use std::time::Duration;

/// Configuration for the email queue poller
#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    /// Tick between polls
    pub poll_interval: Duration,

    /// Items claimed per poll
    pub batch_size: u64,

    /// Delay before a failed item becomes due again
    pub retry_policy: RetryPolicy,

    /// Attempt ceiling for items added through `EmailQueueWorker::enqueue`
    /// that still carry the built-in default
    pub max_attempts: u32,

    /// How long an item may sit in processing before it is handed back to the poller
    pub processing_timeout: Duration,
}

impl QueueWorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            retry_policy: RetryPolicy::linear_minutes(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            processing_timeout: Duration::from_secs(600),
        }
    }
}

impl FromEnv for QueueWorkerConfig {
    /// Reads:
    /// - EMAIL_POLL_INTERVAL_SECS (5)
    /// - EMAIL_BATCH_SIZE (10)
    /// - EMAIL_RETRY_STEP_SECS (60)
    /// - EMAIL_MAX_ATTEMPTS (3)
    /// - EMAIL_PROCESSING_TIMEOUT_SECS (600)
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::default()
            .with_poll_interval(Duration::from_secs(env_parse("EMAIL_POLL_INTERVAL_SECS", "5")?))
            .with_batch_size(env_parse("EMAIL_BATCH_SIZE", "10")?)
            .with_retry_policy(RetryPolicy::Linear {
                step: Duration::from_secs(env_parse("EMAIL_RETRY_STEP_SECS", "60")?),
            })
            .with_max_attempts(env_parse("EMAIL_MAX_ATTEMPTS", "3")?)
            .with_processing_timeout(Duration::from_secs(env_parse(
                "EMAIL_PROCESSING_TIMEOUT_SECS",
                "600",
            )?)))
    }
}

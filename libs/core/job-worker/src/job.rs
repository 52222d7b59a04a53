//! Job model and lifecycle transitions.
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!    ▲             │
//!    └── retry ────┤ (attempts < max_attempts, visible_at = now + backoff)
//!                  ▼
//!                failed
//! ```

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Default ceiling on attempts per job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job type tag used to look up a handler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Job priority; higher is more urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPriority(pub i32);

impl JobPriority {
    pub const LOW: JobPriority = JobPriority(1);
    pub const NORMAL: JobPriority = JobPriority(5);
    pub const HIGH: JobPriority = JobPriority(8);
    pub const CRITICAL: JobPriority = JobPriority(10);
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Handler-specific payload
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// When a waiting retry becomes eligible for dequeue. `None` while the job sits in the in-memory queue.
    pub visible_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        job_type: impl Into<JobType>,
        payload: serde_json::Value,
        priority: JobPriority,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type: job_type.into(),
            priority,
            status: JobStatus::Pending,
            payload,
            result: None,
            error: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            visible_at: None,
        }
    }

    /// Decode the payload into a handler-specific type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Worker took the job: count the attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.attempts = (self.attempts + 1).min(self.max_attempts);
        self.started_at = Some(now);
        self.visible_at = None;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.error = None;
        self.visible_at = None;
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.visible_at = None;
    }

    /// Park the job until `visible_at`, keeping the last error for inspection.
    pub fn schedule_retry(&mut self, error: impl Into<String>, visible_at: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.error = Some(error.into());
        self.visible_at = Some(visible_at);
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

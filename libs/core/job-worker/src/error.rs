//! Job error types and error categorization
//!
//! Errors are categorized to determine retry behavior:
//! - **Transient**: temporary failure, the job is retried per its retry policy
//! - **Permanent**: validation, auth or missing-handler failures, the job fails immediately

use crate::job::JobType;
use std::time::Duration;
use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure - retry after the policy's backoff delay
    Transient,
    /// Unrecoverable error - mark the job failed without retrying
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

/// Job processing errors
#[derive(Error, Debug)]
pub enum JobError {
    /// Handler returned an error
    #[error("{message}")]
    Handler {
        message: String,
        category: ErrorCategory,
    },

    /// No handler registered for the job type
    #[error("no handler for job type {0}")]
    NoHandler(JobType),

    /// Handler exceeded its execution deadline
    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    /// Handler panicked
    #[error("job handler panicked: {0}")]
    Panicked(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// `start` called on a processor that is already running
    #[error("job processor already started")]
    AlreadyStarted,

    /// Processor queue has been closed
    #[error("Shutdown requested")]
    Shutdown,
}

impl JobError {
    /// Create a transient handler error
    pub fn transient(message: impl Into<String>) -> Self {
        JobError::Handler {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    /// Create a permanent handler error
    pub fn permanent(message: impl Into<String>) -> Self {
        JobError::Handler {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            JobError::Handler { category, .. } => *category,
            JobError::NoHandler(_) | JobError::Serialization(_) | JobError::Config(_) => {
                ErrorCategory::Permanent
            }
            JobError::Timeout(_)
            | JobError::Panicked(_)
            | JobError::Store(_)
            | JobError::AlreadyStarted
            | JobError::Shutdown => ErrorCategory::Transient,
        }
    }

    /// Whether the failed attempt may be retried
    pub fn should_retry(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_categories() {
        assert_eq!(
            JobError::transient("connection reset").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            JobError::permanent("missing recipient").category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_no_handler_is_not_retried() {
        let err = JobError::NoHandler(JobType::new("embedding"));
        assert!(!err.should_retry());
        assert_eq!(err.to_string(), "no handler for job type embedding");
    }

    #[test]
    fn test_timeout_and_panic_are_retried() {
        assert!(JobError::Timeout(Duration::from_secs(300)).should_retry());
        assert!(JobError::Panicked("boom".into()).should_retry());
    }

    #[test]
    fn test_handler_message_is_displayed_verbatim() {
        let err = JobError::transient("smtp 451");
        assert_eq!(err.to_string(), "smtp 451");
    }
}

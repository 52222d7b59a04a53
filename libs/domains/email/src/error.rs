//! Error types for the email domain.

use crate::models::ProviderKind;
use thiserror::Error;

/// Result type for email operations.
pub type EmailResult<T> = Result<T, EmailError>;

/// Errors that can occur in the email domain.
#[derive(Debug, Error)]
pub enum EmailError {
    /// Network failure, rate limit or 5xx from a provider. Retried by the caller's policy.
    #[error("{0}")]
    Transient(String),

    /// Provider credentials were revoked or expired. Never retried; the
    /// connection is flagged for reconnect with `reason`.
    #[error("{provider} authorization expired: {reason}")]
    AuthExpired {
        provider: ProviderKind,
        reason: String,
    },

    /// Malformed message or rejected payload. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tenant has no credentials for the provider.
    #[error("{0} is not configured for this tenant")]
    ProviderNotConfigured(ProviderKind),

    /// Referenced row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmailError {
    /// Whether a failed send may be attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmailError::Transient(_) | EmailError::Database(_) | EmailError::Internal(_)
        )
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, EmailError::AuthExpired { .. })
    }
}

impl From<reqwest::Error> for EmailError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmailError::Transient(format!("HTTP request timed out: {}", err))
        } else {
            EmailError::Transient(format!("HTTP request failed: {}", err))
        }
    }
}

impl From<sea_orm::DbErr> for EmailError {
    fn from(err: sea_orm::DbErr) -> Self {
        EmailError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for EmailError {
    fn from(err: serde_json::Error) -> Self {
        EmailError::Serialization(err.to_string())
    }
}

impl From<EmailError> for job_worker::JobError {
    fn from(err: EmailError) -> Self {
        if err.is_retryable() {
            job_worker::JobError::transient(err.to_string())
        } else {
            job_worker::JobError::permanent(err.to_string())
        }
    }
}

//! Email provider adapters

mod gmail;
mod resend;

pub use gmail::{GmailConfig, GmailProvider, GMAIL_RECONNECT_REASON, GMAIL_REFRESH_FAILED_REASON};
pub use resend::{ResendConfig, ResendProvider};

use crate::error::{EmailError, EmailResult};
use crate::models::{OutboundEmail, ProviderKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Trait for email providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Transmit the message, returning the provider-assigned message id.
    async fn send(&self, email: &OutboundEmail) -> EmailResult<String>;

    /// Which provider this adapter talks to
    fn kind(&self) -> ProviderKind;
}

/// Supplies per-tenant secrets: a Resend API key or a Gmail OAuth access token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential(&self, tenant_id: Uuid, provider: ProviderKind) -> EmailResult<Option<String>>;
}

/// One credential per provider for every tenant.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: HashMap<ProviderKind, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: ProviderKind, secret: impl Into<String>) -> Self {
        self.credentials.insert(provider, secret.into());
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credential(&self, _tenant_id: Uuid, provider: ProviderKind) -> EmailResult<Option<String>> {
        Ok(self.credentials.get(&provider).cloned())
    }
}

/// Adapters by provider kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<ProviderKind, Arc<dyn EmailProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn EmailProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> EmailResult<&Arc<dyn EmailProvider>> {
        self.providers
            .get(&kind)
            .ok_or(EmailError::ProviderNotConfigured(kind))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }
}

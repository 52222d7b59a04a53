//! Email Router
//!
//! Picks a provider for each message from the tenant's live health records and
//! hands the message to that provider's adapter.
//!
//! | message class                     | 1st    | 2nd    |
//! |-----------------------------------|--------|--------|
//! | reminder / system / notification  | Resend | Gmail  |
//! | communication / applicant         | Gmail  | Resend |
//! | anything else                     | preferred | the other |
//!
//! When neither choice is healthy the caller's preferred provider is used
//! anyway. Adapter errors never escape [`EmailRouter::send`]; they come back as
//! a failed [`SendResult`].

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::EmailError;
use crate::health::HealthTracker;
use crate::metrics::EmailMetrics;
use crate::models::{MessageClass, OutboundEmail, ProviderKind, SendResult};
use crate::providers::ProviderSet;
use crate::repository::ConnectionRepository;

pub struct EmailRouter {
    health: Arc<HealthTracker>,
    providers: ProviderSet,
    connections: Arc<dyn ConnectionRepository>,
    metrics: EmailMetrics,
}

/// Provider precedence for a message class, before health is consulted.
pub fn provider_precedence(class: MessageClass, preferred: ProviderKind) -> [ProviderKind; 2] {
    match class {
        MessageClass::Reminder | MessageClass::System | MessageClass::Notification => {
            [ProviderKind::Resend, ProviderKind::Gmail]
        }
        MessageClass::Communication | MessageClass::Applicant => {
            [ProviderKind::Gmail, ProviderKind::Resend]
        }
        MessageClass::Other => [preferred, preferred.other()],
    }
}

impl EmailRouter {
    pub fn new(
        health: Arc<HealthTracker>,
        providers: ProviderSet,
        connections: Arc<dyn ConnectionRepository>,
    ) -> Self {
        Self {
            health,
            providers,
            connections,
            metrics: EmailMetrics,
        }
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// First healthy provider in precedence order, else `preferred`.
    pub async fn determine_provider(
        &self,
        tenant_id: Uuid,
        preferred: ProviderKind,
        class: MessageClass,
    ) -> ProviderKind {
        for candidate in provider_precedence(class, preferred) {
            match self.health.is_healthy(tenant_id, candidate).await {
                Ok(true) => return candidate,
                Ok(false) => {}
                Err(e) => {
                    warn!(%tenant_id, provider = %candidate, error = %e, "Health lookup failed, treating provider as unhealthy");
                }
            }
        }
        preferred
    }

    #[instrument(
        skip(self, email),
        fields(tenant_id = %email.tenant_id, class = %email.message_class, provider = tracing::field::Empty)
    )]
    pub async fn send(&self, email: &OutboundEmail) -> SendResult {
        let provider = self
            .determine_provider(email.tenant_id, email.preferred_provider, email.message_class)
            .await;
        tracing::Span::current().record("provider", tracing::field::display(provider));
        if provider != email.preferred_provider {
            self.metrics.provider_rerouted(email.preferred_provider, provider);
        }

        let outcome = match self.providers.get(provider) {
            Ok(adapter) => adapter.send(email).await,
            Err(e) => Err(e),
        };
        self.metrics.send_attempted(provider, outcome.is_ok());

        match outcome {
            Ok(message_id) => {
                if let Err(e) = self.health.record_success(email.tenant_id, provider).await {
                    warn!(error = %e, "Failed to record provider success");
                }
                info!(message_id = %message_id, to = %email.to.email, "Email sent");
                SendResult::sent(provider, message_id)
            }
            Err(err) => {
                let message = err.to_string();
                // Missing credentials say nothing about the provider itself.
                if !matches!(err, EmailError::ProviderNotConfigured(_)) {
                    if let Err(e) = self
                        .health
                        .record_failure(email.tenant_id, provider, &message)
                        .await
                    {
                        warn!(error = %e, "Failed to record provider failure");
                    }
                }
                if let EmailError::AuthExpired { reason, .. } = &err {
                    self.flag_reconnect(email.tenant_id, provider, reason).await;
                }
                warn!(error = %message, retryable = err.is_retryable(), "Email send failed");
                SendResult::failed(provider, message, err.is_retryable())
            }
        }
    }

    async fn flag_reconnect(&self, tenant_id: Uuid, provider: ProviderKind, reason: &str) {
        match self
            .connections
            .mark_needs_reconnect(tenant_id, provider, reason)
            .await
        {
            Ok(()) => {
                self.metrics.reconnect_flagged(provider);
                warn!(%tenant_id, %provider, reason, "Connection flagged for reconnect");
            }
            Err(e) => warn!(%tenant_id, %provider, error = %e, "Failed to flag connection for reconnect"),
        }
    }
}

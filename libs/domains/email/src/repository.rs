use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EmailResult;
use crate::models::{Campaign, EmailQueueItem, ProviderKind, SentEmailRecord, ServiceHealth};

/// Persisted email queue, campaigns and the sent-message audit trail.
///
/// `claim_due` is the only method that must be atomic across processes: an
/// item it returns is owned by the caller until saved with a non-processing
/// status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailQueueRepository: Send + Sync {
    /// Claim up to `limit` items in {pending, retrying} with `scheduled_for <= now`,
    /// ordered by priority descending then `scheduled_for` ascending. Claimed
    /// items come back already marked processing.
    async fn claim_due(&self, now: DateTime<Utc>, limit: u64) -> EmailResult<Vec<EmailQueueItem>>;

    /// Hand items left in processing since before `claimed_before` back to the
    /// poller as retrying, due at `now`. Returns how many were recovered.
    async fn recover_stale(&self, claimed_before: DateTime<Utc>, now: DateTime<Utc>) -> EmailResult<u64>;

    async fn insert(&self, item: &EmailQueueItem) -> EmailResult<()>;

    /// Overwrite the mutable columns of an existing item
    async fn save(&self, item: &EmailQueueItem) -> EmailResult<()>;

    async fn get_item(&self, id: Uuid) -> EmailResult<Option<EmailQueueItem>>;

    /// Pending items of a campaign in creation order
    async fn pending_for_campaign(&self, campaign_id: Uuid) -> EmailResult<Vec<EmailQueueItem>>;

    /// Items of a campaign still in {pending, processing, retrying}
    async fn count_unfinished(&self, campaign_id: Uuid) -> EmailResult<u64>;

    async fn get_campaign(&self, id: Uuid) -> EmailResult<Option<Campaign>>;

    async fn insert_campaign(&self, campaign: &Campaign) -> EmailResult<()>;

    async fn save_campaign(&self, campaign: &Campaign) -> EmailResult<()>;

    /// Append an audit row for a delivered item
    async fn record_sent(&self, record: &SentEmailRecord) -> EmailResult<()>;
}

/// Storage for per-(tenant, provider) health records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthRepository: Send + Sync {
    async fn get(&self, tenant_id: Uuid, provider: ProviderKind) -> EmailResult<Option<ServiceHealth>>;

    /// Insert or replace the record keyed by (tenant, provider)
    async fn upsert(&self, health: &ServiceHealth) -> EmailResult<()>;

    async fn list_for_tenant(&self, tenant_id: Uuid) -> EmailResult<Vec<ServiceHealth>>;
}

/// Provider connection state owned by the OAuth/integration layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Flag the tenant's connection so an admin is asked to re-authorize
    async fn mark_needs_reconnect(
        &self,
        tenant_id: Uuid,
        provider: ProviderKind,
        reason: &str,
    ) -> EmailResult<()>;
}

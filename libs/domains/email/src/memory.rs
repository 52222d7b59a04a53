//! In-process store implementing every email repository.
//!
//! Used by tests and local runs without a database. A single write lock makes
//! `claim_due` atomic within the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EmailError, EmailResult};
use crate::models::{Campaign, EmailQueueItem, ProviderKind, QueueStatus, SentEmailRecord, ServiceHealth};
use crate::repository::{ConnectionRepository, EmailQueueRepository, HealthRepository};

#[derive(Default)]
pub struct InMemoryEmailStore {
    items: RwLock<HashMap<Uuid, EmailQueueItem>>,
    campaigns: RwLock<HashMap<Uuid, Campaign>>,
    sent: RwLock<Vec<SentEmailRecord>>,
    health: RwLock<HashMap<(Uuid, ProviderKind), ServiceHealth>>,
    reconnect: RwLock<HashMap<(Uuid, ProviderKind), String>>,
}

impl InMemoryEmailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn items(&self) -> Vec<EmailQueueItem> {
        let mut items: Vec<_> = self.items.read().await.values().cloned().collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        items
    }

    pub async fn sent_records(&self) -> Vec<SentEmailRecord> {
        self.sent.read().await.clone()
    }

    /// Reason recorded by the last `mark_needs_reconnect`, if any
    pub async fn reconnect_reason(&self, tenant_id: Uuid, provider: ProviderKind) -> Option<String> {
        self.reconnect.read().await.get(&(tenant_id, provider)).cloned()
    }
}

#[async_trait]
impl EmailQueueRepository for InMemoryEmailStore {
    async fn claim_due(&self, now: DateTime<Utc>, limit: u64) -> EmailResult<Vec<EmailQueueItem>> {
        let mut items = self.items.write().await;

        let mut due: Vec<&mut EmailQueueItem> = items
            .values_mut()
            .filter(|i| i.status.is_claimable() && i.scheduled_for <= now)
            .collect();
        due.sort_by_key(|i| (Reverse(i.priority), i.scheduled_for, i.id));

        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(due
            .into_iter()
            .take(limit)
            .map(|item| {
                item.status = QueueStatus::Processing;
                item.updated_at = now;
                item.clone()
            })
            .collect())
    }

    async fn recover_stale(&self, claimed_before: DateTime<Utc>, now: DateTime<Utc>) -> EmailResult<u64> {
        let mut recovered = 0;
        for item in self.items.write().await.values_mut() {
            if item.status == QueueStatus::Processing && item.updated_at < claimed_before {
                item.status = QueueStatus::Retrying;
                item.scheduled_for = now;
                item.updated_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn insert(&self, item: &EmailQueueItem) -> EmailResult<()> {
        self.items.write().await.insert(item.id, item.clone());
        Ok(())
    }

    async fn save(&self, item: &EmailQueueItem) -> EmailResult<()> {
        match self.items.write().await.get_mut(&item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(EmailError::NotFound(format!("Queue item {}", item.id))),
        }
    }

    async fn get_item(&self, id: Uuid) -> EmailResult<Option<EmailQueueItem>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn pending_for_campaign(&self, campaign_id: Uuid) -> EmailResult<Vec<EmailQueueItem>> {
        let mut pending: Vec<_> = self
            .items
            .read()
            .await
            .values()
            .filter(|i| i.campaign_id == Some(campaign_id) && i.status == QueueStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|i| (i.created_at, i.id));
        Ok(pending)
    }

    async fn count_unfinished(&self, campaign_id: Uuid) -> EmailResult<u64> {
        let count = self
            .items
            .read()
            .await
            .values()
            .filter(|i| i.campaign_id == Some(campaign_id) && i.status.is_unfinished())
            .count();
        Ok(count as u64)
    }

    async fn get_campaign(&self, id: Uuid) -> EmailResult<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(&id).cloned())
    }

    async fn insert_campaign(&self, campaign: &Campaign) -> EmailResult<()> {
        self.campaigns.write().await.insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn save_campaign(&self, campaign: &Campaign) -> EmailResult<()> {
        match self.campaigns.write().await.get_mut(&campaign.id) {
            Some(existing) => {
                *existing = campaign.clone();
                Ok(())
            }
            None => Err(EmailError::NotFound(format!("Campaign {}", campaign.id))),
        }
    }

    async fn record_sent(&self, record: &SentEmailRecord) -> EmailResult<()> {
        self.sent.write().await.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl HealthRepository for InMemoryEmailStore {
    async fn get(&self, tenant_id: Uuid, provider: ProviderKind) -> EmailResult<Option<ServiceHealth>> {
        Ok(self.health.read().await.get(&(tenant_id, provider)).cloned())
    }

    async fn upsert(&self, health: &ServiceHealth) -> EmailResult<()> {
        self.health
            .write()
            .await
            .insert((health.tenant_id, health.provider), health.clone());
        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> EmailResult<Vec<ServiceHealth>> {
        let mut records: Vec<_> = self
            .health
            .read()
            .await
            .values()
            .filter(|h| h.tenant_id == tenant_id)
            .cloned()
            .collect();
        records.sort_by_key(|h| h.provider.as_ref().to_string());
        Ok(records)
    }
}

#[async_trait]
impl ConnectionRepository for InMemoryEmailStore {
    async fn mark_needs_reconnect(
        &self,
        tenant_id: Uuid,
        provider: ProviderKind,
        reason: &str,
    ) -> EmailResult<()> {
        self.reconnect
            .write()
            .await
            .insert((tenant_id, provider), reason.to_string());
        Ok(())
    }
}

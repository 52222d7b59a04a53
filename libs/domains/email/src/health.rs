//! Service Health Tracker
//!
//! One [`ServiceHealth`] record per (tenant, provider). The router reads it
//! before every send and writes it after every attempt. Staleness is derived
//! at read time, so a record older than the window reads as `Unknown` without
//! any write.
//!
//! Writes for the same key are serialized through a per-key async mutex, which
//! turns the read-modify-write into a single-writer sequence inside this
//! process. Separate processes still rely on the repository's upsert.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::EmailResult;
use crate::models::{HealthStatus, ProviderKind, ServiceHealth, HEALTH_STALE_AFTER};
use crate::repository::HealthRepository;

type HealthKey = (Uuid, ProviderKind);

pub struct HealthTracker {
    repository: Arc<dyn HealthRepository>,
    locks: Mutex<HashMap<HealthKey, Arc<Mutex<()>>>>,
    stale_after: Duration,
}

impl HealthTracker {
    pub fn new(repository: Arc<dyn HealthRepository>) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
            stale_after: HEALTH_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    async fn key_lock(&self, key: HealthKey) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(key).or_default().clone()
    }

    /// Current record with staleness applied, creating an `Unknown` record on
    /// first sight of the pair.
    pub async fn check(&self, tenant_id: Uuid, provider: ProviderKind) -> EmailResult<ServiceHealth> {
        let now = Utc::now();
        let mut health = match self.repository.get(tenant_id, provider).await? {
            Some(health) => health,
            None => {
                let lock = self.key_lock((tenant_id, provider)).await;
                let _guard = lock.lock().await;
                match self.repository.get(tenant_id, provider).await? {
                    Some(health) => health,
                    None => {
                        let health = ServiceHealth::unknown(tenant_id, provider, now);
                        self.repository.upsert(&health).await?;
                        debug!(%tenant_id, %provider, "Created health record");
                        health
                    }
                }
            }
        };

        health.status = health.effective_status(now, self.stale_after);
        Ok(health)
    }

    pub async fn is_healthy(&self, tenant_id: Uuid, provider: ProviderKind) -> EmailResult<bool> {
        Ok(self.check(tenant_id, provider).await?.status == HealthStatus::Healthy)
    }

    pub async fn record_success(&self, tenant_id: Uuid, provider: ProviderKind) -> EmailResult<ServiceHealth> {
        self.update(tenant_id, provider, |health, now| health.record_success(now))
            .await
    }

    pub async fn record_failure(
        &self,
        tenant_id: Uuid,
        provider: ProviderKind,
        error: &str,
    ) -> EmailResult<ServiceHealth> {
        let health = self
            .update(tenant_id, provider, |health, now| health.record_failure(error, now))
            .await?;
        warn!(
            %tenant_id,
            %provider,
            failure_count = health.failure_count,
            error,
            "Provider marked down"
        );
        Ok(health)
    }

    async fn update<F>(&self, tenant_id: Uuid, provider: ProviderKind, apply: F) -> EmailResult<ServiceHealth>
    where
        F: FnOnce(&mut ServiceHealth, chrono::DateTime<Utc>),
    {
        let lock = self.key_lock((tenant_id, provider)).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut health = self
            .repository
            .get(tenant_id, provider)
            .await?
            .unwrap_or_else(|| ServiceHealth::unknown(tenant_id, provider, now));
        apply(&mut health, now);
        self.repository.upsert(&health).await?;
        Ok(health)
    }

    /// Every provider's health for a tenant, staleness applied. Providers never
    /// checked show as `Unknown`.
    pub async fn dashboard(&self, tenant_id: Uuid) -> EmailResult<Vec<ServiceHealth>> {
        let now = Utc::now();
        let mut records = self.repository.list_for_tenant(tenant_id).await?;

        for provider in ProviderKind::ALL {
            if !records.iter().any(|h| h.provider == provider) {
                records.push(ServiceHealth::unknown(tenant_id, provider, now));
            }
        }
        for health in &mut records {
            health.status = health.effective_status(now, self.stale_after);
        }
        records.sort_by_key(|h| h.provider.as_ref().to_string());
        Ok(records)
    }
}

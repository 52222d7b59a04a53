//! Email Queue Worker
//!
//! A single periodic poller over the persisted queue. Each tick claims a batch
//! of due items and sends them one after another through the [`EmailRouter`].
//!
//! ```text
//! pending ──▶ processing ──┬─ ok                          ─▶ sent   (+ audit row)
//!    ▲                     ├─ failed, attempts < max      ─▶ retrying, scheduled_for = now + attempts × step
//!    │                     └─ failed, attempts = max
//!    │                        or not retryable            ─▶ failed
//! retrying ── scheduled_for elapsed ──▶ processing
//! ```
//!
//! After every item that belongs to a campaign the campaign is marked sent once
//! none of its items remain in {pending, processing, retrying}.
//!
//! Items left in processing longer than `processing_timeout` (a crashed poller,
//! a failed save) go back to retrying before each poll.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::QueueWorkerConfig;
use crate::error::{EmailError, EmailResult};
use crate::metrics::EmailMetrics;
use crate::models::{CampaignStatus, EmailQueueItem, QueueStatus, SentEmailRecord, DEFAULT_MAX_ATTEMPTS};
use crate::repository::EmailQueueRepository;
use crate::router::EmailRouter;

/// Counts from one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub claimed: usize,
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
    pub campaigns_completed: usize,
}

pub struct EmailQueueWorker {
    repository: Arc<dyn EmailQueueRepository>,
    router: Arc<EmailRouter>,
    config: QueueWorkerConfig,
    metrics: EmailMetrics,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn before(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl EmailQueueWorker {
    pub fn new(
        repository: Arc<dyn EmailQueueRepository>,
        router: Arc<EmailRouter>,
        config: QueueWorkerConfig,
    ) -> Self {
        Self {
            repository,
            router,
            config,
            metrics: EmailMetrics,
        }
    }

    pub fn config(&self) -> &QueueWorkerConfig {
        &self.config
    }

    /// Insert a new item for the poller to pick up. An item still carrying the
    /// built-in attempt ceiling gets the configured one instead.
    pub async fn enqueue(&self, item: &EmailQueueItem) -> EmailResult<Uuid> {
        let mut item = item.clone();
        if item.max_attempts == DEFAULT_MAX_ATTEMPTS {
            item.max_attempts = self.config.max_attempts;
        }
        self.repository.insert(&item).await?;
        debug!(item_id = %item.id, scheduled_for = %item.scheduled_for, "Queued email");
        Ok(item.id)
    }

    /// Poll every `poll_interval` until the shutdown flag flips. An in-flight
    /// batch finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "Email queue worker started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.recover_stale(now).await {
                        error!(error = %e, "Failed to recover stale queue items");
                    }
                    if let Err(e) = self.poll_once(now).await {
                        error!(error = %e, "Email queue poll failed");
                    }
                }
            }
        }

        info!("Email queue worker stopped");
    }

    /// Return items claimed more than `processing_timeout` before `now` to the
    /// poller, due immediately.
    pub async fn recover_stale(&self, now: DateTime<Utc>) -> EmailResult<u64> {
        let claimed_before = before(now, self.config.processing_timeout);
        let recovered = self.repository.recover_stale(claimed_before, now).await?;
        if recovered > 0 {
            warn!(recovered, claimed_before = %claimed_before, "Returned stale processing items to the queue");
        }
        Ok(recovered)
    }

    /// Claim and process one batch of items due at `now`.
    ///
    /// Items are sent one after another; each one's timestamps are `now` plus
    /// the time the batch has taken so far.
    #[instrument(skip(self), fields(claimed = tracing::field::Empty))]
    pub async fn poll_once(&self, now: DateTime<Utc>) -> EmailResult<PollSummary> {
        let items = self.repository.claim_due(now, self.config.batch_size).await?;
        tracing::Span::current().record("claimed", items.len());

        let mut summary = PollSummary {
            claimed: items.len(),
            ..PollSummary::default()
        };

        let started = Instant::now();
        for item in items {
            let item_id = item.id;
            let campaign_id = item.campaign_id;

            match self.process_item(item, after(now, started.elapsed())).await {
                Ok(QueueStatus::Sent) => summary.sent += 1,
                Ok(QueueStatus::Retrying) => summary.retrying += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    error!(%item_id, error = %e, "Failed to process queue item");
                    continue;
                }
            }

            if let Some(campaign_id) = campaign_id {
                match self
                    .complete_campaign_if_done(campaign_id, after(now, started.elapsed()))
                    .await
                {
                    Ok(true) => summary.campaigns_completed += 1,
                    Ok(false) => {}
                    Err(e) => error!(%campaign_id, error = %e, "Failed to check campaign completion"),
                }
            }
        }

        if summary.claimed > 0 {
            info!(
                sent = summary.sent,
                retrying = summary.retrying,
                failed = summary.failed,
                "Processed email batch"
            );
        }
        Ok(summary)
    }

    /// Send one claimed item and persist its new state. Returns the status it ended in.
    ///
    /// `started_at` is when the send begins; the sent time and any retry are
    /// measured from when the provider answered.
    pub async fn process_item(
        &self,
        mut item: EmailQueueItem,
        started_at: DateTime<Utc>,
    ) -> EmailResult<QueueStatus> {
        item.status = QueueStatus::Processing;
        let send_started = Instant::now();
        let result = self.router.send(&item.to_outbound()).await;
        let now = after(started_at, send_started.elapsed());
        item.updated_at = now;

        if result.success {
            item.status = QueueStatus::Sent;
            item.sent_at = Some(now);
            item.error_message = None;
            self.repository.save(&item).await?;

            let record = SentEmailRecord {
                id: Uuid::now_v7(),
                tenant_id: item.tenant_id,
                campaign_id: item.campaign_id,
                queue_item_id: item.id,
                recipient_email: item.recipient_email.clone(),
                subject: item.subject.clone(),
                provider: result.provider,
                provider_message_id: result.message_id.clone(),
                tracking_id: Uuid::new_v4(),
                sent_at: now,
            };
            // The message is out; a missing audit row must not cause a resend.
            if let Err(e) = self.repository.record_sent(&record).await {
                error!(item_id = %item.id, error = %e, "Failed to write sent email record");
            }
        } else {
            item.attempt_count = item.attempt_count.saturating_add(1);
            item.error_message = result.error.clone();

            if result.retryable && item.attempt_count < item.max_attempts {
                item.status = QueueStatus::Retrying;
                item.scheduled_for = after(now, self.config.retry_policy.delay_for(item.attempt_count));
                debug!(
                    item_id = %item.id,
                    attempt = item.attempt_count,
                    scheduled_for = %item.scheduled_for,
                    "Queue item scheduled for retry"
                );
            } else {
                item.status = QueueStatus::Failed;
                warn!(
                    item_id = %item.id,
                    attempts = item.attempt_count,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Queue item failed permanently"
                );
            }
            self.repository.save(&item).await?;
        }

        self.metrics.queue_item_finished(item.status.as_ref());
        Ok(item.status)
    }

    /// Mark the campaign sent when none of its items are still owed a send.
    pub async fn complete_campaign_if_done(&self, campaign_id: Uuid, now: DateTime<Utc>) -> EmailResult<bool> {
        if self.repository.count_unfinished(campaign_id).await? > 0 {
            return Ok(false);
        }

        let Some(mut campaign) = self.repository.get_campaign(campaign_id).await? else {
            warn!(%campaign_id, "Queue items reference a missing campaign");
            return Ok(false);
        };
        if campaign.status == CampaignStatus::Sent {
            return Ok(false);
        }

        campaign.status = CampaignStatus::Sent;
        campaign.sent_at = Some(now);
        campaign.updated_at = now;
        self.repository.save_campaign(&campaign).await?;
        self.metrics.campaign_completed();
        info!(%campaign_id, "Campaign sent");
        Ok(true)
    }

    /// Spread a campaign's pending items `stagger_secs` apart starting now.
    pub async fn schedule_campaign(&self, campaign_id: Uuid, stagger_secs: u32) -> EmailResult<usize> {
        self.schedule_campaign_at(campaign_id, stagger_secs, Utc::now())
            .await
    }

    /// Assign `scheduled_for = base_time + index × stagger_secs` in creation
    /// order and move the campaign to sending.
    #[instrument(skip(self))]
    pub async fn schedule_campaign_at(
        &self,
        campaign_id: Uuid,
        stagger_secs: u32,
        base_time: DateTime<Utc>,
    ) -> EmailResult<usize> {
        let mut campaign = self
            .repository
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| EmailError::NotFound(format!("Campaign {}", campaign_id)))?;

        let items = self.repository.pending_for_campaign(campaign_id).await?;
        let stagger = Duration::from_secs(u64::from(stagger_secs));

        for (index, mut item) in items.iter().cloned().enumerate() {
            let offset = stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
            item.scheduled_for = after(base_time, offset);
            item.updated_at = base_time;
            self.repository.save(&item).await?;
        }

        campaign.status = CampaignStatus::Sending;
        campaign.stagger_delay_secs = stagger_secs;
        campaign.updated_at = base_time;
        self.repository.save_campaign(&campaign).await?;

        info!(items = items.len(), stagger_secs, "Campaign scheduled");
        Ok(items.len())
    }
}

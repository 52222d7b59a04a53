//! Email work expressed as job types on the generic processor.
//!
//! `send_email` pushes one [`OutboundEmail`] through the router with the email
//! queue's linear backoff; `schedule_campaign` fans a campaign's due times out
//! in the background.

use async_trait::async_trait;
use job_worker::{Job, JobContext, JobError, JobHandler, JobProcessor, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::OutboundEmail;
use crate::queue_worker::EmailQueueWorker;
use crate::router::EmailRouter;

pub const SEND_EMAIL_JOB: &str = "send_email";
pub const SCHEDULE_CAMPAIGN_JOB: &str = "schedule_campaign";

/// Payload of a `schedule_campaign` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCampaign {
    pub campaign_id: Uuid,
    pub stagger_secs: u32,
}

pub struct SendEmailHandler {
    router: Arc<EmailRouter>,
    retry_policy: RetryPolicy,
}

impl SendEmailHandler {
    pub fn new(router: Arc<EmailRouter>) -> Self {
        Self {
            router,
            retry_policy: RetryPolicy::linear_minutes(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

#[async_trait]
impl JobHandler for SendEmailHandler {
    async fn handle(&self, ctx: JobContext, job: Job) -> Result<(), JobError> {
        let email: OutboundEmail = job.payload_as()?;
        let result = self.router.send(&email).await;

        if result.success {
            debug!(job_id = %job.id, attempt = ctx.attempt, message_id = %result.message_id, "send_email job delivered");
            return Ok(());
        }

        let message = result.error.unwrap_or_else(|| "send failed".to_string());
        if result.retryable {
            Err(JobError::transient(message))
        } else {
            Err(JobError::permanent(message))
        }
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(self.retry_policy)
    }
}

pub struct ScheduleCampaignHandler {
    worker: Arc<EmailQueueWorker>,
}

impl ScheduleCampaignHandler {
    pub fn new(worker: Arc<EmailQueueWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl JobHandler for ScheduleCampaignHandler {
    async fn handle(&self, _ctx: JobContext, job: Job) -> Result<(), JobError> {
        let request: ScheduleCampaign = job.payload_as()?;
        self.worker
            .schedule_campaign(request.campaign_id, request.stagger_secs)
            .await?;
        Ok(())
    }
}

/// Register both email job types on a processor that has not started yet.
pub fn register_email_jobs(
    processor: &mut JobProcessor,
    router: Arc<EmailRouter>,
    worker: Arc<EmailQueueWorker>,
) {
    let retry_policy = worker.config().retry_policy;
    processor
        .register_handler(
            SEND_EMAIL_JOB,
            SendEmailHandler::new(router).with_retry_policy(retry_policy),
        )
        .register_handler(SCHEDULE_CAMPAIGN_JOB, ScheduleCampaignHandler::new(worker));
}

//! Domain models for routing and queued delivery.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Default ceiling on send attempts per queue item
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Age after which a health record no longer says anything about the provider
pub const HEALTH_STALE_AFTER: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Outbound transmission service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ProviderKind {
    /// Personal mailbox API; sends as the tenant's own address
    Gmail,
    /// Bulk/transactional API
    Resend,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Gmail, ProviderKind::Resend];

    pub fn other(&self) -> ProviderKind {
        match self {
            ProviderKind::Gmail => ProviderKind::Resend,
            ProviderKind::Resend => ProviderKind::Gmail,
        }
    }
}

/// What kind of message is being sent; drives provider precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageClass {
    Reminder,
    System,
    Notification,
    #[default]
    Communication,
    Applicant,
    #[serde(other)]
    Other,
}

impl MessageClass {
    /// Parse a free-form label; anything unrecognised is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "reminder" => MessageClass::Reminder,
            "system" => MessageClass::System,
            "notification" => MessageClass::Notification,
            "communication" => MessageClass::Communication,
            "applicant" => MessageClass::Applicant,
            _ => MessageClass::Other,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    Unknown,
}

/// Health of one provider for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub tenant_id: Uuid,
    pub provider: ProviderKind,
    /// Status as last written; read through [`ServiceHealth::effective_status`]
    pub status: HealthStatus,
    pub last_checked_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    pub error_message: Option<String>,
}

impl ServiceHealth {
    pub fn unknown(tenant_id: Uuid, provider: ProviderKind, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            provider,
            status: HealthStatus::Unknown,
            last_checked_at: now,
            last_success_at: None,
            last_failure_at: None,
            failure_count: 0,
            error_message: None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: std::time::Duration) -> bool {
        let window = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.last_checked_at) > window
    }

    /// Stored status, or `Unknown` once the record has gone stale.
    pub fn effective_status(&self, now: DateTime<Utc>, stale_after: std::time::Duration) -> HealthStatus {
        if self.is_stale(now, stale_after) {
            HealthStatus::Unknown
        } else {
            self.status
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.status = HealthStatus::Healthy;
        self.failure_count = 0;
        self.error_message = None;
        self.last_success_at = Some(now);
        self.last_checked_at = now;
    }

    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = HealthStatus::Down;
        self.failure_count = self.failure_count.saturating_add(1);
        self.error_message = Some(error.into());
        self.last_failure_at = Some(now);
        self.last_checked_at = now;
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Retrying,
}

impl QueueStatus {
    /// Still owes a send attempt; blocks campaign completion.
    pub fn is_unfinished(&self) -> bool {
        matches!(
            self,
            QueueStatus::Pending | QueueStatus::Processing | QueueStatus::Retrying
        )
    }

    /// Eligible for the poller once `scheduled_for` has passed.
    pub fn is_claimable(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Retrying)
    }
}

/// A persisted message waiting for, or done with, delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailQueueItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub body: String,
    pub body_html: Option<String>,
    pub provider: ProviderKind,
    pub message_class: MessageClass,
    pub priority: i32,
    pub status: QueueStatus,
    pub scheduled_for: DateTime<Utc>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailQueueItem {
    /// A pending item due now, preferring Gmail as a personal communication.
    pub fn new(
        tenant_id: Uuid,
        recipient_email: impl Into<String>,
        sender_email: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            campaign_id: None,
            recipient_email: recipient_email.into(),
            recipient_name: None,
            sender_email: sender_email.into(),
            sender_name: None,
            subject: subject.into(),
            body: body.into(),
            body_html: None,
            provider: ProviderKind::Gmail,
            message_class: MessageClass::Communication,
            priority: 0,
            status: QueueStatus::Pending,
            scheduled_for: now,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            error_message: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_campaign(mut self, campaign_id: Uuid) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn with_names(mut self, recipient: Option<String>, sender: Option<String>) -> Self {
        self.recipient_name = recipient;
        self.sender_name = sender;
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = Some(html.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_message_class(mut self, class: MessageClass) -> Self {
        self.message_class = class;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = at;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    pub fn to_outbound(&self) -> OutboundEmail {
        OutboundEmail {
            tenant_id: self.tenant_id,
            from: Mailbox::new(self.sender_email.clone(), self.sender_name.clone()),
            to: Mailbox::new(self.recipient_email.clone(), self.recipient_name.clone()),
            subject: self.subject.clone(),
            text_body: self.body.clone(),
            html_body: self.body_html.clone(),
            reply_to: None,
            threading: ThreadingHints::default(),
            preferred_provider: self.provider,
            message_class: self.message_class,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Sent,
    Failed,
}

/// A group of queue items sent together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub stagger_delay_secs: u32,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn draft(tenant_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            name: name.into(),
            status: CampaignStatus::Draft,
            stagger_delay_secs: 0,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Audit row written for every delivered queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentEmailRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub queue_item_id: Uuid,
    pub recipient_email: String,
    pub subject: String,
    pub provider: ProviderKind,
    pub provider_message_id: String,
    /// Opaque id embedded in open/click tracking links
    pub tracking_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

/// Address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub email: String,
    pub name: Option<String>,
}

impl Mailbox {
    pub fn new(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            email: email.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => f.write_str(&self.email),
        }
    }
}

/// Headers that keep a reply inside an existing conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadingHints {
    /// Provider-side thread id (Gmail `threadId`)
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

/// Message handed to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub tenant_id: Uuid,
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub threading: ThreadingHints,
    pub preferred_provider: ProviderKind,
    #[serde(default)]
    pub message_class: MessageClass,
}

/// Outcome of `EmailRouter::send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    pub provider: ProviderKind,
    /// Provider-assigned id, empty on failure
    pub message_id: String,
    pub error: Option<String>,
    /// Whether a later attempt could succeed (false for auth and validation failures)
    pub retryable: bool,
}

impl SendResult {
    pub fn sent(provider: ProviderKind, message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider,
            message_id: message_id.into(),
            error: None,
            retryable: false,
        }
    }

    pub fn failed(provider: ProviderKind, error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            provider,
            message_id: String::new(),
            error: Some(error.into()),
            retryable,
        }
    }
}

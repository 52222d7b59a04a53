//! Email Domain
//!
//! Health-aware delivery across two providers, a persisted send queue, and
//! campaign staggering.
//!
//! ```text
//! producer ──▶ email_queue ──▶ EmailQueueWorker (tick) ──▶ EmailRouter ──▶ Gmail / Resend
//!                                    │                          │
//!                                    │                          └─▶ HealthTracker (per tenant, provider)
//!                                    └─▶ campaign completion, sent_emails audit
//!
//! JobProcessor ── send_email / schedule_campaign ──▶ EmailRouter / EmailQueueWorker
//! ```
//!
//! ## Components
//!
//! - **HealthTracker**: freshness-aware status per (tenant, provider)
//! - **EmailRouter**: provider precedence by message class, health fallback,
//!   reconnect flagging on revoked credentials
//! - **EmailQueueWorker**: claims due items, linear retry backoff, campaign
//!   completion and staggering
//! - **Providers**: Gmail API and Resend HTTP adapters
//! - **Stores**: `InMemoryEmailStore` and `PgEmailStore`

pub mod config;
pub mod error;
pub mod health;
pub mod jobs;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod postgres;
pub mod providers;
pub mod queue_worker;
pub mod repository;
pub mod router;

pub use config::QueueWorkerConfig;
pub use error::{EmailError, EmailResult};
pub use health::HealthTracker;
pub use jobs::{
    register_email_jobs, ScheduleCampaign, ScheduleCampaignHandler, SendEmailHandler, SCHEDULE_CAMPAIGN_JOB,
    SEND_EMAIL_JOB,
};
pub use memory::InMemoryEmailStore;
pub use models::*;
pub use postgres::PgEmailStore;
pub use providers::{
    CredentialSource, EmailProvider, GmailConfig, GmailProvider, ProviderSet, ResendConfig, ResendProvider,
    StaticCredentials,
};
pub use queue_worker::{EmailQueueWorker, PollSummary};
pub use repository::{ConnectionRepository, EmailQueueRepository, HealthRepository};
pub use router::{provider_precedence, EmailRouter};

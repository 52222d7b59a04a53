//! PostgreSQL implementation of the email repositories and credential lookup.
//!
//! Tables:
//!
//! ```text
//! email_queue           one row per EmailQueueItem
//! email_campaigns       one row per Campaign
//! sent_emails           append-only audit of delivered items
//! email_service_health  PK (tenant_id, provider)
//! gmail_connections     tenant_id, access_token, needs_reconnect, reconnect_reason
//! resend_integrations   tenant_id, api_key, needs_reconnect, reconnect_reason
//! ```
//!
//! Queue claims lock candidate rows with `FOR UPDATE SKIP LOCKED`, so two
//! pollers against the same table never claim the same item.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, Statement};
use uuid::Uuid;

use crate::error::{EmailError, EmailResult};
use crate::models::{
    Campaign, CampaignStatus, EmailQueueItem, HealthStatus, MessageClass, ProviderKind, QueueStatus,
    SentEmailRecord, ServiceHealth,
};
use crate::providers::CredentialSource;
use crate::repository::{ConnectionRepository, EmailQueueRepository, HealthRepository};

#[derive(Clone)]
pub struct PgEmailStore {
    db: DatabaseConnection,
}

impl PgEmailStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn parse_column<T: std::str::FromStr>(column: &str, value: &str) -> EmailResult<T> {
    value
        .parse()
        .map_err(|_| EmailError::Database(format!("invalid {} '{}'", column, value)))
}

#[derive(Debug, FromQueryResult)]
struct QueueRow {
    id: Uuid,
    tenant_id: Uuid,
    campaign_id: Option<Uuid>,
    recipient_email: String,
    recipient_name: Option<String>,
    sender_email: String,
    sender_name: Option<String>,
    subject: String,
    body: String,
    body_html: Option<String>,
    provider: String,
    message_class: String,
    priority: i32,
    status: String,
    scheduled_for: DateTime<Utc>,
    attempt_count: i32,
    max_attempts: i32,
    error_message: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<QueueRow> for EmailQueueItem {
    type Error = EmailError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            campaign_id: row.campaign_id,
            recipient_email: row.recipient_email,
            recipient_name: row.recipient_name,
            sender_email: row.sender_email,
            sender_name: row.sender_name,
            subject: row.subject,
            body: row.body,
            body_html: row.body_html,
            provider: parse_column("provider", &row.provider)?,
            message_class: MessageClass::from_label(&row.message_class),
            priority: row.priority,
            status: parse_column::<QueueStatus>("queue status", &row.status)?,
            scheduled_for: row.scheduled_for,
            attempt_count: row.attempt_count.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            error_message: row.error_message,
            sent_at: row.sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromQueryResult)]
struct CampaignRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    status: String,
    stagger_delay_secs: i32,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = EmailError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            status: parse_column::<CampaignStatus>("campaign status", &row.status)?,
            stagger_delay_secs: row.stagger_delay_secs.max(0) as u32,
            sent_at: row.sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromQueryResult)]
struct HealthRow {
    tenant_id: Uuid,
    provider: String,
    status: String,
    last_checked_at: DateTime<Utc>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    failure_count: i32,
    error_message: Option<String>,
}

impl TryFrom<HealthRow> for ServiceHealth {
    type Error = EmailError;

    fn try_from(row: HealthRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant_id: row.tenant_id,
            provider: parse_column("provider", &row.provider)?,
            status: parse_column::<HealthStatus>("health status", &row.status)?,
            last_checked_at: row.last_checked_at,
            last_success_at: row.last_success_at,
            last_failure_at: row.last_failure_at,
            failure_count: row.failure_count.max(0) as u32,
            error_message: row.error_message,
        })
    }
}

#[derive(Debug, FromQueryResult)]
struct SecretRow {
    secret: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    count: i64,
}

fn connection_table(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Gmail => "gmail_connections",
        ProviderKind::Resend => "resend_integrations",
    }
}

#[async_trait]
impl EmailQueueRepository for PgEmailStore {
    async fn claim_due(&self, now: DateTime<Utc>, limit: u64) -> EmailResult<Vec<EmailQueueItem>> {
        let sql = r#"
            UPDATE email_queue
            SET status = 'processing', updated_at = $1
            WHERE id IN (
                SELECT id FROM email_queue
                WHERE status IN ('pending', 'retrying') AND scheduled_for <= $1
                ORDER BY priority DESC, scheduled_for ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [now.into(), (limit.min(i64::MAX as u64) as i64).into()],
        );

        let rows = QueueRow::find_by_statement(stmt).all(&self.db).await?;
        let mut items = rows
            .into_iter()
            .map(EmailQueueItem::try_from)
            .collect::<EmailResult<Vec<_>>>()?;
        // RETURNING does not preserve the subquery order
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_for.cmp(&b.scheduled_for))
        });
        Ok(items)
    }

    async fn recover_stale(&self, claimed_before: DateTime<Utc>, now: DateTime<Utc>) -> EmailResult<u64> {
        let sql = r#"
            UPDATE email_queue
            SET status = 'retrying', scheduled_for = $2, updated_at = $2
            WHERE status = 'processing' AND updated_at < $1
        "#;

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [claimed_before.into(), now.into()]);
        let result = self.db.execute_raw(stmt).await?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, item: &EmailQueueItem) -> EmailResult<()> {
        let sql = r#"
            INSERT INTO email_queue (
                id, tenant_id, campaign_id, recipient_email, recipient_name,
                sender_email, sender_name, subject, body, body_html, provider,
                message_class, priority, status, scheduled_for, attempt_count,
                max_attempts, error_message, sent_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                item.id.into(),
                item.tenant_id.into(),
                item.campaign_id.into(),
                item.recipient_email.clone().into(),
                item.recipient_name.clone().into(),
                item.sender_email.clone().into(),
                item.sender_name.clone().into(),
                item.subject.clone().into(),
                item.body.clone().into(),
                item.body_html.clone().into(),
                item.provider.as_ref().into(),
                item.message_class.as_ref().into(),
                item.priority.into(),
                item.status.as_ref().into(),
                item.scheduled_for.into(),
                (item.attempt_count as i32).into(),
                (item.max_attempts as i32).into(),
                item.error_message.clone().into(),
                item.sent_at.into(),
                item.created_at.into(),
                item.updated_at.into(),
            ],
        );

        self.db.execute_raw(stmt).await?;
        Ok(())
    }

    async fn save(&self, item: &EmailQueueItem) -> EmailResult<()> {
        let sql = r#"
            UPDATE email_queue
            SET status = $2, scheduled_for = $3, attempt_count = $4,
                error_message = $5, sent_at = $6, updated_at = $7
            WHERE id = $1
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                item.id.into(),
                item.status.as_ref().into(),
                item.scheduled_for.into(),
                (item.attempt_count as i32).into(),
                item.error_message.clone().into(),
                item.sent_at.into(),
                item.updated_at.into(),
            ],
        );

        let result = self.db.execute_raw(stmt).await?;
        if result.rows_affected() == 0 {
            return Err(EmailError::NotFound(format!("Queue item {}", item.id)));
        }
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> EmailResult<Option<EmailQueueItem>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM email_queue WHERE id = $1",
            [id.into()],
        );

        QueueRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map(EmailQueueItem::try_from)
            .transpose()
    }

    async fn pending_for_campaign(&self, campaign_id: Uuid) -> EmailResult<Vec<EmailQueueItem>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM email_queue WHERE campaign_id = $1 AND status = 'pending' ORDER BY created_at ASC, id ASC",
            [campaign_id.into()],
        );

        QueueRow::find_by_statement(stmt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(EmailQueueItem::try_from)
            .collect()
    }

    async fn count_unfinished(&self, campaign_id: Uuid) -> EmailResult<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT COUNT(*) AS count FROM email_queue WHERE campaign_id = $1 AND status IN ('pending', 'processing', 'retrying')",
            [campaign_id.into()],
        );

        let row = CountRow::find_by_statement(stmt).one(&self.db).await?;
        Ok(row.map(|r| r.count.max(0) as u64).unwrap_or(0))
    }

    async fn get_campaign(&self, id: Uuid) -> EmailResult<Option<Campaign>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM email_campaigns WHERE id = $1",
            [id.into()],
        );

        CampaignRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map(Campaign::try_from)
            .transpose()
    }

    async fn insert_campaign(&self, campaign: &Campaign) -> EmailResult<()> {
        let sql = r#"
            INSERT INTO email_campaigns (id, tenant_id, name, status, stagger_delay_secs, sent_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                campaign.id.into(),
                campaign.tenant_id.into(),
                campaign.name.clone().into(),
                campaign.status.as_ref().into(),
                (campaign.stagger_delay_secs as i32).into(),
                campaign.sent_at.into(),
                campaign.created_at.into(),
                campaign.updated_at.into(),
            ],
        );

        self.db.execute_raw(stmt).await?;
        Ok(())
    }

    async fn save_campaign(&self, campaign: &Campaign) -> EmailResult<()> {
        let sql = r#"
            UPDATE email_campaigns
            SET status = $2, stagger_delay_secs = $3, sent_at = $4, updated_at = $5
            WHERE id = $1
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                campaign.id.into(),
                campaign.status.as_ref().into(),
                (campaign.stagger_delay_secs as i32).into(),
                campaign.sent_at.into(),
                campaign.updated_at.into(),
            ],
        );

        let result = self.db.execute_raw(stmt).await?;
        if result.rows_affected() == 0 {
            return Err(EmailError::NotFound(format!("Campaign {}", campaign.id)));
        }
        Ok(())
    }

    async fn record_sent(&self, record: &SentEmailRecord) -> EmailResult<()> {
        let sql = r#"
            INSERT INTO sent_emails (
                id, tenant_id, campaign_id, queue_item_id, recipient_email, subject,
                provider, provider_message_id, tracking_id, sent_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                record.id.into(),
                record.tenant_id.into(),
                record.campaign_id.into(),
                record.queue_item_id.into(),
                record.recipient_email.clone().into(),
                record.subject.clone().into(),
                record.provider.as_ref().into(),
                record.provider_message_id.clone().into(),
                record.tracking_id.into(),
                record.sent_at.into(),
            ],
        );

        self.db.execute_raw(stmt).await?;
        Ok(())
    }
}

#[async_trait]
impl HealthRepository for PgEmailStore {
    async fn get(&self, tenant_id: Uuid, provider: ProviderKind) -> EmailResult<Option<ServiceHealth>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM email_service_health WHERE tenant_id = $1 AND provider = $2",
            [tenant_id.into(), provider.as_ref().into()],
        );

        HealthRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map(ServiceHealth::try_from)
            .transpose()
    }

    async fn upsert(&self, health: &ServiceHealth) -> EmailResult<()> {
        let sql = r#"
            INSERT INTO email_service_health (
                tenant_id, provider, status, last_checked_at, last_success_at,
                last_failure_at, failure_count, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, provider) DO UPDATE SET
                status = EXCLUDED.status,
                last_checked_at = EXCLUDED.last_checked_at,
                last_success_at = EXCLUDED.last_success_at,
                last_failure_at = EXCLUDED.last_failure_at,
                failure_count = EXCLUDED.failure_count,
                error_message = EXCLUDED.error_message
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                health.tenant_id.into(),
                health.provider.as_ref().into(),
                health.status.as_ref().into(),
                health.last_checked_at.into(),
                health.last_success_at.into(),
                health.last_failure_at.into(),
                (health.failure_count.min(i32::MAX as u32) as i32).into(),
                health.error_message.clone().into(),
            ],
        );

        self.db.execute_raw(stmt).await?;
        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> EmailResult<Vec<ServiceHealth>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM email_service_health WHERE tenant_id = $1 ORDER BY provider",
            [tenant_id.into()],
        );

        HealthRow::find_by_statement(stmt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(ServiceHealth::try_from)
            .collect()
    }
}

#[async_trait]
impl ConnectionRepository for PgEmailStore {
    async fn mark_needs_reconnect(
        &self,
        tenant_id: Uuid,
        provider: ProviderKind,
        reason: &str,
    ) -> EmailResult<()> {
        let sql = format!(
            "UPDATE {} SET needs_reconnect = TRUE, reconnect_reason = $2, updated_at = NOW() WHERE tenant_id = $1",
            connection_table(provider)
        );

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [tenant_id.into(), reason.into()],
        );

        self.db.execute_raw(stmt).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialSource for PgEmailStore {
    async fn credential(&self, tenant_id: Uuid, provider: ProviderKind) -> EmailResult<Option<String>> {
        let sql = match provider {
            ProviderKind::Gmail => {
                "SELECT access_token AS secret FROM gmail_connections WHERE tenant_id = $1 AND needs_reconnect = FALSE"
            }
            ProviderKind::Resend => {
                "SELECT api_key AS secret FROM resend_integrations WHERE tenant_id = $1 AND needs_reconnect = FALSE"
            }
        };

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [tenant_id.into()]);
        let row = SecretRow::find_by_statement(stmt).one(&self.db).await?;
        Ok(row.and_then(|r| r.secret).filter(|s| !s.is_empty()))
    }
}

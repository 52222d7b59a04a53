//! PostgreSQL job store.
//!
//! Expects a `background_jobs` table:
//!
//! ```text
//! id UUID PK, job_type TEXT, priority INT, status TEXT, payload JSONB,
//! result JSONB NULL, error TEXT NULL, attempts INT, max_attempts INT,
//! created_at TIMESTAMPTZ, started_at TIMESTAMPTZ NULL,
//! completed_at TIMESTAMPTZ NULL, visible_at TIMESTAMPTZ NULL
//! ```
//!
//! `claim_due` locks candidate rows with `FOR UPDATE SKIP LOCKED`, so several
//! processes can run loaders against the same table without double-offering.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobPriority, JobStatus, JobType};
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, Statement};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgJobStore {
    db: DatabaseConnection,
}

impl PgJobStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct JobRow {
    id: Uuid,
    job_type: String,
    priority: i32,
    status: String,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    attempts: i32,
    max_attempts: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    visible_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| JobError::Store(format!("invalid job status '{}': {}", row.status, e)))?;

        Ok(Self {
            id: row.id,
            job_type: JobType::from(row.job_type),
            priority: JobPriority(row.priority),
            status,
            payload: row.payload,
            result: row.result,
            error: row.error,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            visible_at: row.visible_at,
        })
    }
}

fn db_error(e: sea_orm::DbErr) -> JobError {
    JobError::Store(format!("Database error: {}", e))
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> JobResult<()> {
        let sql = r#"
            INSERT INTO background_jobs (
                id, job_type, priority, status, payload, result, error,
                attempts, max_attempts, created_at, started_at, completed_at, visible_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                job.id.into(),
                job.job_type.as_str().into(),
                job.priority.0.into(),
                job.status.as_ref().into(),
                job.payload.clone().into(),
                job.result.clone().into(),
                job.error.clone().into(),
                (job.attempts as i32).into(),
                (job.max_attempts as i32).into(),
                job.created_at.into(),
                job.started_at.into(),
                job.completed_at.into(),
                job.visible_at.into(),
            ],
        );

        self.db.execute_raw(stmt).await.map_err(db_error)?;
        Ok(())
    }

    async fn update(&self, job: &Job) -> JobResult<()> {
        let sql = r#"
            UPDATE background_jobs
            SET status = $2, result = $3, error = $4, attempts = $5,
                started_at = $6, completed_at = $7, visible_at = $8
            WHERE id = $1
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                job.id.into(),
                job.status.as_ref().into(),
                job.result.clone().into(),
                job.error.clone().into(),
                (job.attempts as i32).into(),
                job.started_at.into(),
                job.completed_at.into(),
                job.visible_at.into(),
            ],
        );

        let result = self.db.execute_raw(stmt).await.map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(JobError::Store(format!("job {} not found", job.id)));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> JobResult<Option<Job>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM background_jobs WHERE id = $1",
            [id.into()],
        );

        JobRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(Job::try_from)
            .transpose()
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> JobResult<Vec<Job>> {
        let sql = r#"
            UPDATE background_jobs
            SET visible_at = NULL
            WHERE id IN (
                SELECT id FROM background_jobs
                WHERE status = 'pending' AND visible_at <= $1
                ORDER BY priority DESC, visible_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [now.into(), (limit as i64).into()],
        );

        let rows = JobRow::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(db_error)?;

        let mut jobs = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<JobResult<Vec<_>>>()?;
        // RETURNING does not preserve the subquery order
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(jobs)
    }

    async fn recover(&self, now: DateTime<Utc>) -> JobResult<u64> {
        let sql = r#"
            UPDATE background_jobs
            SET status = 'pending', visible_at = $1
            WHERE status IN ('pending', 'processing') AND visible_at IS NULL
        "#;

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [now.into()]);
        let result = self.db.execute_raw(stmt).await.map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

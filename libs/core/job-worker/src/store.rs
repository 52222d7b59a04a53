//! Job persistence.
//!
//! Every job the processor accepts is written through a [`JobStore`]. Retries are
//! not held in timers: a failed attempt is saved as `pending` with a `visible_at`
//! timestamp and the processor's loader claims it back once that time passes.

use crate::error::JobResult;
use crate::job::{Job, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> JobResult<()>;

    async fn update(&self, job: &Job) -> JobResult<()>;

    async fn get(&self, id: Uuid) -> JobResult<Option<Job>>;

    /// Claim up to `limit` pending jobs whose `visible_at` has passed, highest
    /// priority first. Claimed jobs have `visible_at` cleared so no other loader
    /// picks them up again.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> JobResult<Vec<Job>>;

    /// Make non-terminal jobs that are not waiting on a retry visible at `now`.
    /// Run once at boot, before producers enqueue, to pick up work lost by a
    /// previous process. Returns the number of jobs recovered.
    async fn recover(&self, now: DateTime<Utc>) -> JobResult<u64>;
}

/// Process-local store. Does not survive restarts.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> JobResult<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &Job) -> JobResult<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> JobResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> JobResult<Vec<Job>> {
        let mut jobs = self.jobs.write().await;

        let mut due: Vec<&mut Job> = jobs
            .values_mut()
            .filter(|job| {
                job.status == JobStatus::Pending && job.visible_at.is_some_and(|at| at <= now)
            })
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.visible_at.cmp(&b.visible_at))
        });

        Ok(due
            .into_iter()
            .take(limit)
            .map(|job| {
                job.visible_at = None;
                job.clone()
            })
            .collect())
    }

    async fn recover(&self, now: DateTime<Utc>) -> JobResult<u64> {
        let mut jobs = self.jobs.write().await;
        let mut recovered = 0;
        for job in jobs.values_mut() {
            if !job.is_terminal() && job.visible_at.is_none() {
                job.status = JobStatus::Pending;
                job.visible_at = Some(now);
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

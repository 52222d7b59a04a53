//! Job type registry and the handler contract.

use crate::error::JobError;
use crate::job::{Job, JobType};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Execution context handed to a handler for one attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub worker_id: usize,
    /// 1-based attempt number
    pub attempt: u32,
    /// Instant after which the processor aborts the attempt
    pub deadline: Instant,
}

impl JobContext {
    pub fn new(worker_id: usize, attempt: u32, timeout: Duration) -> Self {
        Self {
            worker_id,
            attempt,
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left before the attempt is aborted.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Handler for one job type.
///
/// # Example
///
/// ```rust,ignore
/// struct ReindexHandler { index: Arc<SearchIndex> }
///
/// #[async_trait]
/// impl JobHandler for ReindexHandler {
///     async fn handle(&self, _ctx: JobContext, job: Job) -> Result<(), JobError> {
///         let doc: DocRef = job.payload_as()?;
///         self.index.reindex(doc.id).await.map_err(|e| JobError::transient(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext, job: Job) -> Result<(), JobError>;

    /// Backoff used between this handler's retries. `None` uses the processor default.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext, Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, job: Job) -> Result<(), JobError> {
        (self)(ctx, job).await
    }
}

/// Lookup table from job type to handler.
#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, job_type: impl Into<JobType>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &JobType) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<JobType> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPriority;
    use serde_json::json;

    async fn ok_handler(_ctx: JobContext, _job: Job) -> Result<(), JobError> {
        Ok(())
    }

    #[tokio::test]
    async fn test_register_and_dispatch_fn_handler() {
        let mut registry = JobRegistry::new();
        registry.register("aggregation", Arc::new(ok_handler));

        let handler = registry.get(&JobType::new("aggregation")).unwrap();
        let job = Job::new("aggregation", json!({}), JobPriority::NORMAL, 3);
        let ctx = JobContext::new(0, 1, Duration::from_secs(5));
        assert!(handler.handle(ctx, job).await.is_ok());
        assert!(handler.retry_policy().is_none());
    }

    #[test]
    fn test_unknown_type_is_absent() {
        let registry = JobRegistry::new();
        assert!(registry.get(&JobType::new("retention")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_replaces_previous_handler() {
        let mut registry = JobRegistry::new();
        registry.register("embedding", Arc::new(ok_handler));
        registry.register("embedding", Arc::new(ok_handler));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&JobType::new("embedding")));
    }

    #[tokio::test]
    async fn test_context_remaining_is_bounded_by_timeout() {
        let ctx = JobContext::new(3, 2, Duration::from_secs(300));
        assert!(ctx.remaining() <= Duration::from_secs(300));
        assert_eq!(ctx.worker_id, 3);
        assert_eq!(ctx.attempt, 2);
    }
}

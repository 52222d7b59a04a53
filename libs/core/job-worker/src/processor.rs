//! The job processor: a bounded queue drained by a pool of worker loops.
//!
//! ```text
//! enqueue ──▶ JobStore.insert ──▶ [bounded mpsc] ──▶ worker 0..N ──▶ JobHandler
//!                                       ▲                  │
//!                                       │                  ├─ ok      ─▶ completed
//!              loader (tick) ◀── claim_due(visible_at)     ├─ retry   ─▶ pending, visible_at = now + backoff
//!                                                          └─ give up ─▶ failed
//! ```
//!
//! Retries never sit in timers. They are parked in the [`JobStore`] with a
//! `visible_at` timestamp and the loader offers them back to the queue once due,
//! so a durable store carries them across restarts.

use crate::config::ProcessorConfig;
use crate::error::{ErrorCategory, JobError, JobResult};
use crate::job::{Job, JobPriority, JobType};
use crate::metrics::JobMetrics;
use crate::registry::{JobContext, JobHandler, JobRegistry};
use crate::retry::RetryPolicy;
use crate::store::JobStore;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Generic job processor.
///
/// Create it, register handlers, wrap it in an `Arc` and share that with
/// producers. `start` launches the worker pool.
///
/// ```rust,ignore
/// let mut processor = JobProcessor::new(ProcessorConfig::default(), Arc::new(InMemoryJobStore::new()));
/// processor.register_handler("search_index", SearchIndexHandler::new(index));
/// let processor = Arc::new(processor);
///
/// let handle = processor.start(4, shutdown_rx.clone())?;
/// processor.enqueue("search_index", &doc, JobPriority::HIGH).await?;
/// ```
pub struct JobProcessor {
    config: ProcessorConfig,
    registry: JobRegistry,
    store: Arc<dyn JobStore>,
    sender: mpsc::Sender<Job>,
    /// Shared by all workers; a worker holds the lock only while waiting on `recv`.
    receiver: Mutex<mpsc::Receiver<Job>>,
    started: AtomicBool,
    metrics: JobMetrics,
}

impl JobProcessor {
    pub fn new(config: ProcessorConfig, store: Arc<dyn JobStore>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            registry: JobRegistry::new(),
            store,
            sender,
            receiver: Mutex::new(receiver),
            started: AtomicBool::new(false),
            metrics: JobMetrics,
        }
    }

    /// Associate a handler with a job type. Must happen before the processor is shared.
    pub fn register_handler<H>(&mut self, job_type: impl Into<JobType>, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        let job_type = job_type.into();
        info!(job_type = %job_type, "Registered job handler");
        self.registry.register(job_type, Arc::new(handler));
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Jobs currently waiting in the in-memory queue.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Construct a pending job and offer it to the queue.
    ///
    /// Never waits for queue space. When the queue is full the job is dropped
    /// with a warning and the returned id refers to a job that will never run.
    #[instrument(skip_all, fields(job_type = tracing::field::Empty, job_id = tracing::field::Empty))]
    pub async fn enqueue<T>(
        &self,
        job_type: impl Into<JobType>,
        payload: &T,
        priority: JobPriority,
    ) -> JobResult<Uuid>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let job = Job::new(job_type, payload, priority, self.config.max_attempts);
        let span = tracing::Span::current();
        span.record("job_type", job.job_type.as_str());
        span.record("job_id", tracing::field::display(job.id));

        let id = job.id;
        match self.sender.try_reserve() {
            Ok(permit) => {
                self.store.insert(&job).await?;
                self.metrics.job_enqueued(job.job_type.as_str());
                debug!(priority = job.priority.0, "Job enqueued");
                permit.send(job);
            }
            Err(TrySendError::Full(())) => {
                self.metrics.job_dropped(job.job_type.as_str());
                warn!(
                    capacity = self.sender.max_capacity(),
                    "Job queue full, dropping job"
                );
            }
            Err(TrySendError::Closed(())) => return Err(JobError::Shutdown),
        }

        Ok(id)
    }

    /// Look up the stored state of a job.
    pub async fn job(&self, id: Uuid) -> JobResult<Option<Job>> {
        self.store.get(id).await
    }

    /// Make work abandoned by a previous process visible again.
    ///
    /// Call once at boot before producers start enqueueing.
    pub async fn recover_orphans(&self) -> JobResult<u64> {
        let recovered = self.store.recover(Utc::now()).await?;
        if recovered > 0 {
            info!(recovered, "Recovered orphaned jobs");
            self.metrics.jobs_recovered(recovered);
        }
        Ok(recovered)
    }

    /// Launch `workers` execution loops plus the retry loader.
    ///
    /// Flipping `shutdown` to `true` stops further dequeues and loader ticks.
    /// Handlers already running finish their current attempt.
    pub fn start(
        self: &Arc<Self>,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> JobResult<ProcessorHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyStarted);
        }

        let workers = workers.max(1);
        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let this = Arc::clone(self);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { this.worker_loop(worker_id, shutdown).await });
        }

        let this = Arc::clone(self);
        tasks.spawn(async move { this.loader_loop(shutdown).await });

        self.metrics.active_workers(workers);
        info!(
            workers,
            queue_capacity = self.sender.max_capacity(),
            job_timeout_secs = self.config.job_timeout.as_secs(),
            handlers = self.registry.len(),
            "Job processor started"
        );

        Ok(ProcessorHandle { tasks })
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker_id, "Job worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let job = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                job = self.next_job() => job,
            };

            match job {
                Some(job) => self.execute(worker_id, job).await,
                None => break,
            }
        }

        debug!(worker_id, "Job worker stopped");
    }

    async fn next_job(&self) -> Option<Job> {
        self.receiver.lock().await.recv().await
    }

    async fn loader_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.loader_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.load_due().await {
                        warn!(error = %e, "Failed to load due jobs");
                    }
                }
            }
        }

        debug!("Job loader stopped");
    }

    /// Offer parked jobs whose `visible_at` has passed back to the queue.
    async fn load_due(&self) -> JobResult<usize> {
        let free = self.sender.capacity();
        if free == 0 {
            return Ok(0);
        }

        let due = self.store.claim_due(Utc::now(), free).await?;
        let mut offered = 0;
        for job in due {
            match self.sender.try_send(job) {
                Ok(()) => offered += 1,
                Err(TrySendError::Full(mut job)) | Err(TrySendError::Closed(mut job)) => {
                    // Park it again for the next tick
                    job.visible_at = Some(Utc::now());
                    self.store.update(&job).await?;
                }
            }
        }

        if offered > 0 {
            debug!(offered, "Re-offered due jobs");
        }
        Ok(offered)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    async fn execute(&self, worker_id: usize, mut job: Job) {
        if job.is_terminal() {
            debug!(status = %job.status, "Skipping finished job");
            return;
        }
        if !job.can_retry() {
            // Interrupted during its last attempt by a previous process
            warn!(attempts = job.attempts, "Job has no attempts left");
            job.fail("attempts exhausted", Utc::now());
            self.persist(&job).await;
            self.metrics.job_failed(job.job_type.as_str(), ErrorCategory::Permanent.as_str());
            return;
        }

        let started = Instant::now();
        job.begin_attempt(Utc::now());
        self.persist(&job).await;

        let Some(handler) = self.registry.get(&job.job_type) else {
            let err = JobError::NoHandler(job.job_type.clone());
            error!(error = %err, "No handler registered for job type");
            self.metrics
                .job_failed(job.job_type.as_str(), err.category().as_str());
            job.fail(err.to_string(), Utc::now());
            self.persist(&job).await;
            return;
        };

        let ctx = JobContext::new(worker_id, job.attempts, self.config.job_timeout);
        let policy = handler.retry_policy().unwrap_or(self.config.retry_policy);

        match self.run_handler(handler, ctx, job.clone()).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                job.complete(Utc::now());
                self.persist(&job).await;
                self.metrics.job_completed(job.job_type.as_str(), elapsed);
                info!(attempts = job.attempts, took_ms = elapsed.as_millis() as u64, "Job completed");
            }
            Err(err) => self.handle_failure(job, err, policy).await,
        }
    }

    /// Run one attempt on its own task so a panic or overrun cannot take the worker down.
    async fn run_handler(
        &self,
        handler: Arc<dyn JobHandler>,
        ctx: JobContext,
        job: Job,
    ) -> Result<(), JobError> {
        let timeout = self.config.job_timeout;
        let mut task = tokio::spawn(async move { handler.handle(ctx, job).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(JobError::Panicked(panic_message(join_err.into_panic())))
            }
            Ok(Err(_)) => Err(JobError::transient("job handler was cancelled")),
            Err(_) => {
                task.abort();
                Err(JobError::Timeout(timeout))
            }
        }
    }

    async fn handle_failure(&self, mut job: Job, err: JobError, policy: RetryPolicy) {
        let now = Utc::now();
        let job_type = job.job_type.as_str().to_string();

        if err.should_retry() && job.can_retry() {
            let delay = policy.delay_for(job.attempts);
            warn!(
                error = %err,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                "Job attempt failed, scheduling retry"
            );
            job.schedule_retry(err.to_string(), after(now, delay));
            self.persist(&job).await;
            self.metrics.job_retried(&job_type);
        } else {
            error!(
                error = %err,
                category = err.category().as_str(),
                attempts = job.attempts,
                "Job failed permanently"
            );
            job.fail(err.to_string(), now);
            self.persist(&job).await;
            self.metrics.job_failed(&job_type, err.category().as_str());
        }
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.update(job).await {
            error!(job_id = %job.id, status = %job.status, error = %e, "Failed to persist job state");
        }
    }
}

/// Tasks spawned by [`JobProcessor::start`].
pub struct ProcessorHandle {
    tasks: JoinSet<()>,
}

impl ProcessorHandle {
    /// Wait for every worker and the loader to exit.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Job worker task ended abnormally");
            }
        }
        info!("Job processor stopped");
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockJobStore;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    async fn always_fails(_ctx: JobContext, _job: Job) -> Result<(), JobError> {
        Err(JobError::transient("provider unavailable"))
    }

    /// Store mock that records every update.
    fn recording_store(updates: Arc<StdMutex<Vec<Job>>>) -> MockJobStore {
        let mut store = MockJobStore::new();
        store.expect_update().returning(move |job| {
            updates.lock().unwrap().push(job.clone());
            Ok(())
        });
        store
    }

    #[tokio::test]
    async fn test_failed_attempt_is_parked_with_quadratic_backoff() {
        let updates = Arc::new(StdMutex::new(Vec::new()));
        let store = recording_store(updates.clone());
        let mut processor = JobProcessor::new(ProcessorConfig::default(), Arc::new(store));
        processor.register_handler("aggregation", always_fails);

        // Second attempt: 2² = 4 seconds
        let mut job = Job::new("aggregation", json!({}), JobPriority::NORMAL, 3);
        job.attempts = 1;
        let before = Utc::now();
        processor.execute(0, job).await;

        let updates = updates.lock().unwrap();
        let parked = updates.last().unwrap();
        assert_eq!(parked.attempts, 2);
        assert_eq!(parked.error.as_deref(), Some("provider unavailable"));
        let delay = parked.visible_at.unwrap() - before;
        assert!(delay >= TimeDelta::seconds(4));
        assert!(delay < TimeDelta::seconds(5));
    }

    #[tokio::test]
    async fn test_last_attempt_marks_failed() {
        let updates = Arc::new(StdMutex::new(Vec::new()));
        let store = recording_store(updates.clone());
        let mut processor = JobProcessor::new(ProcessorConfig::default(), Arc::new(store));
        processor.register_handler("aggregation", always_fails);

        let mut job = Job::new("aggregation", json!({}), JobPriority::NORMAL, 3);
        job.attempts = 2;
        processor.execute(0, job).await;

        let updates = updates.lock().unwrap();
        let last = updates.last().unwrap();
        assert_eq!(last.status, crate::job::JobStatus::Failed);
        assert_eq!(last.attempts, 3);
        assert!(last.visible_at.is_none());
    }

    #[tokio::test]
    async fn test_handler_retry_policy_overrides_default() {
        struct LinearHandler;

        #[async_trait::async_trait]
        impl JobHandler for LinearHandler {
            async fn handle(&self, _ctx: JobContext, _job: Job) -> Result<(), JobError> {
                Err(JobError::transient("smtp 451"))
            }

            fn retry_policy(&self) -> Option<RetryPolicy> {
                Some(RetryPolicy::linear_minutes())
            }
        }

        let updates = Arc::new(StdMutex::new(Vec::new()));
        let store = recording_store(updates.clone());
        let mut processor = JobProcessor::new(ProcessorConfig::default(), Arc::new(store));
        processor.register_handler("send_email", LinearHandler);

        let before = Utc::now();
        processor
            .execute(0, Job::new("send_email", json!({}), JobPriority::NORMAL, 3))
            .await;

        let updates = updates.lock().unwrap();
        let delay = updates.last().unwrap().visible_at.unwrap() - before;
        assert!(delay >= TimeDelta::seconds(60));
        assert!(delay < TimeDelta::seconds(61));
    }

    #[tokio::test]
    async fn test_store_failure_on_enqueue_is_returned() {
        let mut store = MockJobStore::new();
        store
            .expect_insert()
            .returning(|_| Err(JobError::Store("connection refused".into())));
        let processor = JobProcessor::new(ProcessorConfig::default(), Arc::new(store));

        let result = processor
            .enqueue("retention", &json!({}), JobPriority::LOW)
            .await;
        assert!(matches!(result, Err(JobError::Store(_))));
        assert_eq!(processor.queued(), 0);
    }

    #[test]
    fn test_after_saturates() {
        let now = Utc::now();
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(after(now, Duration::from_secs(9)), now + TimeDelta::seconds(9));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}

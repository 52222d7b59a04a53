//! End-to-end behaviour of the job processor over the in-memory store.

use async_trait::async_trait;
use job_worker::{
    InMemoryJobStore, Job, JobContext, JobError, JobHandler, JobPriority, JobProcessor, JobStatus,
    ProcessorConfig, RetryPolicy,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Millisecond backoff and loader tick keep retries fast in real time.
fn fast_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_retry_policy(RetryPolicy::Quadratic {
            unit: Duration::from_millis(5),
        })
        .with_loader_interval(Duration::from_millis(5))
}

/// Fails the first `failures` attempts, then succeeds.
struct Flaky {
    failures: u32,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl JobHandler for Flaky {
    async fn handle(&self, ctx: JobContext, _job: Job) -> Result<(), JobError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(ctx.attempt, call);
        if call <= self.failures {
            Err(JobError::transient(format!("attempt {} failed", call)))
        } else {
            Ok(())
        }
    }
}

async fn wait_for_terminal(processor: &JobProcessor, id: Uuid) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = processor.job(id).await.unwrap().expect("job stored");
        assert!(job.attempts <= job.max_attempts);
        if job.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} never finished: {:?}",
            id,
            job
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn processor_with(config: ProcessorConfig, setup: impl FnOnce(&mut JobProcessor)) -> Arc<JobProcessor> {
    let mut processor = JobProcessor::new(config, Arc::new(InMemoryJobStore::new()));
    setup(&mut processor);
    Arc::new(processor)
}

#[tokio::test]
async fn test_successful_job_completes_on_first_attempt() {
    let calls = Arc::new(AtomicU32::new(0));
    let processor = processor_with(fast_config(), |p| {
        p.register_handler(
            "search_index",
            Flaky {
                failures: 0,
                calls: calls.clone(),
            },
        );
    });
    let (_tx, rx) = watch::channel(false);
    let _handle = processor.start(2, rx).unwrap();

    let id = processor
        .enqueue("search_index", &json!({"doc": 1}), JobPriority::NORMAL)
        .await
        .unwrap();

    let job = wait_for_terminal(&processor, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert!(job.completed_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let processor = processor_with(fast_config(), |p| {
        p.register_handler(
            "embedding",
            Flaky {
                failures: 2,
                calls: calls.clone(),
            },
        );
    });
    let (_tx, rx) = watch::channel(false);
    let _handle = processor.start(2, rx).unwrap();

    let id = processor
        .enqueue("embedding", &json!({}), JobPriority::HIGH)
        .await
        .unwrap();

    let job = wait_for_terminal(&processor, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_job_fails_after_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let processor = processor_with(fast_config(), |p| {
        p.register_handler(
            "aggregation",
            Flaky {
                failures: u32::MAX,
                calls: calls.clone(),
            },
        );
    });
    let (_tx, rx) = watch::channel(false);
    let _handle = processor.start(1, rx).unwrap();

    let id = processor
        .enqueue("aggregation", &json!({}), JobPriority::LOW)
        .await
        .unwrap();

    let job = wait_for_terminal(&processor, id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, job.max_attempts);
    assert_eq!(job.error.as_deref(), Some("attempt 3 failed"));

    // No further attempts once failed
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_handler_fails_immediately() {
    let processor = processor_with(fast_config(), |_| {});
    let (_tx, rx) = watch::channel(false);
    let _handle = processor.start(1, rx).unwrap();

    let id = processor
        .enqueue("retention", &json!({}), JobPriority::NORMAL)
        .await
        .unwrap();

    let job = wait_for_terminal(&processor, id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error.as_deref(), Some("no handler for job type retention"));
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let processor = processor_with(fast_config(), |p| {
        p.register_handler("notification", |_ctx: JobContext, _job: Job| async {
            Err::<(), _>(JobError::permanent("recipient address is empty"))
        });
    });
    let (_tx, rx) = watch::channel(false);
    let _handle = processor.start(1, rx).unwrap();

    let id = processor
        .enqueue("notification", &json!({}), JobPriority::NORMAL)
        .await
        .unwrap();

    let job = wait_for_terminal(&processor, id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn test_panicking_handler_does_not_kill_the_worker() {
    let processor = processor_with(fast_config().with_max_attempts(1), |p| {
        p.register_handler("embedding", |_ctx: JobContext, job: Job| async move {
            if job.payload["explode"].as_bool().unwrap_or(false) {
                panic!("model server returned garbage");
            }
            Ok::<(), JobError>(())
        });
    });
    let (_tx, rx) = watch::channel(false);
    // Single worker: the second job only runs if the loop survived the panic
    let _handle = processor.start(1, rx).unwrap();

    let bad = processor
        .enqueue("embedding", &json!({"explode": true}), JobPriority::NORMAL)
        .await
        .unwrap();
    let good = processor
        .enqueue("embedding", &json!({"explode": false}), JobPriority::NORMAL)
        .await
        .unwrap();

    let bad = wait_for_terminal(&processor, bad).await;
    assert_eq!(bad.status, JobStatus::Failed);
    assert!(bad.error.unwrap().contains("model server returned garbage"));

    let good = wait_for_terminal(&processor, good).await;
    assert_eq!(good.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_attempt_exceeding_timeout_is_aborted() {
    let config = fast_config()
        .with_job_timeout(Duration::from_millis(20))
        .with_max_attempts(2);
    let processor = processor_with(config, |p| {
        p.register_handler("aggregation", |_ctx: JobContext, _job: Job| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), JobError>(())
        });
    });
    let (_tx, rx) = watch::channel(false);
    let _handle = processor.start(1, rx).unwrap();

    let id = processor
        .enqueue("aggregation", &json!({}), JobPriority::NORMAL)
        .await
        .unwrap();

    let job = wait_for_terminal(&processor, id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert!(job.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_full_queue_drops_job_without_error() {
    let store = Arc::new(InMemoryJobStore::new());
    let processor = JobProcessor::new(fast_config().with_queue_capacity(1), store.clone());

    // Not started, so nothing drains the queue
    let kept = processor
        .enqueue("search_index", &json!({}), JobPriority::NORMAL)
        .await
        .unwrap();
    let dropped = processor
        .enqueue("search_index", &json!({}), JobPriority::NORMAL)
        .await
        .unwrap();

    assert_ne!(kept, dropped);
    assert_eq!(processor.queued(), 1);
    assert_eq!(store.len().await, 1);
    assert!(processor.job(dropped).await.unwrap().is_none());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let processor = processor_with(fast_config(), |_| {});
    let (_tx, rx) = watch::channel(false);
    let _handle = processor.start(1, rx.clone()).unwrap();
    assert!(matches!(
        processor.start(1, rx),
        Err(JobError::AlreadyStarted)
    ));
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let processor = processor_with(fast_config(), |_| {});
    let (tx, rx) = watch::channel(false);
    let handle = processor.start(3, rx).unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("workers stop after shutdown");
}

#[tokio::test]
async fn test_recover_orphans_replays_abandoned_work() {
    let store = Arc::new(InMemoryJobStore::new());

    // A previous process accepted this job and died mid-attempt
    {
        let previous = JobProcessor::new(fast_config(), store.clone());
        previous
            .enqueue("notification", &json!({}), JobPriority::NORMAL)
            .await
            .unwrap();
    }

    let calls = Arc::new(AtomicU32::new(0));
    let mut processor = JobProcessor::new(fast_config(), store.clone());
    processor.register_handler(
        "notification",
        Flaky {
            failures: 0,
            calls: calls.clone(),
        },
    );
    let processor = Arc::new(processor);
    assert_eq!(processor.recover_orphans().await.unwrap(), 1);

    let (_tx, rx) = watch::channel(false);
    let _handle = processor.start(1, rx).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while calls.load(Ordering::SeqCst) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "orphan never replayed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

//! Email work dispatched through the generic job processor.

mod common;

use common::{harness, FakeProvider};
use domain_email::{
    register_email_jobs, Campaign, CampaignStatus, EmailQueueItem, EmailQueueRepository, EmailQueueWorker,
    Mailbox, MessageClass, OutboundEmail, ProviderKind, QueueWorkerConfig, ScheduleCampaign, ThreadingHints,
    SCHEDULE_CAMPAIGN_JOB, SEND_EMAIL_JOB,
};
use job_worker::{InMemoryJobStore, Job, JobPriority, JobProcessor, JobStatus, ProcessorConfig, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

async fn wait_for_terminal(processor: &JobProcessor, id: Uuid) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = processor.job(id).await.unwrap().expect("job stored");
        if job.is_terminal() {
            return job;
        }
        assert!(tokio::time::Instant::now() < deadline, "job {} never finished", id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn outbound(tenant_id: Uuid) -> OutboundEmail {
    OutboundEmail {
        tenant_id,
        from: Mailbox::new("system@acme.test", None),
        to: Mailbox::new("ops@example.com", None),
        subject: "Nightly export finished".into(),
        text_body: "All good".into(),
        html_body: None,
        reply_to: None,
        threading: ThreadingHints::default(),
        preferred_provider: ProviderKind::Resend,
        message_class: MessageClass::System,
    }
}

#[tokio::test]
async fn send_email_job_retries_with_queue_backoff() {
    let h = harness(
        FakeProvider::new(ProviderKind::Gmail),
        FakeProvider::new(ProviderKind::Resend).then_transient(1),
    );
    let worker = Arc::new(EmailQueueWorker::new(
        h.store.clone(),
        h.router.clone(),
        QueueWorkerConfig::default().with_retry_policy(RetryPolicy::Linear {
            step: Duration::from_millis(10),
        }),
    ));

    let mut processor = JobProcessor::new(
        ProcessorConfig::default().with_loader_interval(Duration::from_millis(5)),
        Arc::new(InMemoryJobStore::new()),
    );
    register_email_jobs(&mut processor, h.router.clone(), worker);
    let processor = Arc::new(processor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = processor.start(2, shutdown_rx).unwrap();

    let id = processor
        .enqueue(SEND_EMAIL_JOB, &outbound(Uuid::now_v7()), JobPriority::HIGH)
        .await
        .unwrap();
    let job = wait_for_terminal(&processor, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(h.resend.calls(), 2);

    shutdown_tx.send(true).unwrap();
    handle.join().await;
}

#[tokio::test]
async fn schedule_campaign_job_staggers_items() {
    let h = harness(FakeProvider::new(ProviderKind::Gmail), FakeProvider::new(ProviderKind::Resend));
    let worker = Arc::new(EmailQueueWorker::new(
        h.store.clone(),
        h.router.clone(),
        QueueWorkerConfig::default(),
    ));

    let tenant = Uuid::now_v7();
    let campaign = Campaign::draft(tenant, "Quarterly update");
    h.store.insert_campaign(&campaign).await.unwrap();
    for n in 0..3 {
        let item = EmailQueueItem::new(tenant, format!("r{}@example.com", n), "team@acme.test", "Update", "Body")
            .for_campaign(campaign.id);
        h.store.insert(&item).await.unwrap();
    }

    let mut processor = JobProcessor::new(ProcessorConfig::default(), Arc::new(InMemoryJobStore::new()));
    register_email_jobs(&mut processor, h.router.clone(), worker);
    let processor = Arc::new(processor);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = processor.start(1, shutdown_rx).unwrap();

    let request = ScheduleCampaign {
        campaign_id: campaign.id,
        stagger_secs: 20,
    };
    let id = processor
        .enqueue(SCHEDULE_CAMPAIGN_JOB, &request, JobPriority::NORMAL)
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&processor, id).await.status, JobStatus::Completed);

    let items = h.store.items().await;
    assert_eq!(items.len(), 3);
    for pair in items.windows(2) {
        assert_eq!(
            pair[1].scheduled_for - pair[0].scheduled_for,
            chrono::TimeDelta::seconds(20)
        );
    }
    let stored = h.store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Sending);

    shutdown_tx.send(true).unwrap();
    handle.join().await;
}

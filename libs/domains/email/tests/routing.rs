//! Provider selection and health bookkeeping through the router.

mod common;

use common::{harness, FakeProvider};
use domain_email::{
    EmailError, HealthStatus, Mailbox, MessageClass, OutboundEmail, ProviderKind, ThreadingHints,
};
use uuid::Uuid;

fn email(tenant_id: Uuid, preferred: ProviderKind, class: MessageClass) -> OutboundEmail {
    OutboundEmail {
        tenant_id,
        from: Mailbox::new("recruiting@acme.test", Some("Acme Recruiting".into())),
        to: Mailbox::new("candidate@example.com", None),
        subject: "Interview tomorrow".into(),
        text_body: "See you at 10".into(),
        html_body: None,
        reply_to: None,
        threading: ThreadingHints::default(),
        preferred_provider: preferred,
        message_class: class,
    }
}

#[tokio::test]
async fn reminder_prefers_resend_while_healthy() {
    let h = harness(FakeProvider::new(ProviderKind::Gmail), FakeProvider::new(ProviderKind::Resend));
    let tenant = Uuid::now_v7();
    h.health.record_success(tenant, ProviderKind::Resend).await.unwrap();
    h.health.record_success(tenant, ProviderKind::Gmail).await.unwrap();

    let chosen = h
        .router
        .determine_provider(tenant, ProviderKind::Gmail, MessageClass::Reminder)
        .await;
    assert_eq!(chosen, ProviderKind::Resend);
}

#[tokio::test]
async fn reminder_falls_back_to_gmail_when_resend_is_down() {
    let h = harness(FakeProvider::new(ProviderKind::Gmail), FakeProvider::new(ProviderKind::Resend));
    let tenant = Uuid::now_v7();
    h.health
        .record_failure(tenant, ProviderKind::Resend, "HTTP 500")
        .await
        .unwrap();
    h.health.record_success(tenant, ProviderKind::Gmail).await.unwrap();

    let chosen = h
        .router
        .determine_provider(tenant, ProviderKind::Resend, MessageClass::Reminder)
        .await;
    assert_eq!(chosen, ProviderKind::Gmail);
}

#[tokio::test]
async fn reminder_uses_preferred_when_everything_is_down() {
    let h = harness(FakeProvider::new(ProviderKind::Gmail), FakeProvider::new(ProviderKind::Resend));
    let tenant = Uuid::now_v7();
    for provider in ProviderKind::ALL {
        h.health.record_failure(tenant, provider, "timeout").await.unwrap();
    }

    let chosen = h
        .router
        .determine_provider(tenant, ProviderKind::Gmail, MessageClass::Reminder)
        .await;
    assert_eq!(chosen, ProviderKind::Gmail);

    // The send is still attempted against the down provider
    let result = h
        .router
        .send(&email(tenant, ProviderKind::Gmail, MessageClass::Reminder))
        .await;
    assert!(result.success);
    assert_eq!(result.provider, ProviderKind::Gmail);
    assert_eq!(h.gmail.calls(), 1);
    assert_eq!(h.resend.calls(), 0);
}

#[tokio::test]
async fn communication_prefers_gmail_and_default_class_follows_preference() {
    let h = harness(FakeProvider::new(ProviderKind::Gmail), FakeProvider::new(ProviderKind::Resend));
    let tenant = Uuid::now_v7();
    for provider in ProviderKind::ALL {
        h.health.record_success(tenant, provider).await.unwrap();
    }

    let applicant = h
        .router
        .determine_provider(tenant, ProviderKind::Resend, MessageClass::Applicant)
        .await;
    assert_eq!(applicant, ProviderKind::Gmail);

    let other = h
        .router
        .determine_provider(tenant, ProviderKind::Resend, MessageClass::from_label("marketing"))
        .await;
    assert_eq!(other, ProviderKind::Resend);
}

#[tokio::test]
async fn three_failures_then_success_resets_health() {
    let gmail = FakeProvider::new(ProviderKind::Gmail).then_transient(3);
    let h = harness(gmail, FakeProvider::new(ProviderKind::Resend));
    let tenant = Uuid::now_v7();
    let message = email(tenant, ProviderKind::Gmail, MessageClass::Communication);

    for _ in 0..3 {
        let result = h.router.send(&message).await;
        assert!(!result.success);
        assert!(result.retryable);
        assert_eq!(result.provider, ProviderKind::Gmail);
        assert_eq!(result.error.as_deref(), Some("HTTP 503: Failed to send email"));
    }
    let health = h.health.check(tenant, ProviderKind::Gmail).await.unwrap();
    assert_eq!(health.failure_count, 3);
    assert_eq!(health.status, HealthStatus::Down);

    let result = h.router.send(&message).await;
    assert!(result.success);
    assert_eq!(result.message_id, "gmail-msg-4");

    let health = h.health.check(tenant, ProviderKind::Gmail).await.unwrap();
    assert_eq!(health.failure_count, 0);
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.error_message.is_none());
}

#[tokio::test]
async fn revoked_gmail_grant_flags_reconnect() {
    let gmail = FakeProvider::new(ProviderKind::Gmail).then(Err(EmailError::AuthExpired {
        provider: ProviderKind::Gmail,
        reason: domain_email::providers::GMAIL_RECONNECT_REASON.to_string(),
    }));
    let h = harness(gmail, FakeProvider::new(ProviderKind::Resend));
    let tenant = Uuid::now_v7();

    let result = h
        .router
        .send(&email(tenant, ProviderKind::Gmail, MessageClass::Communication))
        .await;
    assert!(!result.success);
    assert!(!result.retryable);
    assert_eq!(
        h.store.reconnect_reason(tenant, ProviderKind::Gmail).await.as_deref(),
        Some(domain_email::providers::GMAIL_RECONNECT_REASON)
    );
}

#[tokio::test]
async fn dashboard_reflects_router_outcomes() {
    let h = harness(
        FakeProvider::new(ProviderKind::Gmail),
        FakeProvider::new(ProviderKind::Resend).then_transient(1),
    );
    let tenant = Uuid::now_v7();

    h.router
        .send(&email(tenant, ProviderKind::Resend, MessageClass::System))
        .await;
    h.router
        .send(&email(tenant, ProviderKind::Gmail, MessageClass::Communication))
        .await;

    let dashboard = h.health.dashboard(tenant).await.unwrap();
    let status = |provider| {
        dashboard
            .iter()
            .find(|h| h.provider == provider)
            .map(|h| h.status)
    };
    assert_eq!(status(ProviderKind::Gmail), Some(HealthStatus::Healthy));
    assert_eq!(status(ProviderKind::Resend), Some(HealthStatus::Down));
}

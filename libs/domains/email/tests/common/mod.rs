//! Shared fakes for the email scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use domain_email::{
    EmailError, EmailProvider, EmailResult, EmailRouter, HealthTracker, InMemoryEmailStore, OutboundEmail,
    ProviderKind, ProviderSet,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider that replays scripted outcomes, then succeeds.
pub struct FakeProvider {
    kind: ProviderKind,
    outcomes: Mutex<VecDeque<EmailResult<String>>>,
    sent: Mutex<Vec<OutboundEmail>>,
    delay: Duration,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            outcomes: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Answer every send only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then(self, outcome: EmailResult<String>) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn then_transient(self, times: usize) -> Self {
        (0..times).fold(self, |p, _| p.then(Err(EmailError::Transient("HTTP 503: Failed to send email".into()))))
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|e| e.subject.clone()).collect()
    }
}

#[async_trait]
impl EmailProvider for FakeProvider {
    async fn send(&self, email: &OutboundEmail) -> EmailResult<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let call = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(email.clone());
            sent.len()
        };
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("{}-msg-{}", self.kind, call)))
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

pub struct Harness {
    pub store: Arc<InMemoryEmailStore>,
    pub health: Arc<HealthTracker>,
    pub router: Arc<EmailRouter>,
    pub gmail: Arc<FakeProvider>,
    pub resend: Arc<FakeProvider>,
}

pub fn harness(gmail: FakeProvider, resend: FakeProvider) -> Harness {
    let store = Arc::new(InMemoryEmailStore::new());
    let health = Arc::new(HealthTracker::new(store.clone()));
    let gmail = Arc::new(gmail);
    let resend = Arc::new(resend);
    let providers = ProviderSet::new().with(gmail.clone()).with(resend.clone());
    let router = Arc::new(EmailRouter::new(health.clone(), providers, store.clone()));
    Harness {
        store,
        health,
        router,
        gmail,
        resend,
    }
}

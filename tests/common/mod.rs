//! Shared fixtures: an in-memory store and a notifier that records what it
//! was asked to send.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use incubator::approval::ApprovalEngine;
use incubator::metrics::WorkflowMetrics;
use incubator::notification::invitation::InvitationLinks;
use incubator::notification::{EmailMessage, NotificationSender};
use incubator::store::memory::InMemoryStore;

pub const BASE_URL: &str = "https://incubator.test";

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EmailMessage>>,
    attempts: Mutex<Vec<String>>,
    bouncing: Mutex<Vec<String>>,
    failing: AtomicBool,
    disabled: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Behave like a process with no mail API configured.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Reject every message to `to`, permanently.
    pub fn bounce(&self, to: &str) {
        self.bouncing.lock().unwrap().push(to.to_string());
    }

    /// Every recipient a send was attempted for, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Token carried by the redemption link in the latest email to `to`.
    pub fn token_for(&self, to: &str) -> String {
        let sent = self.sent();
        let message = sent
            .iter()
            .rev()
            .find(|m| m.to == to)
            .unwrap_or_else(|| panic!("no email sent to {}", to));
        token_from_body(&message.text_body)
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        self.attempts.lock().unwrap().push(message.to.clone());
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("smtp relay down");
        }
        if self.bouncing.lock().unwrap().contains(&message.to) {
            anyhow::bail!("mailbox does not exist: {}", message.to);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn is_configured(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }
}

/// Pull the `token` query parameter out of the first link in an email body.
pub fn token_from_body(body: &str) -> String {
    let link = body
        .split_whitespace()
        .find(|w| w.starts_with(BASE_URL))
        .expect("email contains a redemption link");
    let url = url::Url::parse(link).expect("valid link");
    url.query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .expect("link carries a token")
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: ApprovalEngine,
}

pub fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = ApprovalEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        notifier.clone(),
        InvitationLinks::new(BASE_URL).unwrap(),
        WorkflowMetrics::new().unwrap(),
    );
    Harness {
        store,
        notifier,
        engine,
    }
}

pub fn emails(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

//! Outbound mail delivery: an injectable trait plus a debug recorder and a
//! webhook-backed implementation, mirroring the way the rest of this engine
//! injects its stores.

use async_trait::async_trait;
use parking_lot::RwLock;
use reconciler_common::ContactEmail;

use crate::error::DeliveryError;

/// A rendered message ready for delivery.
#[derive(Debug, Clone)]
pub struct MailMessage {
    /// Recipients.
    pub to: Vec<ContactEmail>,
    /// Subject line, already carrying the configured prefix.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send `message`. Implementations should not retry; the caller decides
    /// what a failure means for the run.
    async fn send(&self, message: MailMessage) -> Result<(), DeliveryError>;
}

/// Records every message instead of sending it. Used for `MAIL_DEBUG=true`
/// deployments and for tests.
pub struct DebugMailer {
    sent: RwLock<Vec<MailMessage>>,
}

impl DebugMailer {
    /// Construct an empty recorder.
    pub fn new() -> Self {
        Self { sent: RwLock::new(Vec::new()) }
    }

    /// Every message recorded so far, oldest first.
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.read().clone()
    }
}

impl Default for DebugMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for DebugMailer {
    async fn send(&self, message: MailMessage) -> Result<(), DeliveryError> {
        tracing::info!(to = ?message.to, subject = %message.subject, "mail (debug)");
        self.sent.write().push(message);
        Ok(())
    }
}

/// Posts rendered messages to a webhook endpoint (a mail gateway, a Slack
/// relay, anything that accepts a JSON envelope).
pub struct ReqwestMailer {
    client: reqwest::Client,
    webhook_url: String,
}

impl ReqwestMailer {
    /// Construct a mailer that posts to `webhook_url`.
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), webhook_url: webhook_url.into() }
    }
}

#[async_trait]
impl Mailer for ReqwestMailer {
    async fn send(&self, message: MailMessage) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "to": message.to.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "subject": message.subject,
            "body": message.body,
        });
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Mail(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DeliveryError::Mail(format!("webhook returned status {}", response.status())));
        }
        Ok(())
    }
}

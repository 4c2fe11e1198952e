//! Ticket escalation: an injectable trait plus a mock and an HTTP-backed
//! implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use reconciler_common::TicketHandle;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DeliveryError;

/// A request to open or update a ticket.
#[derive(Debug, Clone)]
pub struct TicketRequest {
    /// Subject line; used as the inherit-existing-ticket key.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// The previously-attached ticket, if this is an update.
    pub existing: Option<TicketHandle>,
}

/// Ticket system client.
#[async_trait]
pub trait TicketClient: Send + Sync {
    /// Create a new ticket, or update the one in `request.existing` if set.
    async fn create_or_update(&self, request: TicketRequest) -> Result<TicketHandle, DeliveryError>;
}

/// In-memory ticket client for tests and `IXF_SEND_TICKETS=false` deployments.
pub struct MockTicketClient {
    next_id: AtomicU64,
    created: RwLock<Vec<TicketRequest>>,
}

impl MockTicketClient {
    /// Construct an empty mock.
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), created: RwLock::new(Vec::new()) }
    }

    /// Every request handled so far, oldest first.
    pub fn requests(&self) -> Vec<TicketRequest> {
        self.created.read().clone()
    }
}

impl Default for MockTicketClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketClient for MockTicketClient {
    async fn create_or_update(&self, request: TicketRequest) -> Result<TicketHandle, DeliveryError> {
        let handle = match &request.existing {
            Some(existing) => existing.clone(),
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                TicketHandle { id: id.to_string(), reference: request.subject.clone() }
            }
        };
        self.created.write().push(request);
        Ok(handle)
    }
}

/// Posts ticket requests to a real ticket API.
pub struct ReqwestTicketClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTicketClient {
    /// Construct a client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl TicketClient for ReqwestTicketClient {
    async fn create_or_update(&self, request: TicketRequest) -> Result<TicketHandle, DeliveryError> {
        let path = match &request.existing {
            Some(existing) => format!("{}/tickets/{}", self.base_url, existing.id),
            None => format!("{}/tickets", self.base_url),
        };
        let body = serde_json::json!({"subject": request.subject, "body": request.body});
        let response = self
            .client
            .post(&path)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Ticket(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DeliveryError::Ticket(format!("ticket API returned status {}", response.status())));
        }
        let parsed: serde_json::Value = response.json().await.map_err(|e| DeliveryError::Ticket(e.to_string()))?;
        let id = parsed.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Ok(TicketHandle { id, reference: request.subject })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_assigns_a_new_id_when_no_existing_ticket() {
        let client = MockTicketClient::new();
        let handle = client
            .create_or_update(TicketRequest { subject: "AS64500: add".into(), body: "...".into(), existing: None })
            .await
            .unwrap();
        assert_eq!(handle.id, "1");
    }

    #[tokio::test]
    async fn mock_preserves_id_on_update() {
        let client = MockTicketClient::new();
        let existing = TicketHandle { id: "42".into(), reference: "AS64500: modify".into() };
        let handle = client
            .create_or_update(TicketRequest { subject: "AS64500: modify".into(), body: "updated".into(), existing: Some(existing.clone()) })
            .await
            .unwrap();
        assert_eq!(handle, existing);
    }
}

//! Error types for each stage of a reconciliation run, aggregated into one
//! top-level error for callers that just want the run's outcome.

use thiserror::Error;

/// Errors fetching or pre-processing the feed itself. Any of these abort the
/// run before the Decision Engine sees a single row.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The HTTP request itself failed (DNS, connect, timeout, TLS).
    #[error("request to {url} failed: {source}")]
    Request {
        /// Feed URL.
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server responded, but not with 2xx.
    #[error("{url} returned status {status}")]
    Status {
        /// Feed URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not parse as JSON.
    #[error("feed body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Neither member nor connection carried a `vlan_list` entry anywhere in
    /// the document.
    #[error("No entries in any vlan_list")]
    NoVlanEntries,

    /// The feed document itself reported an error (vendor error field).
    #[error("feed reported an error: {0}")]
    FeedReportedError(String),

    /// Cache-only lookup found nothing for this URL.
    #[error("no cached copy available for {0}")]
    NotCached(String),
}

/// Errors applying a decision to the connection store.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The underlying store rejected the mutation.
    #[error(transparent)]
    Store(#[from] reconciler_common::RepositoryError),
    /// A domain invariant was violated while building the mutation.
    #[error(transparent)]
    Domain(#[from] reconciler_common::DomainError),
}

/// Errors delivering a notification.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Mail delivery failed.
    #[error("mail delivery failed: {0}")]
    Mail(String),
    /// Ticket delivery failed.
    #[error("ticket delivery failed: {0}")]
    Ticket(String),
}

/// Internal invariant failures that should never happen in practice.
#[derive(Debug, Error)]
pub enum InternalError {
    /// Something the engine assumed could not happen, did.
    #[error("internal error: {0}")]
    Invariant(String),
}

/// Aggregate error for a full `Importer::update` run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Fetch/sanitize/parse stage failed; the run aborted before applying anything.
    #[error(transparent)]
    Feed(#[from] FeedError),
    /// Apply stage failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),
    /// Notification delivery failed.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    /// Internal invariant failure.
    #[error(transparent)]
    Internal(#[from] InternalError),
    /// Configuration failed to load.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

//! HTTP client for the IX-F member-export feed, with a process-wide,
//! URL-keyed cache (no TTL: the cache exists so a conflicted run can re-parse
//! the exact document a human is looking at, not to avoid re-fetching).

use crate::error::FeedError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// Fetches and caches IX-F feed documents.
pub struct FeedClient {
    http: reqwest::Client,
    cache: RwLock<HashMap<String, serde_json::Value>>,
    timeout: Duration,
}

impl FeedClient {
    /// Build a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Fetch `url`, parse it as JSON, and cache the result. The cache entry
    /// is overwritten unconditionally on success (last-write-wins; there is
    /// no TTL to respect).
    pub async fn fetch(&self, url: &str) -> Result<serde_json::Value, FeedError> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| FeedError::Request { url: url.to_string(), source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status { url: url.to_string(), status: status.as_u16() });
        }

        let body = response
            .text()
            .await
            .map_err(|source| FeedError::Request { url: url.to_string(), source })?;
        let value: serde_json::Value = serde_json::from_str(&body)?;

        if let Some(message) = value.get("pdb_error").and_then(|v| v.as_str()) {
            return Err(FeedError::FeedReportedError(message.to_string()));
        }

        self.cache.write().insert(url.to_string(), value.clone());
        Ok(value)
    }

    /// Return the last successfully-fetched document for `url`, without
    /// making a network call.
    pub fn cached(&self, url: &str) -> Result<serde_json::Value, FeedError> {
        self.cache
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| FeedError::NotCached(url.to_string()))
    }
}

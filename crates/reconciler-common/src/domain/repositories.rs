//! Repositories - Persistence abstraction for aggregates
//!
//! Repository pattern:
//! - Abstracts persistence details
//! - Works with whole aggregates
//! - Supports unit of work pattern
//!
//! The in-memory implementations here are the store the engine runs against
//! in tests and in dry-run mode. A real deployment backs these traits with a
//! relational store that has actual transactional semantics; that backend is
//! out of scope here. `InMemoryConnectionStore::apply_transactional` models
//! the one guarantee the engine actually depends on (deletes observable
//! before saves) with a single write-lock scope.

use super::aggregates::*;
use super::value_objects::*;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Repository result type
pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// No record matched the request.
    #[error("not found: {0}")]
    NotFound(String),

    /// The mutation violates a store-level constraint (e.g. address uniqueness).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend failed for reasons unrelated to the request itself.
    #[error("storage error: {0}")]
    StorageError(String),
}

// === Connection Store ===

/// A single mutation to apply as part of one transactional batch.
#[derive(Debug, Clone)]
pub enum ConnectionMutation {
    /// Soft-delete an existing record.
    Delete(ConnectionId),
    /// Create a new record.
    Insert {
        /// Owning exchange LAN.
        ixlan: IxlanId,
        /// Identity key.
        identity: Identity,
        /// Proposed link speed.
        speed: u32,
        /// Proposed route-server peering flag.
        is_rs_peer: bool,
        /// Proposed operational flag.
        operational: bool,
    },
    /// Update an existing record's business fields.
    Update {
        /// Record to update.
        id: ConnectionId,
        /// New link speed.
        speed: u32,
        /// New route-server peering flag.
        is_rs_peer: bool,
        /// New operational flag.
        operational: bool,
    },
    /// Re-point an existing record at a new identity (delete+add consolidation).
    Rebind {
        /// Record to rebind.
        id: ConnectionId,
        /// New identity.
        identity: Identity,
        /// New link speed.
        speed: u32,
        /// New route-server peering flag.
        is_rs_peer: bool,
        /// New operational flag.
        operational: bool,
    },
}

/// Connection Record Repository trait
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Fetch a record by id.
    async fn get(&self, id: ConnectionId) -> RepoResult<ConnectionRecord>;

    /// Find the active record on `ixlan` matching `identity`, if any.
    async fn find_by_identity(&self, ixlan: IxlanId, identity: Identity) -> RepoResult<Option<ConnectionRecord>>;

    /// List every active record on `ixlan`, optionally restricted to `asn`.
    async fn list_active(&self, ixlan: IxlanId, asn: Option<Asn>) -> RepoResult<Vec<ConnectionRecord>>;

    /// Apply a batch of mutations as one unit. All `Delete`s are applied
    /// before any `Insert`/`Update`/`Rebind`, regardless of the order they
    /// appear in `mutations`. Returns the post-mutation record for each
    /// mutation, in input order.
    async fn apply_transactional(&self, mutations: Vec<ConnectionMutation>) -> RepoResult<Vec<ConnectionRecord>>;
}

/// In-memory connection store (for testing and for dry-run execution).
pub struct InMemoryConnectionStore {
    records: RwLock<HashMap<ConnectionId, ConnectionRecord>>,
    next_id: AtomicU64,
}

impl InMemoryConnectionStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seed the store with a pre-existing record (used by tests that model
    /// an already-populated registry).
    pub fn seed(&self, record: ConnectionRecord) {
        self.records.write().insert(record.id(), record);
    }
}

impl Default for InMemoryConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn get(&self, id: ConnectionId) -> RepoResult<ConnectionRecord> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("connection {}", id.0)))
    }

    async fn find_by_identity(&self, ixlan: IxlanId, identity: Identity) -> RepoResult<Option<ConnectionRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|r| r.ixlan_id() == ixlan && r.identity() == identity && r.is_active())
            .cloned())
    }

    async fn list_active(&self, ixlan: IxlanId, asn: Option<Asn>) -> RepoResult<Vec<ConnectionRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.ixlan_id() == ixlan && r.is_active())
            .filter(|r| asn.map(|a| r.identity().asn() == a).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn apply_transactional(&self, mutations: Vec<ConnectionMutation>) -> RepoResult<Vec<ConnectionRecord>> {
        let mut guard = self.records.write();
        let mut results = vec![None; mutations.len()];

        for (idx, m) in mutations.iter().enumerate() {
            if let ConnectionMutation::Delete(id) = m {
                let record = guard
                    .get_mut(id)
                    .ok_or_else(|| RepositoryError::NotFound(format!("connection {}", id.0)))?;
                record.soft_delete().map_err(|e| RepositoryError::Conflict(e.to_string()))?;
                results[idx] = Some(record.clone());
            }
        }

        for (idx, m) in mutations.into_iter().enumerate() {
            match m {
                ConnectionMutation::Delete(_) => {}
                ConnectionMutation::Insert { ixlan, identity, speed, is_rs_peer, operational } => {
                    let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    let record = ConnectionRecord::new(id, ixlan, identity, speed, is_rs_peer, operational);
                    guard.insert(id, record.clone());
                    results[idx] = Some(record);
                }
                ConnectionMutation::Update { id, speed, is_rs_peer, operational } => {
                    let record = guard
                        .get_mut(&id)
                        .ok_or_else(|| RepositoryError::NotFound(format!("connection {}", id.0)))?;
                    record
                        .update(speed, is_rs_peer, operational)
                        .map_err(|e| RepositoryError::Conflict(e.to_string()))?;
                    results[idx] = Some(record.clone());
                }
                ConnectionMutation::Rebind { id, identity, speed, is_rs_peer, operational } => {
                    let record = guard
                        .get_mut(&id)
                        .ok_or_else(|| RepositoryError::NotFound(format!("connection {}", id.0)))?;
                    record.rebind_identity(identity);
                    record
                        .update(speed, is_rs_peer, operational)
                        .map_err(|e| RepositoryError::Conflict(e.to_string()))?;
                    results[idx] = Some(record.clone());
                }
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every mutation produces a result")).collect())
    }
}

// === Proposal Store ===

/// Proposal Repository trait
#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Fetch the open or resolved proposal for `identity` on `ixlan`, if any.
    async fn get(&self, ixlan: IxlanId, identity: Identity) -> RepoResult<Option<Proposal>>;

    /// Insert or replace the proposal for its `(ixlan, identity)` key.
    async fn upsert(&self, proposal: Proposal) -> RepoResult<()>;

    /// List every open proposal on `ixlan`.
    async fn list_open(&self, ixlan: IxlanId) -> RepoResult<Vec<Proposal>>;

    /// List open proposals older than `max_age` with no ticket attached yet.
    async fn list_aged_without_ticket(&self, ixlan: IxlanId, max_age: Duration, now: DateTime<Utc>) -> RepoResult<Vec<Proposal>>;

    /// Remove a resolved proposal.
    async fn remove(&self, ixlan: IxlanId, identity: Identity) -> RepoResult<()>;
}

/// In-memory proposal store.
pub struct InMemoryProposalStore {
    proposals: RwLock<HashMap<(IxlanId, Identity), Proposal>>,
}

impl InMemoryProposalStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self { proposals: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryProposalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProposalStore for InMemoryProposalStore {
    async fn get(&self, ixlan: IxlanId, identity: Identity) -> RepoResult<Option<Proposal>> {
        Ok(self.proposals.read().get(&(ixlan, identity)).cloned())
    }

    async fn upsert(&self, proposal: Proposal) -> RepoResult<()> {
        self.proposals.write().insert((proposal.ixlan_id(), proposal.identity()), proposal);
        Ok(())
    }

    async fn list_open(&self, ixlan: IxlanId) -> RepoResult<Vec<Proposal>> {
        Ok(self
            .proposals
            .read()
            .values()
            .filter(|p| p.ixlan_id() == ixlan && p.is_open())
            .cloned()
            .collect())
    }

    async fn list_aged_without_ticket(&self, ixlan: IxlanId, max_age: Duration, now: DateTime<Utc>) -> RepoResult<Vec<Proposal>> {
        Ok(self
            .proposals
            .read()
            .values()
            .filter(|p| p.ixlan_id() == ixlan && p.is_open() && p.ticket().is_none() && p.age(now) >= max_age)
            .cloned()
            .collect())
    }

    async fn remove(&self, ixlan: IxlanId, identity: Identity) -> RepoResult<()> {
        self.proposals.write().remove(&(ixlan, identity));
        Ok(())
    }
}

// === Archive Store ===

/// One applied row within an import event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEntry {
    /// The connection record this entry concerns.
    pub connection_id: ConnectionId,
    /// Identity key, kept for ASN-scoped post-mortem queries.
    pub identity: Identity,
    /// Action applied.
    pub action: ReconcileAction,
    /// Human-readable reason.
    pub reason: String,
    /// Applied link speed, if applicable.
    pub speed: Option<u32>,
    /// Applied route-server flag, if applicable.
    pub is_rs_peer: Option<bool>,
    /// Record version immediately before this run, if the record pre-existed.
    pub version_before: Option<u64>,
    /// Record version immediately after this run.
    pub version_after: Option<u64>,
}

/// An append-only import event: one per successful run per IXLAN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEvent {
    /// The IXLAN this run concerned.
    pub ixlan_id: IxlanId,
    /// When the run's changes were committed.
    pub timestamp: DateTime<Utc>,
    /// Entries produced by the run. Empty if nothing changed.
    pub entries: Vec<ImportEntry>,
}

/// Archive Repository trait: append-only audit log plus a read-only
/// retrospective query.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Append an import event. A no-op if `event.entries` is empty, since an
    /// event with no observable version change carries no audit value.
    async fn append(&self, event: ImportEvent) -> RepoResult<()>;

    /// The most recent archive entries touching `asn`, newest first, capped
    /// at `limit`.
    async fn entries_for_asn(&self, asn: Asn, limit: usize) -> RepoResult<Vec<(IxlanId, DateTime<Utc>, ImportEntry)>>;
}

/// In-memory archive store.
pub struct InMemoryArchiveStore {
    events: RwLock<Vec<ImportEvent>>,
}

impl InMemoryArchiveStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self { events: RwLock::new(Vec::new()) }
    }
}

impl Default for InMemoryArchiveStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn append(&self, event: ImportEvent) -> RepoResult<()> {
        if event.entries.is_empty() {
            return Ok(());
        }
        self.events.write().push(event);
        Ok(())
    }

    async fn entries_for_asn(&self, asn: Asn, limit: usize) -> RepoResult<Vec<(IxlanId, DateTime<Utc>, ImportEntry)>> {
        let mut rows: Vec<_> = self
            .events
            .read()
            .iter()
            .flat_map(|event| {
                event
                    .entries
                    .iter()
                    .filter(|e| e.identity.asn() == asn)
                    .map(|e| (event.ixlan_id, event.timestamp, e.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(limit);
        Ok(rows)
    }
}

// === Attempt Log Store ===

/// The most recent import attempt for one IXLAN (overwritten each run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptLog {
    /// The IXLAN this attempt concerned.
    pub ixlan_id: IxlanId,
    /// When the attempt completed.
    pub timestamp: DateTime<Utc>,
    /// Whether the run completed without a fatal (feed-level) error.
    pub success: bool,
    /// The fatal error, if the run aborted.
    pub fatal_error: Option<String>,
    /// Non-fatal per-row diagnostics accumulated during the run.
    pub diagnostics: Vec<String>,
}

/// Attempt Log Repository trait.
#[async_trait]
pub trait AttemptLogStore: Send + Sync {
    /// Overwrite the latest attempt record for `log.ixlan_id`.
    async fn record(&self, log: AttemptLog) -> RepoResult<()>;

    /// Fetch the latest attempt record for `ixlan_id`, if any.
    async fn latest(&self, ixlan_id: IxlanId) -> RepoResult<Option<AttemptLog>>;
}

/// In-memory attempt log store.
pub struct InMemoryAttemptLogStore {
    logs: RwLock<HashMap<IxlanId, AttemptLog>>,
}

impl InMemoryAttemptLogStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self { logs: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryAttemptLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttemptLogStore for InMemoryAttemptLogStore {
    async fn record(&self, log: AttemptLog) -> RepoResult<()> {
        self.logs.write().insert(log.ixlan_id, log);
        Ok(())
    }

    async fn latest(&self, ixlan_id: IxlanId) -> RepoResult<Option<AttemptLog>> {
        Ok(self.logs.read().get(&ixlan_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(asn: u32, v4: &str) -> Identity {
        Identity::new(Asn::new(asn).unwrap(), Some(v4.parse().unwrap()), None).unwrap()
    }

    #[tokio::test]
    async fn connection_store_insert_and_find() {
        let store = InMemoryConnectionStore::new();
        let ixlan = IxlanId(1);
        let id = identity(64500, "198.51.100.1");

        let results = store
            .apply_transactional(vec![ConnectionMutation::Insert {
                ixlan,
                identity: id,
                speed: 1000,
                is_rs_peer: false,
                operational: true,
            }])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);

        let found = store.find_by_identity(ixlan, id).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().speed(), 1000);
    }

    #[tokio::test]
    async fn connection_store_rebind_consolidates_identity() {
        let store = InMemoryConnectionStore::new();
        let ixlan = IxlanId(1);
        let v4_only = identity(64500, "198.51.100.1");

        let results = store
            .apply_transactional(vec![ConnectionMutation::Insert {
                ixlan,
                identity: v4_only,
                speed: 1000,
                is_rs_peer: false,
                operational: true,
            }])
            .await
            .unwrap();
        let existing = results.into_iter().next().unwrap();

        let dual = Identity::new(Asn::new(64500).unwrap(), Some("198.51.100.1".parse().unwrap()), Some("2001:db8::1".parse().unwrap())).unwrap();

        let results = store
            .apply_transactional(vec![ConnectionMutation::Rebind {
                id: existing.id(),
                identity: dual,
                speed: 1000,
                is_rs_peer: false,
                operational: true,
            }])
            .await
            .unwrap();
        assert_eq!(results[0].identity(), dual);
    }

    #[tokio::test]
    async fn proposal_store_aging_scan() {
        let store = InMemoryProposalStore::new();
        let ixlan = IxlanId(1);
        let id = identity(64500, "198.51.100.1");
        let now = Utc::now();

        let old = Proposal::new(ixlan, id, ReconcileAction::Modify, "values changed: speed", None, None, now - Duration::days(30));
        store.upsert(old).await.unwrap();

        let aged = store.list_aged_without_ticket(ixlan, Duration::days(14), now).await.unwrap();
        assert_eq!(aged.len(), 1);
    }

    #[tokio::test]
    async fn archive_store_skips_empty_events() {
        let store = InMemoryArchiveStore::new();
        store.append(ImportEvent { ixlan_id: IxlanId(1), timestamp: Utc::now(), entries: vec![] }).await.unwrap();
        let rows = store.entries_for_asn(Asn::new(64500).unwrap(), 10).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn archive_store_post_mortem_scoped_by_asn() {
        let store = InMemoryArchiveStore::new();
        let id = identity(64500, "198.51.100.1");
        store
            .append(ImportEvent {
                ixlan_id: IxlanId(1),
                timestamp: Utc::now(),
                entries: vec![ImportEntry {
                    connection_id: ConnectionId(1),
                    identity: id,
                    action: ReconcileAction::Add,
                    reason: "new entry".into(),
                    speed: Some(1000),
                    is_rs_peer: Some(false),
                    version_before: None,
                    version_after: Some(1),
                }],
            })
            .await
            .unwrap();

        let rows = store.entries_for_asn(Asn::new(64500).unwrap(), 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        let other = store.entries_for_asn(Asn::new(64501).unwrap(), 10).await.unwrap();
        assert!(other.is_empty());
    }
}

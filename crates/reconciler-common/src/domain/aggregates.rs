//! Aggregates - Consistency boundaries for domain entities
//!
//! Aggregates are:
//! - Consistency boundaries
//! - Loaded and saved as a unit
//! - Referenced by ID only from outside
//! - Enforce invariants

use super::value_objects::*;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// The record is live and should be present in the feed.
    Ok,
    /// Soft-deleted; retained for audit, excluded from matching.
    Deleted,
}

/// Connection Record Aggregate Root (a "NetIXLAN" row)
///
/// # Bounded Context: Membership
///
/// # Invariants
/// - `identity` always carries at least one address (enforced by `Identity`)
/// - `version` strictly increases on every mutation
/// - once `Deleted`, further business-field mutation is rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    id: ConnectionId,
    ixlan_id: IxlanId,
    identity: Identity,
    speed: u32,
    is_rs_peer: bool,
    operational: bool,
    status: ConnectionStatus,
    version: u64,
}

impl ConnectionRecord {
    /// Create a new, active connection record at version 1.
    pub fn new(
        id: ConnectionId,
        ixlan_id: IxlanId,
        identity: Identity,
        speed: u32,
        is_rs_peer: bool,
        operational: bool,
    ) -> Self {
        Self {
            id,
            ixlan_id,
            identity,
            speed,
            is_rs_peer,
            operational,
            status: ConnectionStatus::Ok,
            version: 1,
        }
    }

    /// Record identifier.
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Owning exchange LAN.
    pub const fn ixlan_id(&self) -> IxlanId {
        self.ixlan_id
    }

    /// Identity key.
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    /// Current version.
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current status.
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// True when the record is live.
    pub fn is_active(&self) -> bool {
        matches!(self.status, ConnectionStatus::Ok)
    }

    /// Reported link speed in Mbps.
    pub const fn speed(&self) -> u32 {
        self.speed
    }

    /// Route-server peering flag.
    pub const fn is_rs_peer(&self) -> bool {
        self.is_rs_peer
    }

    /// Operational flag.
    pub const fn operational(&self) -> bool {
        self.operational
    }

    /// Whether the given business fields differ from the current record.
    pub fn differs_from(&self, speed: u32, is_rs_peer: bool, operational: bool) -> bool {
        self.speed != speed || self.is_rs_peer != is_rs_peer || self.operational != operational
    }

    /// Apply an update to the business fields (enforces invariant: no mutation after delete).
    pub fn update(
        &mut self,
        speed: u32,
        is_rs_peer: bool,
        operational: bool,
    ) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::InvariantViolation(
                "cannot update a deleted connection record".into(),
            ));
        }
        self.speed = speed;
        self.is_rs_peer = is_rs_peer;
        self.operational = operational;
        self.version += 1;
        Ok(())
    }

    /// Re-point this record at a new identity (used by delete+add consolidation,
    /// where a dual-stack add is folded into an update of a single-stack sibling).
    pub fn rebind_identity(&mut self, identity: Identity) {
        self.identity = identity;
        self.version += 1;
    }

    /// Soft-delete the record.
    pub fn soft_delete(&mut self) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::InvariantViolation(
                "connection record already deleted".into(),
            ));
        }
        self.status = ConnectionStatus::Deleted;
        self.version += 1;
        Ok(())
    }
}

/// Action a decision or proposal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// A new connection record should be created.
    Add,
    /// An existing connection record's business fields should change.
    Modify,
    /// An existing connection record should be soft-deleted.
    Delete,
    /// No change; the local state already matches the feed.
    Noop,
}

impl ReconcileAction {
    /// Ticket-facing verb for this action (delete renders as "remove").
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Delete => "remove",
            Self::Noop => "noop",
        }
    }
}

/// Lifecycle state of a `Proposal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalState {
    /// Awaiting human action or a future run that resolves it.
    Open,
    /// The ask has been satisfied by a later run or direct application.
    Resolved,
    /// Application was attempted and raised a validation error.
    Conflicted,
}

/// A ticket opened to escalate an aged, unresolved proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketHandle {
    /// Identifier returned by the ticket system.
    pub id: String,
    /// Human-readable reference (e.g. subject line key), used for the
    /// "inherit an existing ticket with the same subject" rule.
    pub reference: String,
}

/// The proposed payload carried by a `Proposal` of action `Add`/`Modify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalPayload {
    /// Proposed link speed.
    pub speed: u32,
    /// Proposed route-server peering flag.
    pub is_rs_peer: bool,
    /// Proposed operational flag.
    pub operational: bool,
    /// The raw member row the proposal was derived from, kept for audit.
    pub raw_member: serde_json::Value,
}

/// Proposal Aggregate Root (an "IXFMemberData" row)
///
/// # Bounded Context: Proposals
///
/// # Invariants
/// - `created` never changes across `refresh`
/// - a `Conflicted` or `Resolved` proposal does not transition back to `Open`
///   except via `reopen`, which is only used when a prior conflict's cause
///   disappears on a later run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    ixlan_id: IxlanId,
    identity: Identity,
    action: ReconcileAction,
    reason: String,
    payload: Option<ProposalPayload>,
    error: Option<String>,
    target_connection: Option<ConnectionId>,
    ticket: Option<TicketHandle>,
    requirement_of: Option<Identity>,
    state: ProposalState,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl Proposal {
    /// Create a new, open proposal.
    pub fn new(
        ixlan_id: IxlanId,
        identity: Identity,
        action: ReconcileAction,
        reason: impl Into<String>,
        payload: Option<ProposalPayload>,
        target_connection: Option<ConnectionId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            ixlan_id,
            identity,
            action,
            reason: reason.into(),
            payload,
            error: None,
            target_connection,
            ticket: None,
            requirement_of: None,
            state: ProposalState::Open,
            created: now,
            updated: now,
        }
    }

    /// Owning exchange LAN.
    pub const fn ixlan_id(&self) -> IxlanId {
        self.ixlan_id
    }

    /// Identity key this proposal concerns.
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    /// Proposed action.
    pub const fn action(&self) -> ReconcileAction {
        self.action
    }

    /// Current reason string.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Proposed payload, if any (absent for `Delete`/`Noop`).
    pub fn payload(&self) -> Option<&ProposalPayload> {
        self.payload.as_ref()
    }

    /// The connection record this proposal targets, if it already exists.
    pub const fn target_connection(&self) -> Option<ConnectionId> {
        self.target_connection
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> ProposalState {
        self.state
    }

    /// Attached ticket, if escalated.
    pub fn ticket(&self) -> Option<&TicketHandle> {
        self.ticket.as_ref()
    }

    /// The identity this proposal is a precondition of, if any.
    pub const fn requirement_of(&self) -> Option<Identity> {
        self.requirement_of
    }

    /// Creation timestamp (never changes across `refresh`).
    pub const fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Last-updated timestamp.
    pub const fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    /// Validation error recorded when the proposal was marked conflicted.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True while the proposal is still awaiting resolution.
    pub fn is_open(&self) -> bool {
        matches!(self.state, ProposalState::Open)
    }

    /// Age of the proposal relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created
    }

    /// Refresh an existing open proposal with a new reason/payload from a
    /// later run, preserving `created` and any attached ticket.
    pub fn refresh(&mut self, action: ReconcileAction, reason: impl Into<String>, payload: Option<ProposalPayload>, now: DateTime<Utc>) {
        self.action = action;
        self.reason = reason.into();
        self.payload = payload;
        self.updated = now;
        if matches!(self.state, ProposalState::Conflicted) {
            self.state = ProposalState::Open;
            self.error = None;
        }
    }

    /// Mark this proposal as a precondition of another identity's proposal
    /// (consolidation: a single-stack delete required by a dual-stack add).
    pub fn mark_requirement_of(&mut self, other: Identity) {
        self.requirement_of = Some(other);
    }

    /// Transition to `Resolved`.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.state = ProposalState::Resolved;
        self.updated = now;
    }

    /// Transition to `Conflicted`, recording the validation error.
    pub fn mark_conflicted(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.state = ProposalState::Conflicted;
        self.error = Some(error.into());
        self.updated = now;
    }

    /// Attach a ticket handle (aging escalation).
    pub fn attach_ticket(&mut self, ticket: TicketHandle) {
        self.ticket = Some(ticket);
    }
}

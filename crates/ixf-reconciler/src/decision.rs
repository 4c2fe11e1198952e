//! The Decision Engine: turns matched feed rows and the existing local
//! registry into a list of proposed actions, then folds delete+add pairs
//! that really describe one record moving between address families into a
//! single consolidated modify.

use crate::parser::FeedRow;
use reconciler_common::{Asn, ConnectionId, ConnectionRecord, Identity, ProposalPayload, ReconcileAction};
use std::collections::HashSet;

/// One proposed action for a single identity.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Identity this decision concerns (the feed's asserted identity for
    /// Add/Modify, the local record's identity for Delete).
    pub identity: Identity,
    /// Proposed action.
    pub action: ReconcileAction,
    /// Human-readable reason (e.g. "new entry", "values changed: speed").
    pub reason: String,
    /// Proposed payload, present for Add/Modify.
    pub payload: Option<ProposalPayload>,
    /// The existing connection record this decision targets, if any.
    pub target: Option<ConnectionId>,
    /// Set by `consolidate` when a sibling delete was folded into this
    /// decision; kept so the notifier can suppress a redundant notification
    /// for the absorbed identity.
    pub absorbs: Option<Identity>,
}

/// Compare feed rows against existing records and emit one decision per row,
/// plus one Delete decision per existing record absent from `seen`.
pub fn decide(
    rows: &[FeedRow],
    existing: &[ConnectionRecord],
    seen: &HashSet<Identity>,
    scope_asn: Option<Asn>,
) -> Vec<Decision> {
    let mut decisions = Vec::new();

    for row in rows {
        if let Some(asn) = scope_asn {
            if row.identity.asn() != asn {
                continue;
            }
        }
        let current = existing.iter().find(|r| r.identity() == row.identity);
        match current {
            None => decisions.push(Decision {
                identity: row.identity,
                action: ReconcileAction::Add,
                reason: "new entry".to_string(),
                payload: Some(ProposalPayload {
                    speed: row.speed,
                    is_rs_peer: row.is_rs_peer,
                    operational: row.operational,
                    raw_member: row.raw_member.clone(),
                }),
                target: None,
                absorbs: None,
            }),
            Some(record) if record.differs_from(row.speed, row.is_rs_peer, row.operational) => {
                decisions.push(Decision {
                    identity: row.identity,
                    action: ReconcileAction::Modify,
                    reason: format!("values changed: {}", changed_fields(record, row)),
                    payload: Some(ProposalPayload {
                        speed: row.speed,
                        is_rs_peer: row.is_rs_peer,
                        operational: row.operational,
                        raw_member: row.raw_member.clone(),
                    }),
                    target: Some(record.id()),
                    absorbs: None,
                });
            }
            Some(record) => decisions.push(Decision {
                identity: row.identity,
                action: ReconcileAction::Noop,
                reason: "values unchanged".to_string(),
                payload: None,
                target: Some(record.id()),
                absorbs: None,
            }),
        }
    }

    for record in existing {
        if record.identity().asn() != scope_asn.unwrap_or(record.identity().asn()) {
            continue;
        }
        if !seen.contains(&record.identity()) {
            decisions.push(Decision {
                identity: record.identity(),
                action: ReconcileAction::Delete,
                reason: "entry gone from remote".to_string(),
                payload: None,
                target: Some(record.id()),
                absorbs: None,
            });
        }
    }

    decisions
}

fn changed_fields(record: &ConnectionRecord, row: &FeedRow) -> String {
    let mut fields = Vec::new();
    if record.speed() != row.speed {
        fields.push("speed");
    }
    if record.is_rs_peer() != row.is_rs_peer {
        fields.push("is_rs_peer");
    }
    if record.operational() != row.operational {
        fields.push("operational");
    }
    fields.join(", ")
}

/// Fold delete+add pairs that represent one record moving between address
/// families into a single consolidated Modify.
///
/// When a dual-stack Add's v4-only or v6-only projection matches a pending
/// Delete's identity, that Delete is absorbed: the Add becomes a Modify
/// targeting the deleted record (it will be rebound, not recreated). If both
/// the v4-only and v6-only projections match pending Deletes, one survives
/// as the rebind target (the v4-only record, by convention) and the other
/// remains a genuine Delete, marked as a requirement of the new Modify so the
/// notifier does not report it twice.
pub fn consolidate(decisions: Vec<Decision>) -> Vec<Decision> {
    let mut deletes_by_identity: std::collections::HashMap<Identity, usize> = std::collections::HashMap::new();
    for (idx, d) in decisions.iter().enumerate() {
        if matches!(d.action, ReconcileAction::Delete) {
            deletes_by_identity.insert(d.identity, idx);
        }
    }

    let mut absorbed: HashSet<usize> = HashSet::new();
    let mut out = decisions.clone();

    for idx in 0..decisions.len() {
        let d = &decisions[idx];
        if !matches!(d.action, ReconcileAction::Add) || !d.identity.is_dual_stack() {
            continue;
        }
        let v4_sibling = d.identity.v4_only().and_then(|i| deletes_by_identity.get(&i)).copied();
        let v6_sibling = d.identity.v6_only().and_then(|i| deletes_by_identity.get(&i)).copied();

        match (v4_sibling, v6_sibling) {
            (Some(v4_idx), Some(v6_idx)) => {
                out[idx].action = ReconcileAction::Modify;
                out[idx].target = decisions[v4_idx].target;
                out[idx].reason = "IP addresses moved to same entry".to_string();
                out[v6_idx].absorbs = Some(d.identity);
                absorbed.insert(v4_idx);
            }
            (Some(v4_idx), None) => {
                out[idx].action = ReconcileAction::Modify;
                out[idx].target = decisions[v4_idx].target;
                out[idx].reason = "IPv6 not set".to_string();
                absorbed.insert(v4_idx);
            }
            (None, Some(v6_idx)) => {
                out[idx].action = ReconcileAction::Modify;
                out[idx].target = decisions[v6_idx].target;
                out[idx].reason = "IPv4 not set".to_string();
                absorbed.insert(v6_idx);
            }
            (None, None) => {}
        }
    }

    out.into_iter()
        .enumerate()
        .filter(|(idx, _)| !absorbed.contains(idx))
        .map(|(_, d)| d)
        .collect()
}

//! Applies consented decisions to the connection store as one transactional
//! batch, producing the archive entries for the run.

use crate::decision::Decision;
use crate::error::ApplyError;
use crate::model::Ixlan;
use reconciler_common::{ConnectionMutation, ConnectionStore, ImportEntry, ReconcileAction};
use std::collections::HashMap;

/// Apply every decision in `decisions` (already consent-checked by the
/// caller) as a single transactional batch and return the resulting archive
/// entries, in input order. Deletes are guaranteed visible to the store
/// before any insert/update/rebind, regardless of `decisions`' order.
pub async fn apply(
    store: &dyn ConnectionStore,
    ixlan: &Ixlan,
    decisions: &[Decision],
    versions_before: &HashMap<reconciler_common::ConnectionId, u64>,
    identities_before: &HashMap<reconciler_common::ConnectionId, reconciler_common::Identity>,
) -> Result<Vec<ImportEntry>, ApplyError> {
    let mutations: Vec<ConnectionMutation> = decisions
        .iter()
        .map(|d| build_mutation(ixlan, d, identities_before))
        .collect();

    let records = store.apply_transactional(mutations).await?;

    let mut entries = Vec::with_capacity(decisions.len());
    for (decision, record) in decisions.iter().zip(records.iter()) {
        entries.push(ImportEntry {
            connection_id: record.id(),
            identity: decision.identity,
            action: decision.action,
            reason: decision.reason.clone(),
            speed: decision.payload.as_ref().map(|p| p.speed),
            is_rs_peer: decision.payload.as_ref().map(|p| p.is_rs_peer),
            version_before: decision.target.and_then(|id| versions_before.get(&id).copied()),
            version_after: Some(record.version()),
        });
    }
    Ok(entries)
}

fn build_mutation(
    ixlan: &Ixlan,
    decision: &Decision,
    identities_before: &HashMap<reconciler_common::ConnectionId, reconciler_common::Identity>,
) -> ConnectionMutation {
    match decision.action {
        ReconcileAction::Add => {
            let payload = decision.payload.as_ref().expect("Add decision always carries a payload");
            ConnectionMutation::Insert {
                ixlan: ixlan.id,
                identity: decision.identity,
                speed: payload.speed,
                is_rs_peer: payload.is_rs_peer,
                operational: payload.operational,
            }
        }
        ReconcileAction::Modify => {
            let payload = decision.payload.as_ref().expect("Modify decision always carries a payload");
            let id = decision.target.expect("Modify decision always targets an existing record");
            // A Modify whose identity matches the record's current identity is a
            // plain field update (one version bump). Only a genuine consolidation
            // rebind (the record's identity is changing) warrants `Rebind`'s
            // double bump.
            if identities_before.get(&id) == Some(&decision.identity) {
                ConnectionMutation::Update { id, speed: payload.speed, is_rs_peer: payload.is_rs_peer, operational: payload.operational }
            } else {
                ConnectionMutation::Rebind {
                    id,
                    identity: decision.identity,
                    speed: payload.speed,
                    is_rs_peer: payload.is_rs_peer,
                    operational: payload.operational,
                }
            }
        }
        ReconcileAction::Delete => {
            ConnectionMutation::Delete(decision.target.expect("Delete decision always targets an existing record"))
        }
        ReconcileAction::Noop => unreachable!("Noop decisions are never applied"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_common::{Asn, Identity, InMemoryConnectionStore, IxlanId, ProposalPayload};

    fn ixlan() -> Ixlan {
        Ixlan {
            id: IxlanId(1),
            exchange_id: 1,
            feed_url: "https://example.net/ixf.json".into(),
            prefixes_v4: vec!["198.51.100.0/24".parse().unwrap()],
            prefixes_v6: vec![],
            last_error: None,
            last_error_notified_at: None,
        }
    }

    #[tokio::test]
    async fn add_decision_inserts_a_record() {
        let store = InMemoryConnectionStore::new();
        let ixlan = ixlan();
        let identity = Identity::new(Asn::new(64500).unwrap(), Some("198.51.100.1".parse().unwrap()), None).unwrap();
        let decisions = vec![Decision {
            identity,
            action: ReconcileAction::Add,
            reason: "new entry".into(),
            payload: Some(ProposalPayload { speed: 1000, is_rs_peer: false, operational: true, raw_member: serde_json::json!({}) }),
            target: None,
            absorbs: None,
        }];
        let entries = apply(&store, &ixlan, &decisions, &HashMap::new(), &HashMap::new()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version_before, None);
        assert_eq!(entries[0].version_after, Some(1));
    }

    #[tokio::test]
    async fn modify_with_unchanged_identity_is_a_plain_update() {
        let store = InMemoryConnectionStore::new();
        let ixlan = ixlan();
        let identity = Identity::new(Asn::new(64500).unwrap(), Some("198.51.100.1".parse().unwrap()), None).unwrap();

        let inserted = apply(
            &store,
            &ixlan,
            &[Decision {
                identity,
                action: ReconcileAction::Add,
                reason: "new entry".into(),
                payload: Some(ProposalPayload { speed: 1000, is_rs_peer: false, operational: true, raw_member: serde_json::json!({}) }),
                target: None,
                absorbs: None,
            }],
            &HashMap::new(),
            &HashMap::new(),
        )
        .await
        .unwrap();
        let id = inserted[0].connection_id;

        let versions_before = HashMap::from([(id, 1)]);
        let identities_before = HashMap::from([(id, identity)]);
        let entries = apply(
            &store,
            &ixlan,
            &[Decision {
                identity,
                action: ReconcileAction::Modify,
                reason: "values changed: speed".into(),
                payload: Some(ProposalPayload { speed: 2000, is_rs_peer: false, operational: true, raw_member: serde_json::json!({}) }),
                target: Some(id),
                absorbs: None,
            }],
            &versions_before,
            &identities_before,
        )
        .await
        .unwrap();

        assert_eq!(entries[0].version_before, Some(1));
        assert_eq!(entries[0].version_after, Some(2), "same-identity modify bumps the version exactly once");
        let record = store.get(id).await.unwrap();
        assert_eq!(record.identity(), identity);
    }

    #[tokio::test]
    async fn modify_with_changed_identity_is_a_consolidation_rebind() {
        let store = InMemoryConnectionStore::new();
        let ixlan = ixlan();
        let v4_only = Identity::new(Asn::new(64500).unwrap(), Some("198.51.100.1".parse().unwrap()), None).unwrap();
        let dual = Identity::new(Asn::new(64500).unwrap(), Some("198.51.100.1".parse().unwrap()), Some("2001:db8::1".parse().unwrap())).unwrap();

        let inserted = apply(
            &store,
            &ixlan,
            &[Decision {
                identity: v4_only,
                action: ReconcileAction::Add,
                reason: "new entry".into(),
                payload: Some(ProposalPayload { speed: 1000, is_rs_peer: false, operational: true, raw_member: serde_json::json!({}) }),
                target: None,
                absorbs: None,
            }],
            &HashMap::new(),
            &HashMap::new(),
        )
        .await
        .unwrap();
        let id = inserted[0].connection_id;

        let versions_before = HashMap::from([(id, 1)]);
        let identities_before = HashMap::from([(id, v4_only)]);
        let entries = apply(
            &store,
            &ixlan,
            &[Decision {
                identity: dual,
                action: ReconcileAction::Modify,
                reason: "IPv6 not set".into(),
                payload: Some(ProposalPayload { speed: 1000, is_rs_peer: false, operational: true, raw_member: serde_json::json!({}) }),
                target: Some(id),
                absorbs: None,
            }],
            &versions_before,
            &identities_before,
        )
        .await
        .unwrap();

        assert_eq!(entries[0].version_before, Some(1));
        assert_eq!(entries[0].version_after, Some(3), "rebind_identity and update each bump the version");
        let record = store.get(id).await.unwrap();
        assert_eq!(record.identity(), dual);
    }
}

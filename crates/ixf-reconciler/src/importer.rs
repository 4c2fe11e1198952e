//! Orchestrates one reconciliation run: fetch, sanitize, parse, match,
//! decide, consolidate, apply-or-propose, notify, archive.

use crate::applier;
use crate::archiver;
use crate::config::ReconcilerConfig;
use crate::decision::{self, Decision};
use crate::error::{ApplyError, ReconcileError};
use crate::feed_client::FeedClient;
use crate::identity_match::{self, ProtocolConflict};
use crate::mailer::Mailer;
use crate::model::{Exchange, Ixlan, Network};
use crate::notifier::{self, NotificationItem};
use crate::parser;
use crate::sanitizer;
use crate::ticket::TicketClient;
use chrono::{DateTime, Duration, Utc};
use reconciler_common::{
    Asn, AttemptLog, AttemptLogStore, ArchiveStore, ConnectionId, ConnectionStore, Proposal, ProposalStore,
    ReconcileAction,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a run needed injected.
pub struct Importer {
    /// Feed fetcher/cache.
    pub feed_client: Arc<FeedClient>,
    /// Connection registry.
    pub connection_store: Arc<dyn ConnectionStore>,
    /// Pending-change registry.
    pub proposal_store: Arc<dyn ProposalStore>,
    /// Append-only audit log.
    pub archive_store: Arc<dyn ArchiveStore>,
    /// Latest-attempt-per-ixlan log.
    pub attempt_log_store: Arc<dyn AttemptLogStore>,
    /// Notification delivery.
    pub mailer: Arc<dyn Mailer>,
    /// Ticket escalation.
    pub ticket_client: Arc<dyn TicketClient>,
    /// Run configuration.
    pub config: ReconcilerConfig,
}

/// Summary of one run, returned to the caller.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Number of connection records applied directly (consent granted).
    pub applied: usize,
    /// Number of proposals opened or refreshed (consent withheld, or apply failed).
    pub proposed: usize,
    /// Number of protocol-conflict notifications queued.
    pub protocol_conflicts: usize,
    /// Non-fatal diagnostics accumulated while parsing.
    pub diagnostics: Vec<String>,
}

impl Importer {
    /// Run reconciliation for `ixlan` against the given `networks`. When
    /// `save` is false, nothing is written: no store mutation, no email, no
    /// ticket, and the feed cache is left untouched by this call (it was
    /// already populated by the fetch itself, which is unavoidable - a
    /// dry run still needs to see the real document).
    pub async fn update(
        &self,
        ixlan: &mut Ixlan,
        exchange: &Exchange,
        networks: &HashMap<Asn, Network>,
        save: bool,
        only_asn: Option<Asn>,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, ReconcileError> {
        let document = match self.feed_client.fetch(&ixlan.feed_url).await {
            Ok(doc) => doc,
            Err(err) => {
                self.handle_feed_error(ixlan, exchange, &err.to_string(), save, now).await?;
                return Err(err.into());
            }
        };

        let mut document = document;
        if let Err(err) = sanitizer::sanitize(&mut document) {
            self.handle_feed_error(ixlan, exchange, &err.to_string(), save, now).await?;
            return Err(err.into());
        }

        ixlan.last_error = None;

        let mut diagnostics = Vec::new();
        let rows = parser::parse(&document, networks, ixlan, &mut diagnostics);
        let matched = identity_match::match_feed(rows, networks);

        let existing = self
            .connection_store
            .list_active(ixlan.id, only_asn)
            .await
            .map_err(ApplyError::from)?;
        let versions_before: HashMap<ConnectionId, u64> = existing.iter().map(|r| (r.id(), r.version())).collect();
        let identities_before: HashMap<ConnectionId, reconciler_common::Identity> =
            existing.iter().map(|r| (r.id(), r.identity())).collect();

        let decisions = decision::decide(&matched.decidable, &existing, &matched.seen, only_asn);
        let decisions = decision::consolidate(decisions);

        let outcome = self
            .resolve_decisions(
                ixlan,
                exchange,
                networks,
                &decisions,
                &matched.protocol_conflicts,
                &versions_before,
                &identities_before,
                save,
                now,
            )
            .await?;

        if save {
            self.attempt_log_store
                .record(AttemptLog { ixlan_id: ixlan.id, timestamp: now, success: true, fatal_error: None, diagnostics: diagnostics.clone() })
                .await
                .map_err(ApplyError::from)?;

            self.resolve_stale_proposals(ixlan, &matched.seen, only_asn, now).await?;

            notifier::escalate_aged_proposals(&self.config, self.proposal_store.as_ref(), self.ticket_client.as_ref(), ixlan.id, now)
                .await
                .map_err(ApplyError::from)?;
        }

        Ok(UpdateOutcome { diagnostics, ..outcome })
    }

    /// Record a failed attempt and, if the configured throttle window has
    /// elapsed since the last such notification for this IXLAN, email the
    /// exchange and stamp `last_error_notified_at`.
    async fn handle_feed_error(
        &self,
        ixlan: &mut Ixlan,
        exchange: &Exchange,
        message: &str,
        save: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        ixlan.last_error = Some(message.to_string());
        if !save {
            return Ok(());
        }
        self.attempt_log_store
            .record(AttemptLog { ixlan_id: ixlan.id, timestamp: now, success: false, fatal_error: Some(message.to_string()), diagnostics: vec![] })
            .await
            .map_err(ApplyError::from)?;

        let due = ixlan
            .last_error_notified_at
            .map(|last| now - last >= Duration::hours(self.config.ixf_parse_error_notification_period))
            .unwrap_or(true);
        if due {
            notifier::notify_feed_error(&self.config, self.mailer.as_ref(), exchange, &ixlan.feed_url, message)
                .await
                .map_err(ReconcileError::Delivery)?;
            ixlan.last_error_notified_at = Some(now);
        }
        Ok(())
    }

    async fn resolve_decisions(
        &self,
        ixlan: &Ixlan,
        exchange: &Exchange,
        networks: &HashMap<Asn, Network>,
        decisions: &[Decision],
        protocol_conflicts: &[ProtocolConflict],
        versions_before: &HashMap<ConnectionId, u64>,
        identities_before: &HashMap<ConnectionId, reconciler_common::Identity>,
        save: bool,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, ReconcileError> {
        let mut consented = Vec::new();
        let mut proposed_items = Vec::new();

        for decision in decisions {
            if matches!(decision.action, ReconcileAction::Noop) {
                if save {
                    self.resolve_open_proposal(ixlan, decision.identity, now).await?;
                }
                continue;
            }
            let consents = networks.get(&decision.identity.asn()).map(|n| n.allow_ixp_update).unwrap_or(false);
            if consents {
                consented.push(decision.clone());
            } else {
                proposed_items.push(decision.clone());
            }
        }

        let mut applied_entries = Vec::new();
        let mut notification_items = Vec::new();

        if save && !consented.is_empty() {
            match applier::apply(self.connection_store.as_ref(), ixlan, &consented, versions_before, identities_before).await {
                Ok(entries) => {
                    for entry in &entries {
                        self.proposal_store
                            .remove(ixlan.id, entry.identity)
                            .await
                            .map_err(ApplyError::from)?;
                    }
                    applied_entries = entries;
                }
                Err(err) => {
                    for decision in &consented {
                        let mut proposal = self.upsert_decision_proposal(ixlan, decision, now).await?;
                        proposal.mark_conflicted(err.to_string(), now);
                        self.proposal_store.upsert(proposal.clone()).await.map_err(ApplyError::from)?;
                        notification_items.push(NotificationItem { proposal, suppressed: decision.absorbs.is_some() });
                    }
                }
            }
        } else if !save {
            // Dry run: still surface what *would* be applied as notifications,
            // without touching any store.
            for decision in &consented {
                notification_items.push(NotificationItem {
                    proposal: build_proposal(ixlan, decision, now),
                    suppressed: decision.absorbs.is_some(),
                });
            }
        }

        for decision in &proposed_items {
            let proposal = if save {
                self.upsert_decision_proposal(ixlan, decision, now).await?
            } else {
                build_proposal(ixlan, decision, now)
            };
            notification_items.push(NotificationItem { proposal, suppressed: decision.absorbs.is_some() });
        }

        if save && !applied_entries.is_empty() {
            archiver::archive(self.archive_store.as_ref(), ixlan.id, now, applied_entries.clone())
                .await
                .map_err(ApplyError::from)?;
        }

        if save {
            self.notify_per_network(networks, exchange, &notification_items, protocol_conflicts).await?;
        }

        Ok(UpdateOutcome {
            applied: applied_entries.len(),
            proposed: proposed_items.len(),
            protocol_conflicts: protocol_conflicts.len(),
            diagnostics: Vec::new(),
        })
    }

    /// A `noop` decision confirms the feed now matches the local record: any
    /// open proposal for this identity is immediately resolved.
    async fn resolve_open_proposal(&self, ixlan: &Ixlan, identity: reconciler_common::Identity, now: DateTime<Utc>) -> Result<(), ReconcileError> {
        if let Some(mut proposal) = self.proposal_store.get(ixlan.id, identity).await.map_err(ApplyError::from)? {
            proposal.resolve(now);
            self.proposal_store.remove(ixlan.id, identity).await.map_err(ApplyError::from)?;
        }
        Ok(())
    }

    /// End-of-run cleanup pass over every still-open proposal on `ixlan`,
    /// resolving the two cases the per-row decision stream cannot see on its
    /// own: a `delete` proposal whose target has since been soft-deleted
    /// (consent was granted, or it was absorbed by consolidation), and an
    /// `add`/`modify` proposal whose identity has dropped out of the feed
    /// entirely (the ask is obsolete).
    async fn resolve_stale_proposals(&self, ixlan: &Ixlan, seen: &std::collections::HashSet<reconciler_common::Identity>, only_asn: Option<Asn>, now: DateTime<Utc>) -> Result<(), ReconcileError> {
        let open = self.proposal_store.list_open(ixlan.id).await.map_err(ApplyError::from)?;
        for mut proposal in open {
            if let Some(asn) = only_asn {
                if proposal.identity().asn() != asn {
                    continue;
                }
            }
            let resolved = match proposal.action() {
                ReconcileAction::Delete => match proposal.target_connection() {
                    Some(id) => match self.connection_store.get(id).await {
                        Ok(record) => !record.is_active(),
                        Err(_) => true,
                    },
                    None => false,
                },
                ReconcileAction::Add | ReconcileAction::Modify => !seen.contains(&proposal.identity()),
                ReconcileAction::Noop => true,
            };
            if resolved {
                proposal.resolve(now);
                self.proposal_store.remove(ixlan.id, proposal.identity()).await.map_err(ApplyError::from)?;
            }
        }
        Ok(())
    }

    async fn upsert_decision_proposal(&self, ixlan: &Ixlan, decision: &Decision, now: DateTime<Utc>) -> Result<Proposal, ReconcileError> {
        let existing = self
            .proposal_store
            .get(ixlan.id, decision.identity)
            .await
            .map_err(ApplyError::from)?;
        let proposal = match existing {
            Some(mut p) => {
                p.refresh(decision.action, decision.reason.clone(), decision.payload.clone(), now);
                p
            }
            None => build_proposal(ixlan, decision, now),
        };
        self.proposal_store.upsert(proposal.clone()).await.map_err(ApplyError::from)?;
        Ok(proposal)
    }

    /// Group `items` by the network each underlying proposal's identity
    /// belongs to and send one consolidated notification per network, since
    /// a single run's decisions can span more than one AS at the exchange.
    async fn notify_per_network(
        &self,
        networks: &HashMap<Asn, Network>,
        exchange: &Exchange,
        items: &[NotificationItem],
        protocol_conflicts: &[ProtocolConflict],
    ) -> Result<(), ReconcileError> {
        let mut by_asn: HashMap<Asn, Vec<NotificationItem>> = HashMap::new();
        for item in items {
            by_asn.entry(item.proposal.identity().asn()).or_default().push(item.clone());
        }
        let mut conflicts_by_asn: HashMap<Asn, Vec<ProtocolConflict>> = HashMap::new();
        for conflict in protocol_conflicts {
            conflicts_by_asn.entry(conflict.identity.asn()).or_default().push(conflict.clone());
        }

        let mut asns: std::collections::HashSet<Asn> = by_asn.keys().copied().collect();
        asns.extend(conflicts_by_asn.keys().copied());

        for asn in asns {
            let Some(network) = networks.get(&asn) else { continue };
            let empty_items = Vec::new();
            let empty_conflicts = Vec::new();
            notifier::notify_run(
                &self.config,
                self.mailer.as_ref(),
                network,
                exchange,
                by_asn.get(&asn).unwrap_or(&empty_items),
                conflicts_by_asn.get(&asn).unwrap_or(&empty_conflicts),
            )
            .await
            .map_err(ReconcileError::Delivery)?;
        }
        Ok(())
    }
}

fn build_proposal(ixlan: &Ixlan, decision: &Decision, now: DateTime<Utc>) -> Proposal {
    Proposal::new(ixlan.id, decision.identity, decision.action, decision.reason.clone(), decision.payload.clone(), decision.target, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::DebugMailer;
    use crate::ticket::MockTicketClient;
    use reconciler_common::{
        ContactEmail, Identity, InMemoryArchiveStore, InMemoryAttemptLogStore, InMemoryConnectionStore, InMemoryProposalStore, ProposalPayload,
    };

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

    fn exchange(contacts: Vec<&str>) -> Exchange {
        Exchange { id: 1, name: "Test-IX".into(), tech_contacts: contacts.into_iter().map(|c| ContactEmail::new(c).unwrap()).collect() }
    }

    fn network(asn: Asn, allow_ixp_update: bool, contacts: Vec<&str>) -> Network {
        Network {
            asn,
            ipv4_support: true,
            ipv6_support: true,
            active: true,
            allow_ixp_update,
            policy_contacts: contacts.into_iter().map(|c| ContactEmail::new(c).unwrap()).collect(),
        }
    }

    fn make_importer(config: ReconcilerConfig) -> Importer {
        Importer {
            feed_client: Arc::new(FeedClient::new(std::time::Duration::from_secs(5))),
            connection_store: Arc::new(InMemoryConnectionStore::new()),
            proposal_store: Arc::new(InMemoryProposalStore::new()),
            archive_store: Arc::new(InMemoryArchiveStore::new()),
            attempt_log_store: Arc::new(InMemoryAttemptLogStore::new()),
            mailer: Arc::new(DebugMailer::new()),
            ticket_client: Arc::new(MockTicketClient::new()),
            config,
        }
    }

    fn add_decision(identity: Identity) -> Decision {
        Decision {
            identity,
            action: ReconcileAction::Add,
            reason: "new entry".into(),
            payload: Some(ProposalPayload { speed: 10_000, is_rs_peer: false, operational: true, raw_member: serde_json::json!({}) }),
            target: None,
            absorbs: None,
        }
    }

    #[tokio::test]
    async fn consented_add_is_applied_directly_with_no_proposal() {
        let lan = ixlan();
        let ix = exchange(vec!["tech@ix.example"]);
        let asn = Asn::new(64500).unwrap();
        let networks = HashMap::from([(asn, network(asn, true, vec![]))]);
        let identity = Identity::new(asn, Some("198.51.100.5".parse().unwrap()), None).unwrap();
        let decisions = vec![add_decision(identity)];

        let importer = make_importer(ReconcilerConfig::default());
        let outcome = importer
            .resolve_decisions(&lan, &ix, &networks, &decisions, &[], &HashMap::new(), &HashMap::new(), true, Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.proposed, 0);
        let active = importer.connection_store.list_active(lan.id, None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(importer.proposal_store.get(lan.id, identity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn withheld_consent_opens_a_proposal_and_emails_both_parties() {
        let lan = ixlan();
        let ix = exchange(vec!["tech@ix.example"]);
        let asn = Asn::new(64500).unwrap();
        let networks = HashMap::from([(asn, network(asn, false, vec!["noc@example.net"]))]);
        let identity = Identity::new(asn, Some("198.51.100.5".parse().unwrap()), None).unwrap();
        let decisions = vec![add_decision(identity)];

        let mut config = ReconcilerConfig::default();
        config.ixf_notify_net_on_conflict = true;
        config.ixf_notify_ix_on_conflict = true;
        let mailer = Arc::new(DebugMailer::new());
        let importer = Importer {
            feed_client: Arc::new(FeedClient::new(std::time::Duration::from_secs(5))),
            connection_store: Arc::new(InMemoryConnectionStore::new()),
            proposal_store: Arc::new(InMemoryProposalStore::new()),
            archive_store: Arc::new(InMemoryArchiveStore::new()),
            attempt_log_store: Arc::new(InMemoryAttemptLogStore::new()),
            mailer: mailer.clone(),
            ticket_client: Arc::new(MockTicketClient::new()),
            config,
        };

        let outcome = importer
            .resolve_decisions(&lan, &ix, &networks, &decisions, &[], &HashMap::new(), &HashMap::new(), true, Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.proposed, 1);
        assert!(importer.connection_store.list_active(lan.id, None).await.unwrap().is_empty());
        assert!(importer.proposal_store.get(lan.id, identity).await.unwrap().is_some());
        assert_eq!(mailer.sent().len(), 2, "one consolidated bundle email to the network, one to the exchange");
    }

    #[tokio::test]
    async fn feed_error_notifies_once_then_throttles_until_period_elapses() {
        let mut lan = ixlan();
        let ix = exchange(vec!["tech@ix.example"]);
        let mut config = ReconcilerConfig::default();
        config.ixf_parse_error_notification_period = 24;
        let importer = make_importer(config);

        let t0 = Utc::now();
        importer.handle_feed_error(&mut lan, &ix, "boom", true, t0).await.unwrap();
        assert_eq!(lan.last_error.as_deref(), Some("boom"));
        assert_eq!(lan.last_error_notified_at, Some(t0));

        importer.handle_feed_error(&mut lan, &ix, "boom again", true, t0 + Duration::hours(1)).await.unwrap();
        assert_eq!(lan.last_error_notified_at, Some(t0), "throttled: timestamp must not move within the window");

        let t1 = t0 + Duration::hours(25);
        importer.handle_feed_error(&mut lan, &ix, "boom again", true, t1).await.unwrap();
        assert_eq!(lan.last_error_notified_at, Some(t1), "window elapsed: a fresh notification is due");
    }

    #[tokio::test]
    async fn noop_decision_resolves_an_open_proposal() {
        let lan = ixlan();
        let now = Utc::now();
        let asn = Asn::new(64500).unwrap();
        let identity = Identity::new(asn, Some("198.51.100.5".parse().unwrap()), None).unwrap();

        let importer = make_importer(ReconcilerConfig::default());
        let proposal = build_proposal(&lan, &Decision { identity, action: ReconcileAction::Modify, reason: "values changed: speed".into(), payload: None, target: None, absorbs: None }, now);
        importer.proposal_store.upsert(proposal).await.unwrap();

        importer.resolve_open_proposal(&lan, identity, now).await.unwrap();

        assert!(importer.proposal_store.get(lan.id, identity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn noop_decision_with_no_existing_proposal_is_a_no_op() {
        let lan = ixlan();
        let identity = Identity::new(Asn::new(64500).unwrap(), Some("198.51.100.5".parse().unwrap()), None).unwrap();
        let importer = make_importer(ReconcilerConfig::default());
        importer.resolve_open_proposal(&lan, identity, Utc::now()).await.unwrap();
        assert!(importer.proposal_store.get(lan.id, identity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_proposals_resolves_delete_whose_target_is_already_soft_deleted() {
        let lan = ixlan();
        let now = Utc::now();
        let asn = Asn::new(64500).unwrap();
        let identity = Identity::new(asn, Some("198.51.100.5".parse().unwrap()), None).unwrap();
        let importer = make_importer(ReconcilerConfig::default());

        let inserted = importer
            .connection_store
            .apply_transactional(vec![reconciler_common::ConnectionMutation::Insert {
                ixlan: lan.id,
                identity,
                speed: 1000,
                is_rs_peer: false,
                operational: true,
            }])
            .await
            .unwrap();
        let id = inserted[0].id();
        importer.connection_store.apply_transactional(vec![reconciler_common::ConnectionMutation::Delete(id)]).await.unwrap();

        let proposal = Proposal::new(lan.id, identity, ReconcileAction::Delete, "entry gone from remote".into(), None, Some(id), now);
        importer.proposal_store.upsert(proposal).await.unwrap();

        importer.resolve_stale_proposals(&lan, &std::collections::HashSet::new(), None, now).await.unwrap();

        assert!(importer.proposal_store.get(lan.id, identity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_proposals_leaves_delete_open_while_target_is_still_active() {
        let lan = ixlan();
        let now = Utc::now();
        let asn = Asn::new(64500).unwrap();
        let identity = Identity::new(asn, Some("198.51.100.5".parse().unwrap()), None).unwrap();
        let importer = make_importer(ReconcilerConfig::default());

        let inserted = importer
            .connection_store
            .apply_transactional(vec![reconciler_common::ConnectionMutation::Insert {
                ixlan: lan.id,
                identity,
                speed: 1000,
                is_rs_peer: false,
                operational: true,
            }])
            .await
            .unwrap();
        let id = inserted[0].id();

        let proposal = Proposal::new(lan.id, identity, ReconcileAction::Delete, "entry gone from remote".into(), None, Some(id), now);
        importer.proposal_store.upsert(proposal).await.unwrap();

        importer.resolve_stale_proposals(&lan, &std::collections::HashSet::new(), None, now).await.unwrap();

        assert!(importer.proposal_store.get(lan.id, identity).await.unwrap().is_some(), "target is still active: the ask stands");
    }

    #[tokio::test]
    async fn stale_proposals_resolves_add_whose_identity_dropped_out_of_the_feed() {
        let lan = ixlan();
        let now = Utc::now();
        let asn = Asn::new(64500).unwrap();
        let identity = Identity::new(asn, Some("198.51.100.5".parse().unwrap()), None).unwrap();
        let importer = make_importer(ReconcilerConfig::default());

        let proposal = build_proposal(&lan, &add_decision(identity), now);
        importer.proposal_store.upsert(proposal).await.unwrap();

        importer.resolve_stale_proposals(&lan, &std::collections::HashSet::new(), None, now).await.unwrap();

        assert!(importer.proposal_store.get(lan.id, identity).await.unwrap().is_none(), "identity is absent from seen: the ask is obsolete");
    }

    #[tokio::test]
    async fn stale_proposals_leaves_add_open_while_identity_is_still_in_the_feed() {
        let lan = ixlan();
        let now = Utc::now();
        let asn = Asn::new(64500).unwrap();
        let identity = Identity::new(asn, Some("198.51.100.5".parse().unwrap()), None).unwrap();
        let importer = make_importer(ReconcilerConfig::default());

        let proposal = build_proposal(&lan, &add_decision(identity), now);
        importer.proposal_store.upsert(proposal).await.unwrap();

        importer.resolve_stale_proposals(&lan, &std::collections::HashSet::from([identity]), None, now).await.unwrap();

        assert!(importer.proposal_store.get(lan.id, identity).await.unwrap().is_some());
    }
}

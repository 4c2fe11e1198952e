//! Turns decisions and protocol conflicts into consolidated, rendered
//! notifications, and runs the proposal aging scan that escalates stale
//! proposals to tickets.

use crate::config::ReconcilerConfig;
use crate::error::DeliveryError;
use crate::identity_match::ProtocolConflict;
use crate::mailer::{MailMessage, Mailer};
use crate::model::{Exchange, Network};
use crate::ticket::{TicketClient, TicketRequest};
use chrono::{DateTime, Duration, Utc};
use reconciler_common::{ContactEmail, Proposal, ProposalStore, ReconcileAction, TicketHandle};

/// One notification-worthy event, prior to consolidation.
#[derive(Debug, Clone)]
pub struct NotificationItem {
    /// The underlying proposal (already upserted by the caller).
    pub proposal: Proposal,
    /// True if this item is a precondition of another and should not be
    /// reported on its own.
    pub suppressed: bool,
}

/// All email/ticket activity consolidated for one network at one exchange.
#[derive(Debug, Default)]
struct Bundle {
    adds: Vec<Proposal>,
    modifies: Vec<Proposal>,
    deletes: Vec<Proposal>,
    conflicts: Vec<Proposal>,
}

/// Send one consolidated notification per network for this run's proposals,
/// honoring the `notify_net`/`notify_ix` config gates, and queue a protocol
/// conflict notification for each conflict found during matching.
#[allow(clippy::too_many_arguments)]
pub async fn notify_run(
    config: &ReconcilerConfig,
    mailer: &dyn Mailer,
    network: &Network,
    exchange: &Exchange,
    items: &[NotificationItem],
    protocol_conflicts: &[ProtocolConflict],
) -> Result<(), DeliveryError> {
    let mut bundle = Bundle::default();
    for item in items {
        if item.suppressed {
            continue;
        }
        match item.proposal.state() {
            reconciler_common::ProposalState::Conflicted => bundle.conflicts.push(item.proposal.clone()),
            _ => match item.proposal.action() {
                ReconcileAction::Add => bundle.adds.push(item.proposal.clone()),
                ReconcileAction::Modify => bundle.modifies.push(item.proposal.clone()),
                ReconcileAction::Delete => bundle.deletes.push(item.proposal.clone()),
                ReconcileAction::Noop => {}
            },
        }
    }

    if !bundle.adds.is_empty() || !bundle.modifies.is_empty() || !bundle.deletes.is_empty() {
        let subject = format!("{}AS{}: proposed changes at {}", config.email_subject_prefix, network.asn.value(), exchange.name);
        let body = render_proposal_bundle(&bundle, exchange);
        dispatch(config, mailer, network, exchange, &subject, &body).await?;
    }

    for conflict in &bundle.conflicts {
        let subject = format!(
            "{}AS{}: {} conflict at {}",
            config.email_subject_prefix,
            network.asn.value(),
            conflict.action().verb(),
            exchange.name
        );
        let body = format!(
            "Identity: {}\nAction: {}\nError: {}\n",
            conflict.identity(),
            conflict.action().verb(),
            conflict.error().unwrap_or("unknown"),
        );
        if config.ixf_notify_net_on_conflict || config.ixf_notify_ix_on_conflict {
            dispatch(config, mailer, network, exchange, &subject, &body).await?;
        }
    }

    for conflict in protocol_conflicts {
        let family = match (conflict.denied_v4, conflict.denied_v6) {
            (true, true) => "IPv4 and IPv6",
            (true, false) => "IPv4",
            (false, true) => "IPv6",
            (false, false) => continue,
        };
        let subject = format!("{}AS{}: protocol not supported at {}", config.email_subject_prefix, conflict.identity.asn().value(), exchange.name);
        let body = format!("The feed proposed {} for identity {}, but the network does not support it.\n", family, conflict.identity);
        dispatch(config, mailer, network, exchange, &subject, &body).await?;
    }

    Ok(())
}

fn render_proposal_bundle(bundle: &Bundle, exchange: &Exchange) -> String {
    let mut body = format!("Proposed changes at {}:\n\n", exchange.name);
    for p in &bundle.adds {
        body.push_str(&format!("ADD    {} - {}\n", p.identity(), p.reason()));
    }
    for p in &bundle.modifies {
        body.push_str(&format!("MODIFY {} - {}\n", p.identity(), p.reason()));
    }
    for p in &bundle.deletes {
        body.push_str(&format!("REMOVE {} - {}\n", p.identity(), p.reason()));
    }
    body
}

async fn dispatch(
    config: &ReconcilerConfig,
    mailer: &dyn Mailer,
    network: &Network,
    exchange: &Exchange,
    subject: &str,
    body: &str,
) -> Result<(), DeliveryError> {
    let mut sent_any = false;
    if config.ixf_notify_net_on_conflict && !network.policy_contacts.is_empty() {
        sent_any = true;
        mailer
            .send(MailMessage { to: network.policy_contacts.clone(), subject: subject.to_string(), body: body.to_string() })
            .await?;
    }
    if config.ixf_notify_ix_on_conflict && !exchange.tech_contacts.is_empty() {
        sent_any = true;
        mailer
            .send(MailMessage { to: exchange.tech_contacts.clone(), subject: subject.to_string(), body: body.to_string() })
            .await?;
    }
    let _ = sent_any;
    Ok(())
}

/// Notify the exchange's technical contacts of a feed-level error (fetch or
/// sanitize failure). Throttling against `last_error_notified_at` is the
/// caller's responsibility; this always sends.
pub async fn notify_feed_error(
    config: &ReconcilerConfig,
    mailer: &dyn Mailer,
    exchange: &Exchange,
    feed_url: &str,
    message: &str,
) -> Result<(), DeliveryError> {
    if exchange.tech_contacts.is_empty() {
        return Ok(());
    }
    let subject = format!("{}{}: feed error", config.email_subject_prefix, exchange.name);
    let body = format!("Fetching {feed_url} failed:\n{message}\n");
    mailer
        .send(MailMessage { to: exchange.tech_contacts.clone(), subject, body })
        .await
}

/// Pick whichever contact list is non-empty, preferring the network's.
/// Returns `None` if both are empty, meaning the caller should escalate to a
/// ticket instead of emailing nobody.
pub fn resolve_contacts<'a>(network: &'a Network, exchange: &'a Exchange) -> Option<&'a [ContactEmail]> {
    if !network.policy_contacts.is_empty() {
        Some(&network.policy_contacts)
    } else if !exchange.tech_contacts.is_empty() {
        Some(&exchange.tech_contacts)
    } else {
        None
    }
}

/// Scan for open proposals older than the configured ticket threshold and
/// escalate each to a ticket. A failed ticket attempt does not abort the
/// scan: the proposal's reason is prefixed with `[FAILED]` and the error
/// text appended, and the scan continues.
pub async fn escalate_aged_proposals(
    config: &ReconcilerConfig,
    proposal_store: &dyn ProposalStore,
    ticket_client: &dyn TicketClient,
    ixlan: reconciler_common::IxlanId,
    now: DateTime<Utc>,
) -> Result<usize, reconciler_common::RepositoryError> {
    if config.ixf_importer_days_until_ticket <= 0 {
        return Ok(0);
    }
    let max_age = Duration::days(config.ixf_importer_days_until_ticket);
    let aged = proposal_store.list_aged_without_ticket(ixlan, max_age, now).await?;

    let mut escalated = 0;
    for mut proposal in aged {
        let subject = format!("AS{}: {} ({})", proposal.identity().asn().value(), proposal.action().verb(), proposal.reason());
        let request = TicketRequest { subject: subject.clone(), body: proposal.reason().to_string(), existing: None };
        match ticket_client.create_or_update(request).await {
            Ok(handle) => {
                proposal.attach_ticket(handle);
                escalated += 1;
            }
            Err(err) => {
                proposal.attach_ticket(TicketHandle { id: String::new(), reference: format!("[FAILED] {subject}: {err}") });
            }
        }
        proposal_store.upsert(proposal).await?;
    }
    Ok(escalated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_common::{Asn, Identity, InMemoryProposalStore, IxlanId};

    fn network(contacts: Vec<&str>) -> Network {
        Network {
            asn: Asn::new(64500).unwrap(),
            ipv4_support: true,
            ipv6_support: true,
            active: true,
            allow_ixp_update: true,
            policy_contacts: contacts.into_iter().map(|c| ContactEmail::new(c).unwrap()).collect(),
        }
    }

    fn exchange(contacts: Vec<&str>) -> Exchange {
        Exchange { id: 1, name: "Test-IX".into(), tech_contacts: contacts.into_iter().map(|c| ContactEmail::new(c).unwrap()).collect() }
    }

    #[tokio::test]
    async fn feed_error_emails_exchange_contacts_only() {
        use crate::mailer::DebugMailer;

        let mailer = DebugMailer::new();
        let ix = exchange(vec!["tech@ix.example"]);
        notify_feed_error(&ReconcilerConfig::default(), &mailer, &ix, "https://example.net/ixf.json", "status 503").await.unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, ix.tech_contacts);

        let quiet_mailer = DebugMailer::new();
        let silent_ix = exchange(vec![]);
        notify_feed_error(&ReconcilerConfig::default(), &quiet_mailer, &silent_ix, "https://example.net/ixf.json", "status 503")
            .await
            .unwrap();
        assert!(quiet_mailer.sent().is_empty());
    }

    #[test]
    fn resolve_contacts_prefers_network_then_exchange_then_none() {
        let net = network(vec!["noc@example.net"]);
        let ix = exchange(vec!["tech@ix.example"]);
        assert!(resolve_contacts(&net, &ix).is_some());

        let empty_net = network(vec![]);
        assert_eq!(resolve_contacts(&empty_net, &ix).unwrap().len(), 1);

        let empty_ix = exchange(vec![]);
        assert!(resolve_contacts(&empty_net, &empty_ix).is_none());
    }

    #[tokio::test]
    async fn aging_scan_escalates_and_disabled_threshold_skips() {
        let store = InMemoryProposalStore::new();
        let ixlan = IxlanId(1);
        let identity = Identity::new(Asn::new(64500).unwrap(), Some("198.51.100.1".parse().unwrap()), None).unwrap();
        let now = Utc::now();
        let old = Proposal::new(ixlan, identity, ReconcileAction::Modify, "values changed: speed", None, None, now - Duration::days(30));
        store.upsert(old).await.unwrap();

        let mut cfg = ReconcilerConfig::default();
        cfg.ixf_importer_days_until_ticket = 14;
        let ticket_client = crate::ticket::MockTicketClient::new();

        let count = escalate_aged_proposals(&cfg, &store, &ticket_client, ixlan, now).await.unwrap();
        assert_eq!(count, 1);

        cfg.ixf_importer_days_until_ticket = 0;
        let store2 = InMemoryProposalStore::new();
        let count2 = escalate_aged_proposals(&cfg, &store2, &ticket_client, ixlan, now).await.unwrap();
        assert_eq!(count2, 0);
    }
}

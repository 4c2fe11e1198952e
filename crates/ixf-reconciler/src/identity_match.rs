//! Builds the feed's seen-set and separates out rows whose address family
//! the owning network does not support.

use crate::model::Network;
use crate::parser::FeedRow;
use reconciler_common::{Asn, Identity};
use std::collections::{HashMap, HashSet};

/// A feed row whose family the network denies. Queued as its own
/// notification; never reaches the Decision Engine.
#[derive(Debug, Clone)]
pub struct ProtocolConflict {
    /// The identity the feed proposed.
    pub identity: Identity,
    /// True if the v4 component was present but unsupported.
    pub denied_v4: bool,
    /// True if the v6 component was present but unsupported.
    pub denied_v6: bool,
}

/// Result of matching parsed rows against network protocol support.
pub struct MatchOutcome {
    /// Every identity the feed still asserts (including aux keys inserted to
    /// protect single-protocol local records from a protocol conflict).
    pub seen: HashSet<Identity>,
    /// Rows eligible for the Decision Engine.
    pub decidable: Vec<FeedRow>,
    /// Rows that hit a protocol conflict.
    pub protocol_conflicts: Vec<ProtocolConflict>,
}

/// Split `rows` into decidable rows and protocol conflicts, and build the
/// seen-set used by the deletion pass.
pub fn match_feed(rows: Vec<FeedRow>, networks: &HashMap<Asn, Network>) -> MatchOutcome {
    let mut seen = HashSet::new();
    let mut decidable = Vec::new();
    let mut protocol_conflicts = Vec::new();

    for row in rows {
        let identity = row.identity;
        let network = networks.get(&identity.asn());

        let denied_v4 = identity.v4().is_some() && network.map(|n| !n.ipv4_support).unwrap_or(false);
        let denied_v6 = identity.v6().is_some() && network.map(|n| !n.ipv6_support).unwrap_or(false);

        seen.insert(identity);

        if denied_v4 || denied_v6 {
            if let Some(aux) = identity.v4_only() {
                seen.insert(aux);
            }
            if let Some(aux) = identity.v6_only() {
                seen.insert(aux);
            }
            protocol_conflicts.push(ProtocolConflict { identity, denied_v4, denied_v6 });
            continue;
        }

        decidable.push(row);
    }

    MatchOutcome { seen, decidable, protocol_conflicts }
}

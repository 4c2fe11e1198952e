//! Static inputs to a reconciliation run: networks, exchanges, and exchange LANs.
//!
//! These are plain, store-agnostic descriptions of the entities a run needs
//! to read; how they are persisted is someone else's problem (out of scope,
//! per the reconciler's design).

use chrono::{DateTime, Utc};
use ipnetwork::{Ipv4Network, Ipv6Network};
use reconciler_common::{Asn, ContactEmail, IxlanId};
use std::net::{Ipv4Addr, Ipv6Addr};

/// A network (AS) that may be present at an exchange.
#[derive(Debug, Clone)]
pub struct Network {
    /// The network's ASN.
    pub asn: Asn,
    /// Whether the network supports IPv4 peering at all.
    pub ipv4_support: bool,
    /// Whether the network supports IPv6 peering at all.
    pub ipv6_support: bool,
    /// Whether the network is active in the registry (inactive networks are
    /// skipped entirely during parsing).
    pub active: bool,
    /// Consent: IX-published changes may be applied automatically.
    pub allow_ixp_update: bool,
    /// Contacts used for proposal/conflict notifications.
    pub policy_contacts: Vec<ContactEmail>,
}

/// An exchange (the entity an `Ixlan` belongs to).
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Exchange identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Technical contacts used for proposal/conflict notifications.
    pub tech_contacts: Vec<ContactEmail>,
}

/// An exchange LAN: the feed-bearing unit a reconciliation run targets.
#[derive(Debug, Clone)]
pub struct Ixlan {
    /// Identifier.
    pub id: IxlanId,
    /// Owning exchange.
    pub exchange_id: u64,
    /// IX-F member-export feed URL.
    pub feed_url: String,
    /// Active IPv4 prefixes; a connection's address must lie within one of these.
    pub prefixes_v4: Vec<Ipv4Network>,
    /// Active IPv6 prefixes.
    pub prefixes_v6: Vec<Ipv6Network>,
    /// Last feed-level error, if the previous run aborted.
    pub last_error: Option<String>,
    /// When the exchange/AC were last notified of a feed-level error
    /// (throttling window for repeat notifications).
    pub last_error_notified_at: Option<DateTime<Utc>>,
}

impl Ixlan {
    /// Whether `addr` lies within one of this IXLAN's active IPv4 prefixes.
    pub fn v4_in_prefix(&self, addr: Ipv4Addr) -> bool {
        self.prefixes_v4.iter().any(|p| p.contains(addr))
    }

    /// Whether `addr` lies within one of this IXLAN's active IPv6 prefixes.
    pub fn v6_in_prefix(&self, addr: Ipv6Addr) -> bool {
        self.prefixes_v6.iter().any(|p| p.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_containment() {
        let ixlan = Ixlan {
            id: IxlanId(1),
            exchange_id: 1,
            feed_url: "https://example.net/ixf.json".into(),
            prefixes_v4: vec!["198.51.100.0/24".parse().unwrap()],
            prefixes_v6: vec!["2001:db8::/32".parse().unwrap()],
            last_error: None,
            last_error_notified_at: None,
        };
        assert!(ixlan.v4_in_prefix("198.51.100.5".parse().unwrap()));
        assert!(!ixlan.v4_in_prefix("203.0.113.5".parse().unwrap()));
        assert!(ixlan.v6_in_prefix("2001:db8::1".parse().unwrap()));
    }
}

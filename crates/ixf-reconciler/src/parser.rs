//! Walks a sanitized IX-F document into candidate connection rows.

use crate::model::{Ixlan, Network};
use reconciler_common::{Asn, Identity};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Member types the parser treats as peering candidates. Anything else
/// (route servers, non-peering infrastructure) is skipped.
const ACCEPTED_MEMBER_TYPES: &[&str] = &["peering", "ixp", "routeserver", "probono", ""];

/// Connection states the parser treats as meaningful. `inactive` is kept but
/// marked non-operational; anything else is dropped.
const ACCEPTED_CONNECTION_STATES: &[&str] = &["active", "inactive", "connected", "operational", ""];

/// One candidate row extracted from the feed, ready for identity matching.
#[derive(Debug, Clone)]
pub struct FeedRow {
    /// Identity key this row describes.
    pub identity: Identity,
    /// Summed interface speed across the connection's `if_list`.
    pub speed: u32,
    /// True if either address entry in the VLAN sets `routeserver: true`.
    pub is_rs_peer: bool,
    /// False only when the connection's state is `inactive`.
    pub operational: bool,
    /// The raw `member_list[]` entry this row was derived from, kept for
    /// proposal payload and archive purposes.
    pub raw_member: serde_json::Value,
}

/// Parse `document` into candidate rows, applying every filter/skip rule.
/// Diagnostics for skipped/malformed rows are appended to `diagnostics`.
pub fn parse(
    document: &serde_json::Value,
    networks: &std::collections::HashMap<Asn, Network>,
    ixlan: &Ixlan,
    diagnostics: &mut Vec<String>,
) -> Vec<FeedRow> {
    let mut rows = Vec::new();

    let Some(members) = document.get("member_list").and_then(|v| v.as_array()) else {
        return rows;
    };

    for member in members {
        let Some(asnum) = member.get("asnum").and_then(|v| v.as_u64()) else {
            diagnostics.push("member entry missing asnum, skipped".to_string());
            continue;
        };
        let Ok(asn) = Asn::new(asnum as u32) else {
            diagnostics.push(format!("member asnum {asnum} is not a valid ASN, skipped"));
            continue;
        };

        let member_type = member.get("member_type").and_then(|v| v.as_str()).unwrap_or("").to_lowercase();
        if !ACCEPTED_MEMBER_TYPES.contains(&member_type.as_str()) {
            diagnostics.push(format!("AS{asnum}: member_type '{member_type}' skipped"));
            continue;
        }

        let Some(network) = networks.get(&asn) else {
            diagnostics.push(format!("AS{asnum}: not found in local registry, skipped"));
            continue;
        };
        if !network.active {
            diagnostics.push(format!("AS{asnum}: network is not active, skipped"));
            continue;
        }

        let Some(connections) = member.get("connection_list").and_then(|v| v.as_array()) else {
            continue;
        };

        for connection in connections {
            let state = connection.get("state").and_then(|v| v.as_str()).unwrap_or("");
            if !ACCEPTED_CONNECTION_STATES.contains(&state) {
                diagnostics.push(format!("AS{asnum}: connection state '{state}' skipped"));
                continue;
            }
            let operational = state != "inactive";

            let speed = sum_interface_speed(connection, asnum, diagnostics);

            let Some(vlans) = connection.get("vlan_list").and_then(|v| v.as_array()) else {
                continue;
            };

            for vlan in vlans {
                let v4 = parse_vlan_v4(vlan, asnum, diagnostics);
                let v6 = parse_vlan_v6(vlan, asnum, diagnostics);
                let (mut v4, mut v6) = match (v4, v6) {
                    (None, None) => {
                        diagnostics.push(format!("AS{asnum}: vlan entry has neither address, skipped"));
                        continue;
                    }
                    other => other,
                };

                if let Some(addr) = v4 {
                    if !ixlan.v4_in_prefix(addr) {
                        diagnostics.push(format!("AS{asnum}: {addr} not within any active IPv4 prefix, dropped"));
                        v4 = None;
                    }
                }
                if let Some(addr) = v6 {
                    if !ixlan.v6_in_prefix(addr) {
                        diagnostics.push(format!("AS{asnum}: {addr} not within any active IPv6 prefix, dropped"));
                        v6 = None;
                    }
                }
                if v4.is_none() && v6.is_none() {
                    diagnostics.push(format!("AS{asnum}: vlan entry has no address within an active prefix, skipped"));
                    continue;
                }

                let Ok(identity) = Identity::new(asn, v4, v6) else {
                    continue;
                };

                let is_rs_peer = vlan
                    .get("ipv4")
                    .and_then(|v| v.get("routeserver"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
                    || vlan
                        .get("ipv6")
                        .and_then(|v| v.get("routeserver"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);

                rows.push(FeedRow { identity, speed, is_rs_peer, operational, raw_member: member.clone() });
            }
        }
    }

    rows
}

fn sum_interface_speed(connection: &serde_json::Value, asnum: u64, diagnostics: &mut Vec<String>) -> u32 {
    let Some(interfaces) = connection.get("if_list").and_then(|v| v.as_array()) else {
        return 0;
    };
    let mut total: u32 = 0;
    for iface in interfaces {
        match iface.get("if_speed").and_then(|v| v.as_u64()) {
            Some(speed) => total = total.saturating_add(speed as u32),
            None => diagnostics.push(format!("AS{asnum}: if_list entry has non-integer if_speed, treated as 0")),
        }
    }
    total
}

fn parse_vlan_v4(vlan: &serde_json::Value, asnum: u64, diagnostics: &mut Vec<String>) -> Option<Ipv4Addr> {
    let raw = vlan.get("ipv4")?.get("address")?.as_str()?;
    raw.parse::<Ipv4Addr>()
        .map_err(|_| diagnostics.push(format!("AS{asnum}: invalid ipv4 address '{raw}', skipped")))
        .ok()
}

fn parse_vlan_v6(vlan: &serde_json::Value, asnum: u64, diagnostics: &mut Vec<String>) -> Option<Ipv6Addr> {
    let raw = vlan.get("ipv6")?.get("address")?.as_str()?;
    raw.parse::<Ipv6Addr>()
        .map_err(|_| diagnostics.push(format!("AS{asnum}: invalid ipv6 address '{raw}', skipped")))
        .ok()
}

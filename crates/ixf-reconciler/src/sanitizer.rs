//! Pre-parse cleanup of the raw IX-F document.
//!
//! A number of exchanges publish a vendor quirk where a member's connection
//! carries two `vlan_list` entries for what is really one dual-stack VLAN:
//! one entry with only `ipv4`, a second with only `ipv6`. We fold these pairs
//! into a single entry so the parser sees one dual-stack row, matching what
//! a hand-reconciled registry entry would look like.

use crate::error::FeedError;
use serde_json::Value;

/// Sanitize `document` in place. Returns an error if the document contains
/// no `vlan_list` entries anywhere (the feed is structurally empty).
pub fn sanitize(document: &mut Value) -> Result<(), FeedError> {
    let mut saw_any_vlan_entry = false;

    let members = document
        .get_mut("member_list")
        .and_then(Value::as_array_mut)
        .map(std::mem::take)
        .unwrap_or_default();

    let mut rebuilt_members = Vec::with_capacity(members.len());
    for mut member in members {
        if let Some(connections) = member.get_mut("connection_list").and_then(Value::as_array_mut) {
            for connection in connections.iter_mut() {
                if let Some(vlans) = connection.get_mut("vlan_list").and_then(Value::as_array_mut) {
                    if !vlans.is_empty() {
                        saw_any_vlan_entry = true;
                    }
                    let merged = merge_single_family_pairs(std::mem::take(vlans));
                    *vlans = merged;
                }
            }
        }
        rebuilt_members.push(member);
    }

    if let Some(slot) = document.get_mut("member_list") {
        *slot = Value::Array(rebuilt_members);
    }

    if !saw_any_vlan_entry {
        return Err(FeedError::NoVlanEntries);
    }
    Ok(())
}

/// Fold a `vlan_list` array so that a v4-only entry and a v6-only entry
/// (matched by position: the first v4-only entry pairs with the first
/// v6-only entry) become one dual-stack entry.
fn merge_single_family_pairs(vlans: Vec<Value>) -> Vec<Value> {
    if vlans.len() != 2 {
        return vlans;
    }

    let mut v4_only_idx: Option<usize> = None;
    let mut v6_only_idx: Option<usize> = None;
    for (idx, vlan) in vlans.iter().enumerate() {
        let has_v4 = vlan.get("ipv4").map(|v| !v.is_null()).unwrap_or(false);
        let has_v6 = vlan.get("ipv6").map(|v| !v.is_null()).unwrap_or(false);
        if has_v4 && !has_v6 && v4_only_idx.is_none() {
            v4_only_idx = Some(idx);
        } else if has_v6 && !has_v4 && v6_only_idx.is_none() {
            v6_only_idx = Some(idx);
        }
    }

    let (Some(v4_idx), Some(v6_idx)) = (v4_only_idx, v6_only_idx) else {
        return vlans;
    };
    if v4_idx == v6_idx {
        return vlans;
    }

    let mut vlans = vlans;
    let v6_value = vlans[v6_idx].get("ipv6").cloned();
    if let Some(v6_value) = v6_value {
        if let Some(obj) = vlans[v4_idx].as_object_mut() {
            obj.insert("ipv6".to_string(), v6_value);
        }
    }
    let drop_idx = if v4_idx < v6_idx { v6_idx } else { v6_idx };
    let mut out = Vec::with_capacity(vlans.len() - 1);
    for (idx, vlan) in vlans.drain(..).enumerate() {
        if idx != drop_idx {
            out.push(vlan);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_vendor_split_vlan_pair() {
        let mut doc = json!({
            "member_list": [{
                "asnum": 64500,
                "connection_list": [{
                    "vlan_list": [
                        {"ipv4": {"address": "198.51.100.1"}},
                        {"ipv6": {"address": "2001:db8::1"}},
                    ]
                }]
            }]
        });
        sanitize(&mut doc).unwrap();
        let vlans = doc["member_list"][0]["connection_list"][0]["vlan_list"].as_array().unwrap();
        assert_eq!(vlans.len(), 1);
        assert!(vlans[0]["ipv4"]["address"] == "198.51.100.1");
        assert!(vlans[0]["ipv6"]["address"] == "2001:db8::1");
    }

    #[test]
    fn empty_feed_is_rejected() {
        let mut doc = json!({"member_list": []});
        assert!(matches!(sanitize(&mut doc), Err(FeedError::NoVlanEntries)));
    }

    #[test]
    fn three_single_family_entries_are_left_unmerged() {
        let mut doc = json!({
            "member_list": [{
                "connection_list": [{
                    "vlan_list": [
                        {"ipv4": {"address": "198.51.100.1"}},
                        {"ipv6": {"address": "2001:db8::1"}},
                        {"ipv4": {"address": "198.51.100.2"}},
                    ]
                }]
            }]
        });
        sanitize(&mut doc).unwrap();
        let vlans = doc["member_list"][0]["connection_list"][0]["vlan_list"].as_array().unwrap();
        assert_eq!(vlans.len(), 3);
    }

    #[test]
    fn already_dual_stack_entry_is_untouched() {
        let mut doc = json!({
            "member_list": [{
                "connection_list": [{
                    "vlan_list": [{"ipv4": {"address": "198.51.100.1"}, "ipv6": {"address": "2001:db8::1"}}]
                }]
            }]
        });
        sanitize(&mut doc).unwrap();
        let vlans = doc["member_list"][0]["connection_list"][0]["vlan_list"].as_array().unwrap();
        assert_eq!(vlans.len(), 1);
    }
}

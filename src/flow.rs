// SPDX-License-Identifier: Apache-2.0

//! Flow-group lock discipline.
//!
//! Pass-transistor arrays (muxes, shift registers, barrel shifters) admit
//! signal paths in both directions; without user hints the graph searches
//! would loop through them forever. A fet may belong to named flow groups,
//! each attributed to one of its terminals. While a search traverses a
//! member fet it holds a lock on each of its groups; entries from the
//! opposite side are refused until the matching unlock.
//!
//! Every recursive search that crosses a fet with a non-empty flow list must
//! bracket the crossing with [`lock`]/[`unlock`]. Unlock is matched by node
//! identity, not call stack: partial locks on different terminals of a group
//! can coexist.

use crate::net::{FetId, FlowPolicy, NodeId};
use crate::network::Network;

/// Try to enter `fet` at `entering`. Returns false (and leaves no partial
/// lock behind) if any of the fet's groups refuses:
/// - policy `Off` always refuses;
/// - policy `InOnly` refuses entry at the unattributed terminal, `OutOnly`
///   at the attributed one;
/// - a group already entered from one side refuses entry from the other,
///   and refuses a second entry point on the same side at a different node.
///
/// On success every group of the fet records `entering` and the matching
/// [`unlock`] must be called with the same node.
pub fn lock(net: &mut Network, fet: FetId, entering: NodeId) -> bool {
    let links = net.fets[fet.0].flows.clone();
    let mut locked: Vec<usize> = Vec::new();
    for (i, link) in links.iter().enumerate() {
        let attributed = if link.on_source {
            net.fets[fet.0].source
        } else {
            net.fets[fet.0].drain
        };
        let at_attributed = entering == attributed;
        let flow = &mut net.flows[link.flow.0];
        let ok = match flow.policy {
            FlowPolicy::Ignore => true,
            FlowPolicy::Off => false,
            FlowPolicy::InOnly if !at_attributed => false,
            FlowPolicy::OutOnly if at_attributed => false,
            _ => {
                // Runtime contention: one entry point per side, no
                // opposite-side entry while held.
                let opposite_held = if at_attributed {
                    flow.left.is_some()
                } else {
                    flow.entered.is_some()
                };
                let slot = if at_attributed {
                    &mut flow.entered
                } else {
                    &mut flow.left
                };
                match *slot {
                    _ if opposite_held => false,
                    None => {
                        *slot = Some(entering);
                        locked.push(i);
                        true
                    }
                    Some(n) => n == entering,
                }
            }
        };
        if !ok {
            // Roll back locks taken so far in this call.
            for &j in &locked {
                let l = links[j];
                let at_attr = {
                    let f = &net.fets[fet.0];
                    let attr = if l.on_source { f.source } else { f.drain };
                    entering == attr
                };
                let fl = &mut net.flows[l.flow.0];
                if at_attr {
                    fl.entered = None;
                } else {
                    fl.left = None;
                }
            }
            return false;
        }
    }
    true
}

/// Release locks taken by the matching [`lock`] call. Matched by node
/// identity: only lock slots recording `entering` are cleared.
pub fn unlock(net: &mut Network, fet: FetId, entering: NodeId) {
    let links = net.fets[fet.0].flows.clone();
    for link in links {
        let flow = &mut net.flows[link.flow.0];
        if flow.entered == Some(entering) {
            flow.entered = None;
        }
        if flow.left == Some(entering) {
            flow.left = None;
        }
    }
}

/// Set the policy for the named group (creating it if needed): the
/// `FlowCmd` surface.
pub fn set_policy(net: &mut Network, name: &str, policy: FlowPolicy) {
    let id = net.build_flow(name);
    net.flows[id.0].policy = policy;
}

/// Parse a policy keyword: `normal`, `in`, `out`, `ignore`, `off`.
pub fn policy_by_name(name: &str) -> Option<FlowPolicy> {
    match name {
        "normal" => Some(FlowPolicy::Normal),
        "in" => Some(FlowPolicy::InOnly),
        "out" => Some(FlowPolicy::OutOnly),
        "ignore" => Some(FlowPolicy::Ignore),
        "off" => Some(FlowPolicy::Off),
        _ => None,
    }
}

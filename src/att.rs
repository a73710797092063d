// SPDX-License-Identifier: Apache-2.0

//! Attribute vocabulary: the user-supplied hints attached to nodes and to
//! fet terminals in the source netlist.
//!
//! Node attributes classify a net (`in`, `out`, `bus`, `precharged`,
//! `predischarged`, `dynamic`, `watched`, `blocked`). Terminal attributes
//! attach flow-control information to one side of a transistor: `In:<name>`
//! and `Out:<name>` create a flow-group membership with the corresponding
//! directional policy, a bare `<name>` joins the group with the default
//! policy, and `NoInfo` sets the no-propagate hint for that terminal.

use crate::net::{FetId, FlowLink, FlowPolicy, NodeId};
use crate::network::Network;

/// Apply a node attribute. Unknown attributes are reported and ignored.
pub fn node_attr(net: &mut Network, node: NodeId, attr: &str) {
    let flags = &mut net.nodes[node.0].flags;
    match attr {
        "in" => flags.input = true,
        "out" => flags.output = true,
        "bus" => flags.bus = true,
        "precharged" => flags.precharged = true,
        "predischarged" => flags.predischarged = true,
        "dynamic" => flags.dynamic = true,
        "watched" => flags.watched = true,
        "blocked" => flags.blocked = true,
        _ => log::warn!(
            "unknown attribute '{}' on node '{}' ignored",
            attr,
            net.nodes[node.0].name
        ),
    }
}

/// Apply a terminal attribute to the source (`on_source = true`) or drain
/// side of `fet`. This is how flow groups come into existence.
pub fn terminal_attr(net: &mut Network, fet: FetId, on_source: bool, attr: &str) {
    if attr == "NoInfo" {
        let flags = &mut net.fets[fet.0].flags;
        if on_source {
            flags.no_source_info = true;
        } else {
            flags.no_drain_info = true;
        }
        return;
    }
    let (policy, name) = if let Some(rest) = attr.strip_prefix("In:") {
        (Some(FlowPolicy::InOnly), rest)
    } else if let Some(rest) = attr.strip_prefix("Out:") {
        (Some(FlowPolicy::OutOnly), rest)
    } else {
        (None, attr)
    };
    if name.is_empty() {
        log::warn!("terminal attribute '{}' names no flow group; ignored", attr);
        return;
    }
    let flow = net.build_flow(name);
    if let Some(policy) = policy {
        net.flows[flow.0].policy = policy;
    }
    let links = &mut net.fets[fet.0].flows;
    let link = FlowLink { flow, on_source };
    if !links.contains(&link) {
        links.push(link);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TYPE_NENH;

    #[test]
    fn test_node_attrs_set_flags() {
        let mut net = Network::new();
        let n = net.build_node("data");
        node_attr(&mut net, n, "in");
        node_attr(&mut net, n, "bus");
        node_attr(&mut net, n, "no-such-attr");
        assert!(net.node(n).flags.input);
        assert!(net.node(n).flags.bus);
        assert!(!net.node(n).flags.output);
    }

    #[test]
    fn test_terminal_attr_creates_flow_group() {
        let mut net = Network::new();
        let g = net.build_node("sel");
        let a = net.build_node("a");
        let b = net.build_node("b");
        let f = net.build_fet(TYPE_NENH, g, a, b, 8.0, 4.0, (0.0, 0.0));
        terminal_attr(&mut net, f, true, "In:col7");
        assert_eq!(net.flows.len(), 1);
        assert_eq!(net.flows[0].name, "col7");
        assert_eq!(net.flows[0].policy, FlowPolicy::InOnly);
        assert_eq!(net.fet(f).flows.len(), 1);
        assert!(net.fet(f).flows[0].on_source);
        // Re-applying the same attribute is idempotent.
        terminal_attr(&mut net, f, true, "In:col7");
        assert_eq!(net.fet(f).flows.len(), 1);
    }

    #[test]
    fn test_noinfo_hint() {
        let mut net = Network::new();
        let g = net.build_node("sel");
        let a = net.build_node("a");
        let b = net.build_node("b");
        let f = net.build_fet(TYPE_NENH, g, a, b, 8.0, 4.0, (0.0, 0.0));
        terminal_attr(&mut net, f, false, "NoInfo");
        assert!(net.fet(f).flags.no_drain_info);
        assert!(!net.fet(f).flags.no_source_info);
    }
}

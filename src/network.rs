// SPDX-License-Identifier: Apache-2.0

//! The `Network` context: owns all graph storage (nodes, fets, flow groups,
//! type table), the analysis limits, and the inter-run reset.
//!
//! Builder operations are idempotent get-or-create by name; parallel
//! transistors are coalesced at build time. There is no global state: every
//! engine pass takes the network by reference.

use std::collections::HashMap;

use crate::net::{Fet, FetFlags, FetId, Flow, FlowId, Node, NodeId, NEVER};
use crate::types::{FetType, TypeId, BUILTIN_TYPES, MAX_TYPES};

pub const VDD_NAME: &str = "Vdd";
pub const GND_NAME: &str = "GND";

/// Analysis budgets and thresholds. All user-settable; defaults preserved
/// from the original tool.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Total stages examined per delay-propagation run before aborting.
    pub delay_limit: u64,
    /// Strength-search steps per mark pass before giving up.
    pub mark_fs_limit: u64,
    /// Ratio errors reported before the ratio check stops.
    pub ratio_total_limit: u64,
    /// Messages printed per consistency-check category.
    pub check_msg_limit: u64,
    /// Transistors in series per stage piece.
    pub piece_limit: usize,
    /// Piece-overflow warnings printed before going quiet.
    pub piece_msg_limit: u64,
    /// Capacitance (pF) above which a node is treated as a bus: a
    /// delay-decoupling boundary computed as its own stage.
    pub bus_threshold: f64,
    /// Capacity of each critical-path list (1..=100).
    pub path_capacity: usize,
    /// Acceptable pull-up/pull-down ratio band for normally driven gates.
    pub normal_low: f64,
    pub normal_high: f64,
    /// Acceptable band when the pulldown path runs through a pass transistor.
    pub pass_low: f64,
    pub pass_high: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            delay_limit: 200_000,
            mark_fs_limit: 200_000,
            ratio_total_limit: 1000,
            check_msg_limit: 100,
            piece_limit: 50,
            piece_msg_limit: 20,
            bus_threshold: 2.0,
            path_capacity: 5,
            normal_low: 4.0,
            normal_high: 100.0,
            pass_low: 8.0,
            pass_high: 100.0,
        }
    }
}

/// Cooperative cancellation budget threaded through the recursive searches.
/// Once exhausted, all pending frames unwind returning a failure sentinel;
/// nothing is forcibly terminated.
#[derive(Debug)]
pub struct SearchBudget {
    pub limit: u64,
    pub used: u64,
}

impl SearchBudget {
    pub fn new(limit: u64) -> Self {
        SearchBudget { limit, used: 0 }
    }

    /// Consume one step. Returns false once the budget is exhausted.
    pub fn step(&mut self) -> bool {
        self.used += 1;
        self.used <= self.limit
    }

    pub fn exhausted(&self) -> bool {
        self.used > self.limit
    }
}

#[derive(Debug)]
pub struct Network {
    pub nodes: Vec<Node>,
    pub fets: Vec<Fet>,
    pub flows: Vec<Flow>,
    pub types: Vec<FetType>,
    pub limits: Limits,
    node_index: HashMap<String, NodeId>,
    flow_index: HashMap<String, FlowId>,
    pub vdd: NodeId,
    pub gnd: NodeId,
}

impl Network {
    /// An empty network with the built-in type table and the two power rails
    /// already present and fixed.
    pub fn new() -> Self {
        let mut net = Network {
            nodes: Vec::new(),
            fets: Vec::new(),
            flows: Vec::new(),
            types: BUILTIN_TYPES.clone(),
            limits: Limits::default(),
            node_index: HashMap::new(),
            flow_index: HashMap::new(),
            vdd: NodeId(0),
            gnd: NodeId(0),
        };
        net.vdd = net.build_node(VDD_NAME);
        net.gnd = net.build_node(GND_NAME);
        net.fix_rails();
        net
    }

    fn fix_rails(&mut self) {
        let vdd = &mut self.nodes[self.vdd.0].flags;
        vdd.input = true;
        vdd.fixed_one = true;
        vdd.fixed_zero = false;
        let gnd = &mut self.nodes[self.gnd.0].flags;
        gnd.input = true;
        gnd.fixed_zero = true;
        gnd.fixed_one = false;
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn fet(&self, id: FetId) -> &Fet {
        &self.fets[id.0]
    }

    pub fn fet_mut(&mut self, id: FetId) -> &mut Fet {
        &mut self.fets[id.0]
    }

    pub fn flow(&self, id: FlowId) -> &Flow {
        &self.flows[id.0]
    }

    pub fn fet_type(&self, fet: FetId) -> &FetType {
        &self.types[self.fets[fet.0].kind.0]
    }

    pub fn node_name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    /// A node is a bus, and so a delay-decoupling boundary, when the user
    /// says so or when its lumped capacitance exceeds the threshold.
    pub fn is_bus(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        node.flags.bus || node.cap > self.limits.bus_threshold
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.node_index.get(name).copied()
    }

    pub fn find_flow(&self, name: &str) -> Option<FlowId> {
        self.flow_index.get(name).copied()
    }

    /// Get-or-create a node by name.
    pub fn build_node(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.node_index.get(name) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name.to_string()));
        self.node_index.insert(name.to_string(), id);
        id
    }

    /// Get-or-create a flow group by name.
    pub fn build_flow(&mut self, name: &str) -> FlowId {
        if let Some(&id) = self.flow_index.get(name) {
            return id;
        }
        let id = FlowId(self.flows.len());
        self.flows.push(Flow::new(name.to_string()));
        self.flow_index.insert(name.to_string(), id);
        id
    }

    /// Look up a transistor class by name.
    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(TypeId)
    }

    /// Register a user-defined transistor class. Fails once the table is
    /// full ([`MAX_TYPES`]).
    pub fn add_type(&mut self, ty: FetType) -> Result<TypeId, String> {
        if self.types.len() >= MAX_TYPES {
            return Err(format!(
                "type table full ({} entries); cannot add '{}'",
                MAX_TYPES, ty.name
            ));
        }
        let id = TypeId(self.types.len());
        self.types.push(ty);
        Ok(id)
    }

    /// Register the incidence edge between `node` and `fet` (idempotent).
    pub fn build_pointer(&mut self, node: NodeId, fet: FetId) {
        let list = &mut self.nodes[node.0].fets;
        if !list.contains(&fet) {
            list.push(fet);
        }
    }

    /// Add a transistor, merging it into an existing parallel duplicate if
    /// one exists: areas add, aspect ratios combine in parallel.
    pub fn build_fet(
        &mut self,
        kind: TypeId,
        gate: NodeId,
        source: NodeId,
        drain: NodeId,
        area: f64,
        aspect: f64,
        location: (f64, f64),
    ) -> FetId {
        // Parallel-merge scan: only fets already incident on the gate node
        // can be duplicates, so the scan stays local.
        for &cand in &self.nodes[gate.0].fets.clone() {
            let f = &self.fets[cand.0];
            if f.kind == kind
                && f.gate == gate
                && ((f.source == source && f.drain == drain)
                    || (f.source == drain && f.drain == source))
            {
                let f = &mut self.fets[cand.0];
                f.area += area;
                if f.aspect > 0.0 && aspect > 0.0 {
                    f.aspect = 1.0 / (1.0 / f.aspect + 1.0 / aspect);
                }
                return cand;
            }
        }
        let id = FetId(self.fets.len());
        self.fets.push(Fet {
            kind,
            gate,
            source,
            drain,
            area,
            aspect,
            location,
            flags: FetFlags::default(),
            flows: Vec::new(),
        });
        self.build_pointer(gate, id);
        self.build_pointer(source, id);
        self.build_pointer(drain, id);
        // Gate loading: the driver of `gate` sees this device's gate cap.
        let ty = &self.types[kind.0];
        let gate_cap = ty.cap_per_area * area;
        self.nodes[gate.0].cap += gate_cap;
        id
    }

    /// Accumulate lumped capacitance (pF) onto a node.
    pub fn add_cap(&mut self, node: NodeId, pf: f64) {
        self.nodes[node.0].cap += pf;
    }

    /// Accumulate lumped resistance (ohms) onto a node.
    pub fn add_res(&mut self, node: NodeId, ohms: f64) {
        self.nodes[node.0].res += ohms;
    }

    /// The whole-graph reset run between independent analyses.
    ///
    /// Restores: node transient state (times, level fixing, in-path guard),
    /// fet flow/forced bits, flow-group lock state. Classification flags the
    /// user established (input/output/bus/dynamic/precharge/watch/block) are
    /// preserved; the power rails are unconditionally re-fixed. Idempotent.
    ///
    /// A set in-path flag here means some earlier search failed to unwind
    /// cleanly; that is an analyzer bug, reported but not repaired further.
    pub fn clear_all(&mut self) {
        for node in &mut self.nodes {
            if node.flags.in_path {
                log::error!(
                    "analyzer bug: node '{}' still marked in-path at clear",
                    node.name
                );
                node.flags.in_path = false;
            }
            node.hi_time = NEVER;
            node.lo_time = NEVER;
            node.flags.fixed_zero = false;
            node.flags.fixed_one = false;
            node.flags.ratio_error = false;
        }
        for fet in &mut self.fets {
            fet.flags.flow_from_source = false;
            fet.flags.flow_from_drain = false;
            fet.flags.forced_on = false;
            fet.flags.forced_off = false;
        }
        for flow in &mut self.flows {
            if flow.is_locked() {
                log::error!(
                    "analyzer bug: flow group '{}' still locked at clear",
                    flow.name
                );
            }
            flow.entered = None;
            flow.left = None;
        }
        self.fix_rails();
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TYPE_NENH;

    #[test]
    fn test_build_node_is_idempotent() {
        let mut net = Network::new();
        let a = net.build_node("a");
        let b = net.build_node("a");
        assert_eq!(a, b);
        assert_eq!(net.node(a).name, "a");
    }

    #[test]
    fn test_rails_fixed_after_new_and_clear() {
        let mut net = Network::new();
        net.node_mut(net.vdd).flags.fixed_one = false;
        net.clear_all();
        assert!(net.node(net.vdd).flags.fixed_one);
        assert!(net.node(net.vdd).flags.input);
        assert!(net.node(net.gnd).flags.fixed_zero);
        assert!(net.node(net.gnd).flags.input);
    }

    #[test]
    fn test_parallel_fets_merge() {
        let mut net = Network::new();
        let g = net.build_node("g");
        let s = net.build_node("s");
        let d = net.build_node("d");
        let f1 = net.build_fet(TYPE_NENH, g, s, d, 8.0, 4.0, (0.0, 0.0));
        // Swapped terminals still count as parallel.
        let f2 = net.build_fet(TYPE_NENH, g, d, s, 8.0, 4.0, (1.0, 1.0));
        assert_eq!(f1, f2);
        assert_eq!(net.fets.len(), 1);
        assert_eq!(net.fet(f1).area, 16.0);
        assert!((net.fet(f1).aspect - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_clear_all_is_idempotent() {
        let mut net = Network::new();
        let g = net.build_node("g");
        let s = net.build_node("s");
        let f = net.build_fet(TYPE_NENH, g, s, net.gnd, 8.0, 4.0, (0.0, 0.0));
        net.fet_mut(f).flags.forced_on = true;
        net.node_mut(g).hi_time = 3.0;
        net.clear_all();
        let nodes_once: Vec<_> = net.nodes.iter().map(|n| n.flags).collect();
        let fets_once: Vec<_> = net.fets.iter().map(|f| f.flags).collect();
        net.clear_all();
        let nodes_twice: Vec<_> = net.nodes.iter().map(|n| n.flags).collect();
        let fets_twice: Vec<_> = net.fets.iter().map(|f| f.flags).collect();
        assert_eq!(nodes_once, nodes_twice);
        assert_eq!(fets_once, fets_twice);
        assert_eq!(net.node(g).hi_time, NEVER);
        assert!(!net.fet(f).flags.forced_on);
    }
}

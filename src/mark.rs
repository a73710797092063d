// SPDX-License-Identifier: Apache-2.0

//! Static mark pass: decides which nodes are permanently fixed at 0/1 and
//! which transistors can possibly conduct in which direction.
//!
//! This is a fixpoint propagation over node flags, not a classic FSM:
//! fixing a node forces transistors it gates on or off, which can fix
//! further nodes via a strength competition between the strongest certain
//! driver and the strongest possible opponent. All searches are cycle-guarded
//! by the per-node in-path flag and bounded by the mark-strength budget;
//! exhausting the budget unwinds cleanly and reports that the circuit needs
//! more flow-control information rather than hanging.

use crate::flow;
use crate::net::{FetId, NodeId};
use crate::network::{Network, SearchBudget};
use crate::types::{OnCondition, TYPE_NENH, TYPE_NENHP};

/// Budget exhaustion sentinel for the strength search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

/// Full marking pass. Returns false if the strength-search budget ran out,
/// in which case the marking is partial but consistent.
///
/// Order of business:
/// 1. reclassify pass-driven enhancement fets (nenh -> nenhp);
/// 2. discover flow directions into every gate and declared output;
/// 3. propagate levels outward from every fixed node.
pub fn mark_flow(net: &mut Network) -> bool {
    reclassify_pass_driven(net);

    let mut budget = SearchBudget::new(net.limits.mark_fs_limit);

    // Flow discovery: gates and declared outputs consume information, and
    // non-rail value sources (buses, precharge points) must themselves be
    // driven, so trace where that information can come from. Only fixed
    // rails need no incoming flow.
    let mut targets: Vec<NodeId> = Vec::new();
    for (i, node) in net.nodes.iter().enumerate() {
        let id = NodeId(i);
        let is_gate = node.fets.iter().any(|&f| net.fets[f.0].gate == id);
        let driven_source = node.flags.bus
            || node.cap > net.limits.bus_threshold
            || node.flags.precharged
            || node.flags.predischarged;
        if is_gate || node.flags.output || driven_source {
            targets.push(id);
        }
    }
    for id in targets {
        let flags = net.nodes[id.0].flags;
        if flags.is_fixed() || flags.input || flags.blocked {
            continue;
        }
        if !budget.step() {
            break;
        }
        trace_flow_into(net, id, &mut budget);
    }

    // Level fixpoint, seeded by everything already fixed (at minimum the
    // power rails).
    let mut completed = true;
    let fixed: Vec<(NodeId, bool)> = net
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.flags.is_fixed())
        .map(|(i, n)| (NodeId(i), n.flags.fixed_one))
        .collect();
    for (id, level) in fixed {
        completed &= mark_node_level(net, id, level, true, &mut budget);
    }
    completed &= !budget.exhausted();
    if !completed {
        log::warn!(
            "mark pass gave up after {} strength-search steps; you probably \
             need more flow control info (In:/Out: attributes on pass transistors)",
            budget.used
        );
    }
    completed
}

/// An enhancement fet whose gate can never be driven by a load or an input
/// can only ever be pass-driven, so it pulls more weakly. Reclassified
/// in-place once per mark pass; idempotent.
fn reclassify_pass_driven(net: &mut Network) {
    let mut downgrade: Vec<FetId> = Vec::new();
    for (i, fet) in net.fets.iter().enumerate() {
        if fet.kind != TYPE_NENH {
            continue;
        }
        let gate = &net.nodes[fet.gate.0];
        let load_driven = gate.flags.input
            || gate.fets.iter().any(|&f| {
                let other = &net.fets[f.0];
                other.has_terminal(fet.gate)
                    && net.types[other.kind.0].on_condition == OnCondition::Always
            });
        if !load_driven {
            downgrade.push(FetId(i));
        }
    }
    for f in downgrade {
        net.fets[f.0].kind = TYPE_NENHP;
    }
}

/// DFS from `node` backward through conducting terminals, looking for any
/// source of information (fixed node, input, bus, precharge point). Sets the
/// flow-capability bit on every fet along a discovered path. Cycles return
/// whatever the non-cyclic prefix discovered.
pub fn check_flow_to(net: &mut Network, node: NodeId, budget: &mut SearchBudget) -> bool {
    if !budget.step() {
        return false;
    }
    {
        let flags = &net.nodes[node.0].flags;
        if flags.supplies_value() {
            return true;
        }
        if flags.blocked || flags.in_path {
            return false;
        }
    }
    if net.is_bus(node) {
        return true;
    }
    trace_flow_into(net, node, budget)
}

/// Traversal body shared by [`check_flow_to`] and the per-target calls in
/// [`mark_flow`]: walk the conducting neighborhood of `node`, setting the
/// flow-capability bit on every fet found to carry information toward it.
/// Called directly for value sources that themselves need a driver, whose
/// own source-ness would otherwise end the trace before it started.
fn trace_flow_into(net: &mut Network, node: NodeId, budget: &mut SearchBudget) -> bool {
    net.nodes[node.0].flags.in_path = true;
    let mut found = false;
    let incident = net.nodes[node.0].fets.clone();
    for fid in incident {
        let (far, no_info) = {
            let fet = &net.fets[fid.0];
            match fet.other_terminal(node) {
                Some(far) => (far, fet.no_info_at(far)),
                None => continue, // gate-only connection
            }
        };
        if no_info {
            continue;
        }
        if !flow::lock(net, fid, far) {
            continue;
        }
        if check_flow_to(net, far, budget) {
            let fet = &mut net.fets[fid.0];
            if far == fet.source {
                fet.flags.flow_from_source = true;
            } else {
                fet.flags.flow_from_drain = true;
            }
            found = true;
        }
        flow::unlock(net, fid, far);
    }
    net.nodes[node.0].flags.in_path = false;
    found
}

/// Assert that `node` is permanently at `level`. New facts (or `force`)
/// re-examine every attached fet: gated fets may become forced on/off, and
/// conducting neighbors get a fresh strength check. Conflicting assertions
/// resolve as "1 wins", with a warning. Returns false if the budget ran out
/// somewhere below.
pub fn mark_node_level(
    net: &mut Network,
    node: NodeId,
    level: bool,
    force: bool,
    budget: &mut SearchBudget,
) -> bool {
    {
        let flags = net.nodes[node.0].flags;
        if level && flags.fixed_zero {
            log::warn!(
                "node '{}' asserted both 0 and 1; taking 1",
                net.nodes[node.0].name
            );
        } else if !level && flags.fixed_one {
            log::warn!(
                "node '{}' asserted both 0 and 1; keeping 1",
                net.nodes[node.0].name
            );
            return true;
        } else if !force && ((level && flags.fixed_one) || (!level && flags.fixed_zero)) {
            return true; // already known
        }
    }
    {
        let flags = &mut net.nodes[node.0].flags;
        flags.fixed_one = level;
        flags.fixed_zero = !level;
    }

    let mut completed = true;
    let incident = net.nodes[node.0].fets.clone();
    for fid in incident {
        let gated_here = net.fets[fid.0].gate == node;
        if gated_here {
            let on = match net.types[net.fets[fid.0].kind.0].on_condition {
                OnCondition::Gate1 => Some(level),
                OnCondition::Gate0 => Some(!level),
                OnCondition::Always => None,
            };
            if let Some(on) = on {
                let (source, drain, changed) = {
                    let fet = &mut net.fets[fid.0];
                    let changed = fet.flags.forced_on != on || fet.flags.forced_off != !on;
                    fet.flags.forced_on = on;
                    fet.flags.forced_off = !on;
                    (fet.source, fet.drain, changed)
                };
                if changed || force {
                    completed &= check_node(net, source, budget);
                    completed &= check_node(net, drain, budget);
                }
            }
        }
        // A fet conducting away from this node carries the new level onward.
        let far = {
            let fet = &net.fets[fid.0];
            if fet.has_terminal(node) && fet.flows_from(node) {
                fet.other_terminal(node)
            } else {
                None
            }
        };
        if let Some(far) = far {
            completed &= check_node(net, far, budget);
        }
    }
    completed
}

/// Two-phase strength competition on one node. If the strongest certain
/// driver strictly beats every possible opponent, the node is fixed at the
/// driven level. A node with no driver at all is floating: its outward flow
/// is cancelled and the far endpoints are rechecked. Returns false on budget
/// exhaustion.
pub fn check_node(net: &mut Network, node: NodeId, budget: &mut SearchBudget) -> bool {
    if budget.exhausted() {
        return false;
    }
    {
        let flags = net.nodes[node.0].flags;
        if flags.is_fixed() || flags.input {
            return true;
        }
    }

    // Phase 1: strongest certain drivers toward each level. A certain
    // driver conducts unconditionally (forced on or always on) from a node
    // whose level is already known.
    let mut certain_one: f64 = 0.0;
    let mut certain_zero: f64 = 0.0;
    for &fid in &net.nodes[node.0].fets {
        let fet = &net.fets[fid.0];
        let Some(far) = fet.other_terminal(node) else {
            continue;
        };
        let ty = &net.types[fet.kind.0];
        let conducting =
            !fet.flags.forced_off && (fet.flags.forced_on || ty.on_condition == OnCondition::Always);
        if !conducting {
            continue;
        }
        let far_flags = net.nodes[far.0].flags;
        if !far_flags.is_fixed() {
            continue;
        }
        let value = far_flags.fixed_one;
        let strength = ty.strength(value);
        if strength <= 0.0 {
            continue;
        }
        if value && strength > certain_one {
            certain_one = strength;
        } else if !value && strength > certain_zero {
            certain_zero = strength;
        }
    }

    if certain_one > 0.0 || certain_zero > 0.0 {
        // Strict comparisons everywhere: an exact tie keeps the status quo.
        let (value, strength) = if certain_one > certain_zero {
            (true, certain_one)
        } else if certain_zero > certain_one {
            (false, certain_zero)
        } else {
            return true; // evenly matched certain drivers, stay ambiguous
        };
        match find_strength(net, node, !value, strength, budget) {
            Err(Exhausted) => return false,
            Ok(Some(_)) => return true, // a possible opponent can beat it
            Ok(None) => return mark_node_level(net, node, value, false, budget),
        }
    }

    // Phase 3: no certain driver. If nothing can possibly drive the node
    // either way, it is floating and nothing downstream can rely on it.
    let any_one = match find_strength(net, node, true, 0.0, budget) {
        Err(Exhausted) => return false,
        Ok(r) => r.is_some(),
    };
    let any_zero = match find_strength(net, node, false, 0.0, budget) {
        Err(Exhausted) => return false,
        Ok(r) => r.is_some(),
    };
    if any_one || any_zero {
        return true;
    }
    let mut completed = true;
    let incident = net.nodes[node.0].fets.clone();
    for fid in incident {
        let far = {
            let fet = &mut net.fets[fid.0];
            if !fet.has_terminal(node) || !fet.flows_from(node) {
                None
            } else {
                if node == fet.source {
                    fet.flags.flow_from_source = false;
                } else {
                    fet.flags.flow_from_drain = false;
                }
                fet.other_terminal(node)
            }
        };
        if let Some(far) = far {
            completed &= check_node(net, far, budget);
        }
    }
    completed
}

/// Depth-first search for the strongest possible path from `node` to a
/// source of `toward_one`, pruned by `beat`: only paths strictly stronger
/// than `beat` are of interest (path strength is the weakest device on it).
/// Inputs and buses count as sources of either value. Returns
/// `Err(Exhausted)` when the budget runs out; the in-path guard is unwound
/// on every exit, including the abort path.
pub fn find_strength(
    net: &mut Network,
    node: NodeId,
    toward_one: bool,
    beat: f64,
    budget: &mut SearchBudget,
) -> Result<Option<f64>, Exhausted> {
    if !budget.step() {
        return Err(Exhausted);
    }
    {
        let flags = net.nodes[node.0].flags;
        if flags.is_fixed() {
            return if flags.fixed_one == toward_one {
                Ok(Some(f64::INFINITY))
            } else {
                Ok(None)
            };
        }
        if flags.input || net.is_bus(node) {
            return Ok(Some(f64::INFINITY)); // could carry either value
        }
        if flags.blocked || flags.in_path {
            return Ok(None);
        }
    }
    net.nodes[node.0].flags.in_path = true;
    let mut best: Option<f64> = None;
    let incident = net.nodes[node.0].fets.clone();
    for fid in incident {
        let (far, fet_strength) = {
            let fet = &net.fets[fid.0];
            let Some(far) = fet.other_terminal(node) else {
                continue;
            };
            if fet.flags.forced_off || fet.no_info_at(far) {
                continue;
            }
            (far, net.types[fet.kind.0].strength(toward_one))
        };
        if fet_strength <= beat {
            continue; // this branch can never strictly beat the threshold
        }
        if !flow::lock(net, fid, far) {
            continue;
        }
        let sub = find_strength(net, far, toward_one, beat, budget);
        flow::unlock(net, fid, far);
        match sub {
            Err(Exhausted) => {
                net.nodes[node.0].flags.in_path = false;
                return Err(Exhausted);
            }
            Ok(Some(sub_strength)) => {
                let path = fet_strength.min(sub_strength);
                if path > beat && best.map_or(true, |b| path > b) {
                    best = Some(path);
                }
            }
            Ok(None) => {}
        }
    }
    net.nodes[node.0].flags.in_path = false;
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NEVER;
    use crate::types::{TYPE_NLOAD, TYPE_NENH};

    /// Flag-hygiene helper: no in-path flag may survive a completed search.
    fn assert_no_in_path(net: &Network) {
        for node in &net.nodes {
            assert!(!node.flags.in_path, "leaked in-path flag on '{}'", node.name);
        }
    }

    /// Vdd -(nload)- out -(nenh, gate=in)- GND: the classic nMOS inverter.
    fn build_inverter(net: &mut Network) -> (NodeId, NodeId) {
        let inp = net.build_node("in");
        let out = net.build_node("out");
        net.node_mut(inp).flags.input = true;
        net.node_mut(out).flags.output = true;
        let vdd = net.vdd;
        let gnd = net.gnd;
        net.build_fet(TYPE_NLOAD, out, vdd, out, 8.0, 4.0, (0.0, 0.0));
        net.build_fet(TYPE_NENH, inp, out, gnd, 8.0, 2.0, (0.0, 1.0));
        (inp, out)
    }

    #[test]
    fn test_inverter_flow_and_levels() {
        let mut net = Network::new();
        let (inp, out) = build_inverter(&mut net);
        assert!(mark_flow(&mut net));
        assert_no_in_path(&net);
        // Both fets must have discovered a direction toward `out`.
        let pulldown = net
            .fets
            .iter()
            .find(|f| f.gate == inp)
            .expect("pulldown exists");
        assert!(
            pulldown.flags.flow_from_source || pulldown.flags.flow_from_drain,
            "pulldown found no flow direction"
        );
        // With `in` not yet asserted, out must not be fixed: the pulldown
        // could be on and would beat the load.
        assert!(!net.node(out).flags.is_fixed());
        assert_eq!(net.node(out).hi_time, NEVER);
    }

    #[test]
    fn test_input_high_fixes_inverter_output_low() {
        let mut net = Network::new();
        let (inp, out) = build_inverter(&mut net);
        assert!(mark_flow(&mut net));
        let mut budget = SearchBudget::new(net.limits.mark_fs_limit);
        assert!(mark_node_level(&mut net, inp, true, false, &mut budget));
        assert_no_in_path(&net);
        assert!(net.node(out).flags.fixed_zero, "out should be pulled low");
    }

    #[test]
    fn test_input_low_fixes_inverter_output_high() {
        let mut net = Network::new();
        let (inp, out) = build_inverter(&mut net);
        assert!(mark_flow(&mut net));
        let mut budget = SearchBudget::new(net.limits.mark_fs_limit);
        assert!(mark_node_level(&mut net, inp, false, false, &mut budget));
        assert_no_in_path(&net);
        // Pulldown forced off; only the load can drive.
        assert!(net.node(out).flags.fixed_one, "out should float high");
    }

    #[test]
    fn test_level_conflict_one_wins() {
        let mut net = Network::new();
        let n = net.build_node("x");
        let mut budget = SearchBudget::new(1000);
        mark_node_level(&mut net, n, true, false, &mut budget);
        mark_node_level(&mut net, n, false, false, &mut budget);
        assert!(net.node(n).flags.fixed_one, "1 wins over a later 0");
        mark_node_level(&mut net, n, false, false, &mut budget);
        mark_node_level(&mut net, n, true, false, &mut budget);
        assert!(net.node(n).flags.fixed_one);
    }

    #[test]
    fn test_pass_ring_terminates_without_flow_bits() {
        // Scenario B: three nodes in a pass-transistor ring, gates driven
        // externally, no fixed source anywhere in the ring.
        let mut net = Network::new();
        let a = net.build_node("a");
        let b = net.build_node("b");
        let c = net.build_node("c");
        let g = net.build_node("g");
        net.node_mut(g).flags.input = true;
        // Outputs force a flow trace into each ring node.
        net.node_mut(a).flags.output = true;
        net.node_mut(b).flags.output = true;
        net.node_mut(c).flags.output = true;
        net.build_fet(TYPE_NENH, g, a, b, 8.0, 4.0, (0.0, 0.0));
        net.build_fet(TYPE_NENH, g, b, c, 8.0, 4.0, (1.0, 0.0));
        net.build_fet(TYPE_NENH, g, c, a, 8.0, 4.0, (2.0, 0.0));
        assert!(mark_flow(&mut net));
        assert_no_in_path(&net);
        for fet in net.fets.iter().filter(|f| f.gate == g) {
            assert!(
                !fet.flags.flow_from_source && !fet.flags.flow_from_drain,
                "ring fets must not claim a flow direction"
            );
        }
    }

    #[test]
    fn test_flow_discovered_into_bus_node() {
        // A bus driven only through a pass transistor: flow discovery must
        // still mark conduction into it, or nothing could ever settle it.
        let mut net = Network::new();
        let sel = net.build_node("sel");
        let big = net.build_node("big");
        net.node_mut(sel).flags.input = true;
        net.node_mut(big).flags.bus = true;
        let vdd = net.vdd;
        let pass = net.build_fet(TYPE_NENH, sel, vdd, big, 8.0, 4.0, (0.0, 0.0));
        assert!(mark_flow(&mut net));
        assert_no_in_path(&net);
        assert!(
            net.fet(pass).flows_from(vdd),
            "pass fet must be marked as carrying the rail onto the bus"
        );
    }

    #[test]
    fn test_reclassification_of_pass_driven_gate() {
        let mut net = Network::new();
        // `mid` is only ever reached through a pass transistor: no load and
        // no input connects to it directly, so the fet it gates can only be
        // pass-driven and must be downgraded to nenhp.
        let mid = net.build_node("mid");
        let sel = net.build_node("sel");
        let inp = net.build_node("in");
        let out = net.build_node("out");
        net.node_mut(sel).flags.input = true;
        net.node_mut(inp).flags.input = true;
        let pass = net.build_fet(TYPE_NENH, sel, inp, mid, 8.0, 4.0, (0.0, 0.0));
        let f = net.build_fet(TYPE_NENH, mid, out, net.gnd, 8.0, 2.0, (1.0, 0.0));
        mark_flow(&mut net);
        assert_eq!(net.fet(f).kind, TYPE_NENHP, "pass-driven gate downgrades");
        // `sel` is itself an input, so the pass fet keeps its class.
        assert_eq!(net.fet(pass).kind, TYPE_NENH);
        // Running the pass again changes nothing (idempotent).
        mark_flow(&mut net);
        assert_eq!(net.fet(f).kind, TYPE_NENHP);
        assert_eq!(net.fet(pass).kind, TYPE_NENH);
    }

    #[test]
    fn test_budget_exhaustion_unwinds_cleanly() {
        let mut net = Network::new();
        let (inp, _) = build_inverter(&mut net);
        net.limits.mark_fs_limit = 1;
        let completed = mark_flow(&mut net);
        assert!(!completed);
        assert_no_in_path(&net);
        // The graph is still usable: a fresh run with a sane budget works.
        net.clear_all();
        net.limits.mark_fs_limit = 200_000;
        assert!(mark_flow(&mut net));
        let mut budget = SearchBudget::new(net.limits.mark_fs_limit);
        assert!(mark_node_level(&mut net, inp, true, false, &mut budget));
        assert_no_in_path(&net);
    }
}

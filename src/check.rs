// SPDX-License-Identifier: Apache-2.0

//! Static electrical checks: sanity problems the marking pass exposes
//! (floating and undriven nodes, transistors that can never conduct,
//! unannotated bidirectional pass transistors, rail shorts), and the
//! classic nMOS pullup/pulldown ratio check.

use std::fmt::Write as _;

use crate::net::{FetId, NodeId};
use crate::network::Network;
use crate::types::OnCondition;

#[derive(Debug, Default)]
pub struct CheckReport {
    pub messages: Vec<String>,
    pub suppressed: u64,
    pub floating: usize,
    pub undriven: usize,
    pub nonconducting: usize,
    pub ambiguous: usize,
    pub shorts: usize,
}

impl CheckReport {
    fn note(&mut self, limit: usize, msg: String) {
        if self.messages.len() < limit {
            self.messages.push(msg);
        } else {
            self.suppressed += 1;
        }
    }

    pub fn problem_count(&self) -> usize {
        self.floating + self.undriven + self.nonconducting + self.ambiguous + self.shorts
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for m in &self.messages {
            let _ = writeln!(out, "{}", m);
        }
        if self.suppressed > 0 {
            let _ = writeln!(out, "({} further problems suppressed)", self.suppressed);
        }
        let _ = writeln!(
            out,
            "check: {} floating, {} undriven, {} nonconducting, {} ambiguous, {} shorts",
            self.floating, self.undriven, self.nonconducting, self.ambiguous, self.shorts
        );
        out
    }
}

/// Run all consistency checks. Call after the marking pass; the checks read
/// the flow and level information it computed.
pub fn check(net: &Network) -> CheckReport {
    let limit = net.limits.check_msg_limit as usize;
    let mut report = CheckReport::default();

    for (i, node) in net.nodes.iter().enumerate() {
        let id = NodeId(i);
        if id == net.vdd || id == net.gnd {
            continue;
        }
        let flags = node.flags;
        if flags.blocked {
            continue;
        }
        let is_gate = node
            .fets
            .iter()
            .any(|&f| net.fets[f.0].gate == id);
        let has_channel = node
            .fets
            .iter()
            .any(|&f| net.fets[f.0].has_terminal(id));
        let driven = flags.supplies_value()
            || node.fets.iter().any(|&f| {
                let fet = &net.fets[f.0];
                fet.has_terminal(id) && {
                    // Something can deliver a value from the far side.
                    let far = fet.other_terminal(id).unwrap_or(id);
                    fet.flows_from(far) && !fet.flags.forced_off
                }
            });

        if !is_gate && !has_channel && !flags.input {
            report.floating += 1;
            report.note(limit, format!("node '{}' is floating (connects to nothing)", node.name));
            continue;
        }
        if is_gate && !driven {
            report.undriven += 1;
            report.note(
                limit,
                format!("node '{}' drives gates but nothing drives it", node.name),
            );
        }
    }

    for fet in &net.fets {
        let ty = &net.types[fet.kind.0];
        let conducts = !fet.flags.forced_off
            && (fet.flags.flow_from_source || fet.flags.flow_from_drain);
        if !conducts {
            report.nonconducting += 1;
            report.note(
                limit,
                format!(
                    "{} at {},{} can never conduct",
                    ty.name, fet.location.0, fet.location.1
                ),
            );
        }
        // A pass transistor able to conduct both ways with no flow
        // annotation makes the searches explore both directions; worth a
        // warning even when the answer comes out right.
        if fet.flags.flow_from_source
            && fet.flags.flow_from_drain
            && ty.on_condition != OnCondition::Always
            && fet.flows.is_empty()
        {
            let src_ok = net.nodes[fet.source.0].flags.supplies_value();
            let drn_ok = net.nodes[fet.drain.0].flags.supplies_value();
            if !src_ok && !drn_ok {
                report.ambiguous += 1;
                report.note(
                    limit,
                    format!(
                        "{} at {},{} conducts both ways; consider In:/Out: attributes",
                        ty.name, fet.location.0, fet.location.1
                    ),
                );
            }
        }
        let short = {
            let s = net.nodes[fet.source.0].flags;
            let d = net.nodes[fet.drain.0].flags;
            (s.fixed_one && d.fixed_zero) || (s.fixed_zero && d.fixed_one)
        };
        if short && (ty.on_condition == OnCondition::Always || fet.flags.forced_on) {
            report.shorts += 1;
            report.note(
                limit,
                format!(
                    "{} at {},{} shorts {} to {}",
                    ty.name,
                    fet.location.0,
                    fet.location.1,
                    crate::network::VDD_NAME,
                    crate::network::GND_NAME
                ),
            );
        }
    }
    report
}

#[derive(Debug, Default)]
pub struct RatioReport {
    pub messages: Vec<String>,
    pub checked: usize,
    pub errors: usize,
    pub suppressed: u64,
}

impl RatioReport {
    fn note(&mut self, limit: usize, msg: String) {
        if self.messages.len() < limit {
            self.messages.push(msg);
        } else {
            self.suppressed += 1;
        }
    }
}

/// Pullup/pulldown ratio check for ratioed nMOS logic.
///
/// For every always-on load, walk each series pulldown path from the load's
/// output node to ground and compare the load's aspect to the path's summed
/// aspect. A path containing a pass-driven pulldown (an `nenhp`) must clear
/// the wider pass band. Each bad node is reported once; the check stops
/// after the configured total number of errors.
pub fn ratio_cmd(net: &mut Network) -> RatioReport {
    let limit = net.limits.check_msg_limit as usize;
    let mut report = RatioReport::default();

    let loads: Vec<(FetId, NodeId, f64)> = net
        .fets
        .iter()
        .enumerate()
        .filter_map(|(i, fet)| {
            if net.types[fet.kind.0].on_condition != OnCondition::Always {
                return None;
            }
            let out = if net.nodes[fet.source.0].flags.fixed_one {
                fet.drain
            } else if net.nodes[fet.drain.0].flags.fixed_one {
                fet.source
            } else {
                return None;
            };
            Some((FetId(i), out, fet.aspect))
        })
        .collect();

    for (load, out, z_pu) in loads {
        if report.errors as u64 >= net.limits.ratio_total_limit {
            log::warn!(
                "ratio check gave up after {} errors",
                net.limits.ratio_total_limit
            );
            break;
        }
        if net.nodes[out.0].flags.ratio_error {
            continue;
        }
        report.checked += 1;
        let mut worst: Option<(f64, bool)> = None; // (ratio, pass band)
        walk_pulldowns(net, out, load, z_pu, 0.0, false, &mut worst);
        let Some((ratio, pass)) = worst else {
            continue; // no pulldown path at all; the check pass reports it
        };
        let (low, high, band) = if pass {
            (net.limits.pass_low, net.limits.pass_high, "pass")
        } else {
            (net.limits.normal_low, net.limits.normal_high, "normal")
        };
        if ratio < low || ratio > high {
            net.nodes[out.0].flags.ratio_error = true;
            report.errors += 1;
            report.note(
                limit,
                format!(
                    "node '{}': pullup/pulldown ratio {:.2} outside {} band [{}, {}]",
                    net.nodes[out.0].name, ratio, band, low, high
                ),
            );
        }
    }
    report
}

/// DFS every series path from `n` to ground, tracking the summed pulldown
/// aspect; record the smallest ratio seen (the weakest pulldown path).
/// Cycle-guarded by the in-path flags, so the walk visits simple paths only.
fn walk_pulldowns(
    net: &mut Network,
    n: NodeId,
    via: FetId,
    z_pu: f64,
    z_pd: f64,
    pass: bool,
    worst: &mut Option<(f64, bool)>,
) {
    if net.nodes[n.0].flags.fixed_zero {
        if z_pd > 0.0 {
            let ratio = z_pu / z_pd;
            let replace = match *worst {
                None => true,
                Some((r, _)) => ratio < r,
            };
            if replace {
                *worst = Some((ratio, pass));
            }
        }
        return;
    }
    let flags = net.nodes[n.0].flags;
    if flags.is_fixed() || flags.input || flags.in_path {
        return;
    }
    net.nodes[n.0].flags.in_path = true;
    let incident = net.nodes[n.0].fets.clone();
    for fid in incident {
        if fid == via {
            continue;
        }
        let (far, aspect, is_pass) = {
            let fet = &net.fets[fid.0];
            let Some(far) = fet.other_terminal(n) else {
                continue;
            };
            let ty = &net.types[fet.kind.0];
            // Pulldowns are the gate-high enhancement devices.
            if ty.on_condition != OnCondition::Gate1 || fet.flags.forced_off {
                continue;
            }
            (far, fet.aspect, fet.kind == crate::types::TYPE_NENHP)
        };
        walk_pulldowns(net, far, fid, z_pu, z_pd + aspect, pass || is_pass, worst);
    }
    net.nodes[n.0].flags.in_path = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mark;
    use crate::types::{TYPE_NENH, TYPE_NLOAD};

    #[test]
    fn test_well_ratioed_inverter_passes() {
        let mut net = Network::new();
        let inp = net.build_node("in");
        let out = net.build_node("out");
        net.node_mut(inp).flags.input = true;
        net.node_mut(out).flags.output = true;
        let (vdd, gnd) = (net.vdd, net.gnd);
        net.build_fet(TYPE_NLOAD, out, vdd, out, 8.0, 8.0, (0.0, 0.0));
        net.build_fet(TYPE_NENH, inp, out, gnd, 8.0, 2.0, (0.0, 1.0));
        assert!(mark::mark_flow(&mut net));
        let report = ratio_cmd(&mut net);
        assert_eq!(report.checked, 1);
        assert_eq!(report.errors, 0, "4:1 inverter must pass: {:?}", report.messages);
    }

    #[test]
    fn test_weak_ratio_reported_once() {
        // Scenario E: a 2:1 inverter is below the 4.0 normal band.
        let mut net = Network::new();
        let inp = net.build_node("in");
        let out = net.build_node("out");
        net.node_mut(inp).flags.input = true;
        net.node_mut(out).flags.output = true;
        let (vdd, gnd) = (net.vdd, net.gnd);
        net.build_fet(TYPE_NLOAD, out, vdd, out, 8.0, 4.0, (0.0, 0.0));
        net.build_fet(TYPE_NENH, inp, out, gnd, 8.0, 2.0, (0.0, 1.0));
        assert!(mark::mark_flow(&mut net));
        let report = ratio_cmd(&mut net);
        assert_eq!(report.errors, 1);
        assert!(net.node(out).flags.ratio_error);
        // A second run skips the already-flagged node.
        let again = ratio_cmd(&mut net);
        assert_eq!(again.errors, 0);
        assert_eq!(again.checked, 0);
    }

    #[test]
    fn test_series_pulldown_sums_aspects() {
        // Two series pulldowns of aspect 2 each: summed Z=4, load Z=8 gives
        // ratio 2.0, a violation even though each device alone would pass.
        let mut net = Network::new();
        let a = net.build_node("a");
        let b = net.build_node("b");
        let out = net.build_node("out");
        let mid = net.build_node("mid");
        net.node_mut(a).flags.input = true;
        net.node_mut(b).flags.input = true;
        net.node_mut(out).flags.output = true;
        let (vdd, gnd) = (net.vdd, net.gnd);
        net.build_fet(TYPE_NLOAD, out, vdd, out, 8.0, 8.0, (0.0, 0.0));
        net.build_fet(TYPE_NENH, a, out, mid, 8.0, 2.0, (0.0, 1.0));
        net.build_fet(TYPE_NENH, b, mid, gnd, 8.0, 2.0, (0.0, 2.0));
        assert!(mark::mark_flow(&mut net));
        let report = ratio_cmd(&mut net);
        assert_eq!(report.errors, 1, "{:?}", report.messages);
        assert!(report.messages[0].contains("2.00"), "{:?}", report.messages);
    }

    #[test]
    fn test_limit_counts_errors_not_search_steps() {
        // The total limit caps reported errors; a deep series walk on a
        // clean gate must not eat it before later gates are checked.
        let mut net = Network::new();
        net.limits.ratio_total_limit = 5;
        let inp = net.build_node("in");
        let out = net.build_node("out");
        net.node_mut(inp).flags.input = true;
        net.node_mut(out).flags.output = true;
        let (vdd, gnd) = (net.vdd, net.gnd);
        net.build_fet(TYPE_NLOAD, out, vdd, out, 8.0, 16.0, (0.0, 0.0));
        // Eight series pulldowns of aspect 0.25: summed Z = 2, ratio 8.
        let mut prev = out;
        for i in 0..8 {
            let next = if i == 7 {
                gnd
            } else {
                net.build_node(&format!("m{}", i))
            };
            net.build_fet(TYPE_NENH, inp, prev, next, 2.0, 0.25, (1.0, i as f64));
            prev = next;
        }
        // A weak 2:1 inverter behind the deep chain must still be reported.
        let weak = net.build_node("weak");
        net.node_mut(weak).flags.output = true;
        net.build_fet(TYPE_NLOAD, weak, vdd, weak, 8.0, 4.0, (2.0, 0.0));
        net.build_fet(TYPE_NENH, inp, weak, gnd, 8.0, 2.0, (2.0, 1.0));
        assert!(mark::mark_flow(&mut net));
        let report = ratio_cmd(&mut net);
        assert_eq!(report.checked, 2);
        assert_eq!(report.errors, 1, "{:?}", report.messages);
        assert!(net.node(weak).flags.ratio_error);
    }

    #[test]
    fn test_error_ceiling_stops_the_check() {
        let mut net = Network::new();
        net.limits.ratio_total_limit = 2;
        let (vdd, gnd) = (net.vdd, net.gnd);
        for i in 0..3 {
            let inp = net.build_node(&format!("in{}", i));
            let out = net.build_node(&format!("out{}", i));
            net.node_mut(inp).flags.input = true;
            net.node_mut(out).flags.output = true;
            net.build_fet(TYPE_NLOAD, out, vdd, out, 8.0, 4.0, (i as f64, 0.0));
            net.build_fet(TYPE_NENH, inp, out, gnd, 8.0, 2.0, (i as f64, 1.0));
        }
        assert!(mark::mark_flow(&mut net));
        let report = ratio_cmd(&mut net);
        assert_eq!(report.errors, 2);
        assert_eq!(report.checked, 2, "third gate is never examined");
    }

    #[test]
    fn test_check_reports_floating_and_short() {
        let mut net = Network::new();
        let inp = net.build_node("in");
        net.node_mut(inp).flags.input = true;
        net.build_node("nowhere"); // attached to nothing
        let (vdd, gnd) = (net.vdd, net.gnd);
        // Depletion load strapped straight across the rails.
        net.build_fet(TYPE_NLOAD, gnd, vdd, gnd, 8.0, 8.0, (0.0, 0.0));
        assert!(mark::mark_flow(&mut net));
        let report = check(&net);
        assert_eq!(report.floating, 1);
        assert_eq!(report.shorts, 1);
        assert!(report.render().contains("nowhere"));
    }

    #[test]
    fn test_check_flags_undriven_gate_net() {
        let mut net = Network::new();
        let ghost = net.build_node("ghost");
        let out = net.build_node("out");
        net.node_mut(out).flags.output = true;
        let gnd = net.gnd;
        let vdd = net.vdd;
        net.build_fet(TYPE_NLOAD, out, vdd, out, 8.0, 8.0, (0.0, 0.0));
        // ghost gates the pulldown but nothing ever drives ghost.
        net.build_fet(TYPE_NENH, ghost, out, gnd, 8.0, 2.0, (0.0, 1.0));
        assert!(mark::mark_flow(&mut net));
        let report = check(&net);
        assert_eq!(report.undriven, 1, "{:?}", report.messages);
    }

    #[test]
    fn test_message_cap_counts_suppressed() {
        let mut net = Network::new();
        net.limits.check_msg_limit = 2;
        for i in 0..5 {
            net.build_node(&format!("stray{}", i));
        }
        assert!(mark::mark_flow(&mut net));
        let report = check(&net);
        assert_eq!(report.floating, 5);
        assert_eq!(report.messages.len(), 2);
        assert_eq!(report.suppressed, 3);
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Pluggable stage-delay models.
//!
//! A model computes, for one [`Stage`], the settle time of the destination
//! node and the output edge speed, given the previous stage's time and edge
//! speed and the electrical profile of the stage's transistor/node chain.
//! Three interchangeable implementations share the contract:
//!
//! - [`RcModel`]: lumped series-R times total-C;
//! - [`SlopeModel`]: as RC, but the triggering transistor's effective
//!   resistance and the output edge speed come from its type's
//!   piecewise-linear tables, keyed by the incoming/native edge-speed ratio;
//! - [`PrSlopeModel`]: Penfield-Rubinstein; like the slope model but the
//!   delay is the distributed sum of upstream-R times node-C, a tighter
//!   bound for non-trivial RC trees.
//!
//! Shared numeric edge cases: a chain that cannot conduct in the required
//! direction yields `time = -1`; zero swing capacitance is an analyzer bug
//! (reported; time defaults to the previous stage's, edge speed 0). Ohms
//! times pF gives picoseconds, hence the /1000 to nanoseconds.

use crate::delay::Stage;
use crate::net::{FetId, NEVER};
use crate::network::Network;

/// Rate-limited diagnostics accumulated across model invocations in one
/// analysis run.
#[derive(Debug, Default)]
pub struct ModelDiag {
    pub extrapolations: u64,
    pub zero_cap_reports: u64,
    pub empty_stage_reports: u64,
}

impl ModelDiag {
    fn note_extrapolation(&mut self, ratio: f64) {
        if self.extrapolations == 0 {
            log::warn!(
                "edge-speed ratio {:.3} runs off the slope table; extrapolating \
                 (reported once)",
                ratio
            );
        }
        self.extrapolations += 1;
    }

    fn note_zero_cap(&mut self) {
        if self.zero_cap_reports == 0 {
            log::error!("analyzer bug: stage with zero swing capacitance");
        }
        self.zero_cap_reports += 1;
    }
}

pub trait DelayModel {
    fn name(&self) -> &'static str;

    /// Computes `(time, edge_speed)` for `stage`. Never touches the graph
    /// beyond the stage's own chain and the type tables.
    fn stage_delay(&self, net: &Network, stage: &Stage, diag: &mut ModelDiag) -> (f64, f64);
}

/// Model selection at analysis start: `rc`, `slope`, or `prslope`.
pub fn by_name(name: &str) -> Option<Box<dyn DelayModel>> {
    match name {
        "rc" => Some(Box::new(RcModel)),
        "slope" => Some(Box::new(SlopeModel)),
        "prslope" => Some(Box::new(PrSlopeModel)),
        _ => None,
    }
}

/// One electrical hop of the source-to-destination chain.
struct ProfileHop {
    fet: Option<FetId>,
    /// Aspect-scaled transistor resistance (ohms) of the hop, 0 for the
    /// leading node-only hop.
    r_fet: f64,
    /// Intrinsic interconnect resistance of the hop's node.
    r_node: f64,
    /// Swing capacitance of the hop's node (0 for fixed rails).
    cap: f64,
}

/// Stage chain flattened into electrical order: piece1 runs source-first
/// (entry 0 is the infinitely strong signal source, excluded), then piece2
/// from the triggering transistor to the destination.
struct Profile {
    hops: Vec<ProfileHop>,
    /// Index of the triggering transistor's hop within `hops`.
    trigger: usize,
    /// True when some transistor on the chain cannot conduct in the
    /// direction this stage needs.
    off: bool,
}

fn profile(net: &Network, stage: &Stage) -> Profile {
    let rise = stage.rise;
    let mut hops: Vec<ProfileHop> = Vec::new();
    let mut off = false;
    // piece1's leading entry is the signal source and carries no R or C;
    // the triggering transistor is piece2's first hop.
    let trigger = stage.piece1.len().saturating_sub(1);
    for hop in stage.piece1.iter().skip(1).chain(stage.piece2.iter()) {
        let r_fet = match hop.fet {
            Some(f) => {
                let dev = net.fet(f);
                let r = net.types[dev.kind.0].resistance(rise, dev.aspect);
                if r <= 0.0 {
                    off = true;
                }
                r
            }
            None => 0.0,
        };
        let n = net.node(hop.node);
        let cap = if n.flags.is_fixed() { 0.0 } else { n.cap };
        hops.push(ProfileHop {
            fet: hop.fet,
            r_fet,
            r_node: n.res,
            cap,
        });
    }
    Profile { hops, trigger, off }
}

fn prev_of(stage: &Stage) -> (f64, f64) {
    match &stage.prev {
        Some(p) => (p.time, p.edge_speed),
        None => (0.0, 0.0),
    }
}

/// Slope-table lookup for the triggering transistor: returns the
/// resistance and edge-speed multipliers for the incoming/native ratio.
/// Identity when the stage has no triggering transistor (seed stages).
fn trigger_multipliers(
    net: &Network,
    p: &Profile,
    stage: &Stage,
    native: f64,
    prev_es: f64,
    diag: &mut ModelDiag,
) -> (f64, f64) {
    let Some(fet) = p.hops.get(p.trigger).and_then(|h| h.fet) else {
        return (1.0, 1.0);
    };
    if native <= 0.0 {
        return (1.0, 1.0);
    }
    let ratio = prev_es / native;
    let table = net.fet_type(fet).slope_table(stage.rise);
    let (rm, em, extrapolated) = table.lookup(ratio);
    if extrapolated {
        diag.note_extrapolation(ratio);
    }
    (rm, em)
}

pub struct RcModel;

impl DelayModel for RcModel {
    fn name(&self) -> &'static str {
        "rc"
    }

    fn stage_delay(&self, net: &Network, stage: &Stage, diag: &mut ModelDiag) -> (f64, f64) {
        let (prev_time, _) = prev_of(stage);
        if stage.piece2.is_empty() {
            diag.empty_stage_reports += 1;
            log::error!("analyzer bug: empty stage passed to the rc model");
            return (NEVER, 0.0);
        }
        let p = profile(net, stage);
        if p.off {
            return (NEVER, 0.0);
        }
        let r: f64 = p.hops.iter().map(|h| h.r_fet + h.r_node).sum();
        let c: f64 = p.hops.iter().map(|h| h.cap).sum();
        if c <= 0.0 {
            diag.note_zero_cap();
            return (prev_time, 0.0);
        }
        let d = r * c / 1000.0;
        (prev_time + d, d)
    }
}

pub struct SlopeModel;

impl DelayModel for SlopeModel {
    fn name(&self) -> &'static str {
        "slope"
    }

    fn stage_delay(&self, net: &Network, stage: &Stage, diag: &mut ModelDiag) -> (f64, f64) {
        let (prev_time, prev_es) = prev_of(stage);
        if stage.piece2.is_empty() {
            diag.empty_stage_reports += 1;
            log::error!("analyzer bug: empty stage passed to the slope model");
            return (NEVER, 0.0);
        }
        let p = profile(net, stage);
        if p.off {
            return (NEVER, 0.0);
        }
        let c: f64 = p.hops.iter().map(|h| h.cap).sum();
        if c <= 0.0 {
            diag.note_zero_cap();
            return (prev_time, 0.0);
        }
        let r_plain: f64 = p.hops.iter().map(|h| h.r_fet + h.r_node).sum();
        let native = r_plain * c / 1000.0;
        let (rm, em) = trigger_multipliers(net, &p, stage, native, prev_es, diag);
        // Only the switching device is slope-dependent; pass transistors on
        // the chain are fully on and keep their plain resistance.
        let r_trigger = p.hops[p.trigger].r_fet;
        let r = r_plain + r_trigger * (rm - 1.0);
        (prev_time + r * c / 1000.0, native * em)
    }
}

pub struct PrSlopeModel;

impl DelayModel for PrSlopeModel {
    fn name(&self) -> &'static str {
        "prslope"
    }

    fn stage_delay(&self, net: &Network, stage: &Stage, diag: &mut ModelDiag) -> (f64, f64) {
        let (prev_time, prev_es) = prev_of(stage);
        if stage.piece2.is_empty() {
            diag.empty_stage_reports += 1;
            log::error!("analyzer bug: empty stage passed to the prslope model");
            return (NEVER, 0.0);
        }
        let p = profile(net, stage);
        if p.off {
            return (NEVER, 0.0);
        }
        let c: f64 = p.hops.iter().map(|h| h.cap).sum();
        if c <= 0.0 {
            diag.note_zero_cap();
            return (prev_time, 0.0);
        }
        // Distributed (Elmore) delay: each node sees only the resistance
        // between itself and the signal source.
        let elmore = |trigger_mult: f64| -> f64 {
            let mut upstream = 0.0;
            let mut sum = 0.0;
            for (i, h) in p.hops.iter().enumerate() {
                let mult = if i == p.trigger { trigger_mult } else { 1.0 };
                upstream += h.r_fet * mult + h.r_node;
                sum += upstream * h.cap;
            }
            sum / 1000.0
        };
        let native = elmore(1.0);
        let (rm, em) = trigger_multipliers(net, &p, stage, native, prev_es, diag);
        (prev_time + elmore(rm), native * em)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::StageHop;
    use crate::types::{SlopeTable, TYPE_NENH, TYPE_NLOAD};
    use std::rc::Rc;
    use test_case::test_case;

    /// GND -(nenh)- out stage triggered by a seed transition at t=2.
    fn pulldown_stage(net: &mut Network) -> Stage {
        let inp = net.build_node("in");
        let out = net.build_node("out");
        net.add_cap(out, 0.1);
        let gnd = net.gnd;
        let f = net.build_fet(TYPE_NENH, inp, out, gnd, 8.0, 2.0, (0.0, 0.0));
        let seed = Rc::new(Stage {
            piece1: vec![],
            piece2: vec![StageHop { fet: None, node: inp }],
            rise: true,
            time: 2.0,
            edge_speed: 0.5,
            prev: None,
        });
        Stage {
            piece1: vec![StageHop { fet: None, node: gnd }],
            piece2: vec![StageHop { fet: Some(f), node: out }],
            rise: false,
            time: 0.0,
            edge_speed: 0.0,
            prev: Some(seed),
        }
    }

    #[test]
    fn test_rc_model_lumped_delay() {
        let mut net = Network::new();
        let stage = pulldown_stage(&mut net);
        let mut diag = ModelDiag::default();
        let (time, es) = RcModel.stage_delay(&net, &stage, &mut diag);
        // R = 10000 ohm/sq * 2 squares = 20000; C = 0.1 pF (gate cap on
        // `in` does not load this chain); 20000 * 0.1 / 1000 = 2 ns.
        assert!((time - 4.0).abs() < 1e-9, "time was {}", time);
        assert!((es - 2.0).abs() < 1e-9, "es was {}", es);
    }

    #[test_case("rc")]
    #[test_case("slope")]
    #[test_case("prslope")]
    fn test_all_models_report_off_path_as_never(model: &str) {
        let mut net = Network::new();
        // A load cannot pull down: resist_down is 0, so a falling stage
        // through it is off.
        let inp = net.build_node("in");
        let out = net.build_node("out");
        net.add_cap(out, 0.1);
        let gnd = net.gnd;
        let f = net.build_fet(TYPE_NLOAD, inp, out, gnd, 8.0, 2.0, (0.0, 0.0));
        let stage = Stage {
            piece1: vec![StageHop { fet: None, node: gnd }],
            piece2: vec![StageHop { fet: Some(f), node: out }],
            rise: false,
            time: 0.0,
            edge_speed: 0.0,
            prev: None,
        };
        let model = by_name(model).unwrap();
        let mut diag = ModelDiag::default();
        let (time, es) = model.stage_delay(&net, &stage, &mut diag);
        assert_eq!(time, NEVER);
        assert_eq!(es, 0.0);
    }

    #[test_case("rc")]
    #[test_case("slope")]
    #[test_case("prslope")]
    fn test_all_models_flag_zero_cap(model: &str) {
        let mut net = Network::new();
        let mut stage = pulldown_stage(&mut net);
        // Erase the destination's capacitance: bug condition.
        let out = net.find_node("out").unwrap();
        net.node_mut(out).cap = 0.0;
        stage.time = 0.0;
        let model = by_name(model).unwrap();
        let mut diag = ModelDiag::default();
        let (time, es) = model.stage_delay(&net, &stage, &mut diag);
        assert_eq!(time, 2.0, "defaults to the previous stage's time");
        assert_eq!(es, 0.0);
        assert_eq!(diag.zero_cap_reports, 1);
    }

    #[test]
    fn test_slope_model_tracks_incoming_edge() {
        let mut net = Network::new();
        let stage = pulldown_stage(&mut net);
        let mut diag = ModelDiag::default();
        let (t_rc, _) = RcModel.stage_delay(&net, &stage, &mut diag);
        let (t_slope, es_slope) = SlopeModel.stage_delay(&net, &stage, &mut diag);
        // prev edge 0.5ns over native 2ns = ratio 0.25: resistance
        // multiplier interpolates between 1.0 and 1.05.
        assert!(t_slope > t_rc, "slow incoming edge must not speed the stage up");
        assert!(es_slope > 2.0);
    }

    #[test]
    fn test_prslope_single_lump_matches_slope() {
        // With one node in the chain the distributed sum degenerates to the
        // lumped product, so the two slope models agree.
        let mut net = Network::new();
        let stage = pulldown_stage(&mut net);
        let mut diag = ModelDiag::default();
        let (t_s, es_s) = SlopeModel.stage_delay(&net, &stage, &mut diag);
        let (t_pr, es_pr) = PrSlopeModel.stage_delay(&net, &stage, &mut diag);
        assert!((t_s - t_pr).abs() < 1e-9);
        assert!((es_s - es_pr).abs() < 1e-9);
    }

    #[test]
    fn test_prslope_distributed_is_tighter_on_chains() {
        // Two-hop chain: GND -(f1)- mid -(f2)- out. The distributed sum
        // must come in below lumped R times total C.
        let mut net = Network::new();
        let inp = net.build_node("in");
        let mid = net.build_node("mid");
        let out = net.build_node("out");
        net.add_cap(mid, 0.05);
        net.add_cap(out, 0.1);
        let gnd = net.gnd;
        let f1 = net.build_fet(TYPE_NENH, inp, mid, gnd, 8.0, 2.0, (0.0, 0.0));
        let f2 = net.build_fet(TYPE_NENH, inp, out, mid, 8.0, 2.0, (1.0, 0.0));
        // Flatten both types' tables so only the R/C math differs.
        for ty in net.types.iter_mut() {
            ty.up = SlopeTable::flat();
            ty.down = SlopeTable::flat();
        }
        let stage = Stage {
            piece1: vec![
                StageHop { fet: None, node: gnd },
                StageHop { fet: Some(f1), node: mid },
            ],
            piece2: vec![StageHop { fet: Some(f2), node: out }],
            rise: false,
            time: 0.0,
            edge_speed: 0.0,
            prev: Some(Rc::new(Stage {
                piece1: vec![],
                piece2: vec![StageHop { fet: None, node: inp }],
                rise: true,
                time: 0.0,
                edge_speed: 0.0,
                prev: None,
            })),
        };
        let mut diag = ModelDiag::default();
        let (t_rc, _) = RcModel.stage_delay(&net, &stage, &mut diag);
        let (t_pr, _) = PrSlopeModel.stage_delay(&net, &stage, &mut diag);
        assert!(t_pr < t_rc, "prslope {} should beat lumped {}", t_pr, t_rc);
        assert!(t_pr > 0.0);
    }
}

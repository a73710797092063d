// SPDX-License-Identifier: Apache-2.0

//! Delay-propagation engine: the worst-case timing search.
//!
//! Given a node transition, the engine finds every downstream node the
//! transition can affect, computes the new worst-case settle time through
//! the active delay model, and recurses. Three cooperating searches do the
//! work:
//!
//! - [`chase_vg`] runs from a newly conducting transistor's value-side
//!   terminal backward to a source of 0/1 (rail, input, bus, precharge
//!   point), building `piece1`;
//! - [`chase_gates`] runs forward from the transistor to every reachable
//!   destination, building `piece2`, invoking the model at each node and
//!   recursing into [`propagate`] on every worst-case improvement;
//! - [`chase_loads`] handles transistors turned *off*: it hunts for the
//!   always-on load that now dominates the abandoned node.
//!
//! All three share one [`SearchBudget`]; exhausting it unwinds every frame
//! with a diagnostic instead of hanging on under-annotated pass-transistor
//! meshes. Node worst-case times only ever increase within a run.

use std::rc::Rc;

use crate::crit_path::{PathList, PathRecorder};
use crate::model::{DelayModel, ModelDiag};
use crate::net::{FetId, NodeId};
use crate::network::{Network, SearchBudget};
use crate::types::OnCondition;

/// One hop of a stage piece: the transistor crossed and the node reached.
/// The leading hop of a piece has no transistor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageHop {
    pub fet: Option<FetId>,
    pub node: NodeId,
}

/// One hop of a delay path: the chain between a triggering transition and a
/// settling destination.
///
/// `piece1` runs source-first: entry 0 is the value source (excluded from
/// the electrical sums as infinitely strong), the last entry is the
/// triggering transistor's value-side terminal. `piece2` runs from the
/// triggering transistor to the destination; its last node is the node this
/// stage settles. `prev` points at the stage whose transition triggered
/// this one; the chain of `prev` links is the critical path.
#[derive(Debug, Clone)]
pub struct Stage {
    pub piece1: Vec<StageHop>,
    pub piece2: Vec<StageHop>,
    pub rise: bool,
    pub time: f64,
    pub edge_speed: f64,
    pub prev: Option<Rc<Stage>>,
}

impl Stage {
    /// The node this stage settles, if the stage has gotten that far.
    pub fn settles(&self) -> Option<NodeId> {
        self.piece2.last().map(|h| h.node)
    }

    /// A zero-length stage representing an externally forced transition.
    pub fn seed(node: NodeId, rise: bool, time: f64) -> Self {
        Stage {
            piece1: Vec::new(),
            piece2: vec![StageHop { fet: None, node }],
            rise,
            time,
            edge_speed: 0.0,
            prev: None,
        }
    }
}

/// Per-run state threaded through the searches.
pub struct DelayContext<'a> {
    pub model: &'a dyn DelayModel,
    pub recorder: &'a mut PathRecorder,
    pub budget: SearchBudget,
    pub diag: ModelDiag,
    pub piece_warnings: u64,
    budget_warned: bool,
}

impl<'a> DelayContext<'a> {
    pub fn new(net: &Network, model: &'a dyn DelayModel, recorder: &'a mut PathRecorder) -> Self {
        DelayContext {
            model,
            recorder,
            budget: SearchBudget::new(net.limits.delay_limit),
            diag: ModelDiag::default(),
            piece_warnings: 0,
            budget_warned: false,
        }
    }

    /// Consume one search step; on first exhaustion explain the likely root
    /// cause.
    fn step(&mut self) -> bool {
        if self.budget.step() {
            return true;
        }
        if !self.budget_warned {
            self.budget_warned = true;
            log::warn!(
                "delay search exceeded {} stages; you probably forgot flow \
                 control info (In:/Out: attributes on pass transistors)",
                self.budget.limit
            );
        }
        false
    }

    fn piece_overflow(&mut self, net: &Network) {
        self.piece_warnings += 1;
        if self.piece_warnings <= net.limits.piece_msg_limit {
            log::warn!(
                "more than {} transistors in series; path truncated",
                net.limits.piece_limit
            );
        }
    }
}

/// The inter-run reset: graph transients plus the critical-path archives.
pub fn clear_cmd(net: &mut Network, recorder: &mut PathRecorder) {
    net.clear_all();
    recorder.clear();
}

/// Externally force a node's transition times (an input switching), then
/// propagate the consequences. A single-polarity forcing also settles the
/// gating state of the fets this node controls. Returns false if the stage
/// budget ran out.
pub fn delay_set(net: &mut Network, ctx: &mut DelayContext, node: NodeId, hi: f64, lo: f64) -> bool {
    if hi >= 0.0 {
        net.nodes[node.0].hi_time = hi;
    }
    if lo >= 0.0 {
        net.nodes[node.0].lo_time = lo;
    }
    let level = match (hi >= 0.0, lo >= 0.0) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    };
    if let Some(level) = level {
        force_gated(net, node, level);
    }
    let mut completed = true;
    if hi >= 0.0 {
        completed &= propagate(net, ctx, &Rc::new(Stage::seed(node, true, hi)));
    }
    if lo >= 0.0 {
        completed &= propagate(net, ctx, &Rc::new(Stage::seed(node, false, lo)));
    }
    completed
}

/// Pattern form of [`delay_set`]: exact node name, or a `*` suffix matching
/// by prefix. Returns the number of nodes matched (0 is the caller's
/// problem to report) and the completion flag.
pub fn delay_set_from_str(
    net: &mut Network,
    ctx: &mut DelayContext,
    pattern: &str,
    hi: f64,
    lo: f64,
) -> (usize, bool) {
    let matches: Vec<NodeId> = if let Some(prefix) = pattern.strip_suffix('*') {
        net.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.name.starts_with(prefix))
            .map(|(i, _)| NodeId(i))
            .collect()
    } else {
        net.find_node(pattern).into_iter().collect()
    };
    let mut completed = true;
    for &id in &matches {
        completed &= delay_set(net, ctx, id, hi, lo);
    }
    (matches.len(), completed)
}

/// Settle the gating state of every fet controlled by `node` for a known
/// steady level.
fn force_gated(net: &mut Network, node: NodeId, level: bool) {
    let incident = net.nodes[node.0].fets.clone();
    for fid in incident {
        let fet = &mut net.fets[fid.0];
        if fet.gate != node {
            continue;
        }
        let on = match net.types[fet.kind.0].on_condition {
            OnCondition::Gate1 => level,
            OnCondition::Gate0 => !level,
            OnCondition::Always => continue,
        };
        let fet = &mut net.fets[fid.0];
        fet.flags.forced_on = on;
        fet.flags.forced_off = !on;
    }
}

/// Examine every fet gated by the node `prev` just settled. Transistors the
/// transition could turn on get a value-source chase; transistors it turns
/// off get a load chase on both sides.
pub fn propagate(net: &mut Network, ctx: &mut DelayContext, prev: &Rc<Stage>) -> bool {
    let Some(settled) = prev.settles() else {
        return true;
    };
    if net.nodes[settled.0].flags.blocked {
        return true;
    }
    let rise = prev.rise;
    let mut completed = true;
    let incident = net.nodes[settled.0].fets.clone();
    for fid in incident {
        let (turns_on, source, drain) = {
            let fet = &net.fets[fid.0];
            if fet.gate != settled {
                continue;
            }
            let turns_on = match net.types[fet.kind.0].on_condition {
                OnCondition::Gate1 => rise,
                OnCondition::Gate0 => !rise,
                OnCondition::Always => continue,
            };
            (turns_on, fet.source, fet.drain)
        };
        if turns_on {
            for (from, to) in [(source, drain), (drain, source)] {
                let start = {
                    let fet = &net.fets[fid.0];
                    fet.flows_from(from) && !fet.no_info_at(from)
                };
                if start {
                    let mut stage = Stage {
                        piece1: vec![StageHop { fet: None, node: from }],
                        piece2: Vec::new(),
                        rise: false,
                        time: 0.0,
                        edge_speed: 0.0,
                        prev: Some(prev.clone()),
                    };
                    completed &= chase_vg(net, ctx, &mut stage, fid, to);
                }
            }
        } else {
            completed &= chase_loads(net, ctx, source, prev);
            completed &= chase_loads(net, ctx, drain, prev);
        }
    }
    completed
}

fn reverse_piece(piece: &[StageHop]) -> Vec<StageHop> {
    let len = piece.len();
    let mut rev = Vec::with_capacity(len);
    rev.push(StageHop {
        fet: None,
        node: piece[len - 1].node,
    });
    for j in 1..len {
        rev.push(StageHop {
            fet: piece[len - j].fet,
            node: piece[len - j - 1].node,
        });
    }
    rev
}

/// DFS from the triggering transistor's value-side terminal backward toward
/// a source of 0/1, growing `stage.piece1` in search order. On reaching a
/// source the piece is reversed source-first and [`chase_gates`] takes over
/// on the destination side — once per polarity the source can supply.
pub fn chase_vg(
    net: &mut Network,
    ctx: &mut DelayContext,
    stage: &mut Stage,
    trigger: FetId,
    dest_start: NodeId,
) -> bool {
    if !ctx.step() {
        return false;
    }
    let Some(n) = stage.piece1.last().map(|h| h.node) else {
        log::error!("analyzer bug: value-source chase with an empty piece");
        return true;
    };
    let flags = net.nodes[n.0].flags;
    if flags.blocked {
        return true;
    }
    if flags.supplies_value() || net.is_bus(n) {
        let polarities: &[bool] = if flags.fixed_one || (flags.precharged && !flags.is_fixed()) {
            &[true]
        } else if flags.fixed_zero || flags.predischarged {
            &[false]
        } else {
            &[true, false] // input or bus: could swing either way
        };
        let mut completed = true;
        for &rise in polarities {
            let mut s = stage.clone();
            s.piece1 = reverse_piece(&stage.piece1);
            s.rise = rise;
            s.piece2 = vec![StageHop {
                fet: Some(trigger),
                node: dest_start,
            }];
            completed &= chase_gates(net, ctx, &mut s);
        }
        return completed;
    }
    if flags.in_path {
        return true; // cycle on the source side: nothing on this branch
    }
    if stage.piece1.len() - 1 >= net.limits.piece_limit {
        ctx.piece_overflow(net);
        return true;
    }
    net.nodes[n.0].flags.in_path = true;
    let mut completed = true;
    let incident = net.nodes[n.0].fets.clone();
    for fid in incident {
        if fid == trigger {
            continue;
        }
        let far = {
            let fet = &net.fets[fid.0];
            let Some(far) = fet.other_terminal(n) else {
                continue;
            };
            if fet.flags.forced_off || !fet.flows_from(far) || fet.no_info_at(far) {
                continue;
            }
            far
        };
        if !crate::flow::lock(net, fid, far) {
            continue;
        }
        stage.piece1.push(StageHop {
            fet: Some(fid),
            node: far,
        });
        completed &= chase_vg(net, ctx, stage, trigger, dest_start);
        stage.piece1.pop();
        crate::flow::unlock(net, fid, far);
    }
    net.nodes[n.0].flags.in_path = false;
    completed
}

/// DFS forward from the triggering transistor toward every reachable
/// destination, extending `stage.piece2`. Each node reached gets a model
/// evaluation; strictly-worse settle times update the node and recurse into
/// [`propagate`]. A node already mid-path that is not fixed is a memory
/// feedback loop, recorded and abandoned. Buses end the stage: propagation
/// beyond them restarts as a separate stage when the bus itself settles.
pub fn chase_gates(net: &mut Network, ctx: &mut DelayContext, stage: &mut Stage) -> bool {
    if !ctx.step() {
        return false;
    }
    let Some(m) = stage.piece2.last().map(|h| h.node) else {
        log::error!("analyzer bug: destination chase with an empty piece");
        return true;
    };
    let mflags = net.nodes[m.0].flags;
    if mflags.is_fixed() {
        return true; // a stage cannot settle a rail
    }
    if mflags.in_path {
        let (time, es) = ctx.model.stage_delay(net, stage, &mut ctx.diag);
        if time >= 0.0 {
            stage.time = time;
            stage.edge_speed = es;
            ctx.recorder.record(net, stage, PathList::Memory);
        }
        return true;
    }
    let (time, es) = ctx.model.stage_delay(net, stage, &mut ctx.diag);
    if time < 0.0 {
        return true; // chain cannot conduct in this direction
    }
    stage.time = time;
    stage.edge_speed = es;

    let updated = {
        let node = &mut net.nodes[m.0];
        if stage.rise {
            if time > node.hi_time {
                node.hi_time = time;
                true
            } else {
                false
            }
        } else if time > node.lo_time {
            node.lo_time = time;
            true
        } else {
            false
        }
    };
    let mut completed = true;
    if updated {
        ctx.recorder.record(net, stage, PathList::Any);
        if mflags.watched {
            ctx.recorder.record(net, stage, PathList::Watched);
        }
        let frozen = Rc::new(stage.clone());
        completed &= propagate(net, ctx, &frozen);
    }
    // A bus decouples delay computation at its boundary; blocked nodes end
    // the stage outright.
    if net.is_bus(m) || mflags.blocked {
        return completed;
    }
    if stage.piece2.len() >= net.limits.piece_limit {
        ctx.piece_overflow(net);
        return completed;
    }
    net.nodes[m.0].flags.in_path = true;
    let trigger = stage.piece2[0].fet;
    let incident = net.nodes[m.0].fets.clone();
    for fid in incident {
        if Some(fid) == trigger {
            continue;
        }
        let far = {
            let fet = &net.fets[fid.0];
            let Some(far) = fet.other_terminal(m) else {
                continue;
            };
            let ty = &net.types[fet.kind.0];
            let conducting = !fet.flags.forced_off
                && (fet.flags.forced_on || ty.on_condition == OnCondition::Always);
            if !conducting || !fet.flows_from(m) || fet.no_info_at(m) {
                continue;
            }
            far
        };
        // Never extend into a rail or an externally driven node.
        let far_flags = net.nodes[far.0].flags;
        if far_flags.is_fixed() || far_flags.input {
            continue;
        }
        if !crate::flow::lock(net, fid, m) {
            continue;
        }
        stage.piece2.push(StageHop {
            fet: Some(fid),
            node: far,
        });
        completed &= chase_gates(net, ctx, stage);
        stage.piece2.pop();
        crate::flow::unlock(net, fid, m);
    }
    net.nodes[m.0].flags.in_path = false;
    completed
}

/// A transistor that was driving `n` just turned off: look for the
/// always-on load that now dominates. If none is attached directly, recurse
/// through non-fixed neighbors until one is found or the search exhausts.
/// Meeting our own path again is an AND-type circular memory, reported to
/// the memory list.
pub fn chase_loads(
    net: &mut Network,
    ctx: &mut DelayContext,
    n: NodeId,
    prev: &Rc<Stage>,
) -> bool {
    if !ctx.step() {
        return false;
    }
    let flags = net.nodes[n.0].flags;
    if flags.is_fixed() || flags.input || flags.blocked {
        return true;
    }
    if flags.in_path {
        if prev.time >= 0.0 {
            let s = Stage {
                piece1: Vec::new(),
                piece2: vec![StageHop { fet: None, node: n }],
                rise: prev.rise,
                time: prev.time,
                edge_speed: prev.edge_speed,
                prev: Some(prev.clone()),
            };
            ctx.recorder.record(net, &s, PathList::Memory);
        }
        return true;
    }

    // Directly attached always-on load connected to a settled node?
    let mut found = false;
    let mut completed = true;
    let incident = net.nodes[n.0].fets.clone();
    for fid in incident.iter().copied() {
        let (far, rise) = {
            let fet = &net.fets[fid.0];
            let Some(far) = fet.other_terminal(n) else {
                continue;
            };
            if fet.flags.forced_off
                || net.types[fet.kind.0].on_condition != OnCondition::Always
            {
                continue;
            }
            let far_flags = net.nodes[far.0].flags;
            if !far_flags.is_fixed() {
                continue;
            }
            (far, far_flags.fixed_one)
        };
        found = true;
        let mut stage = Stage {
            piece1: vec![StageHop { fet: None, node: far }],
            piece2: vec![StageHop {
                fet: Some(fid),
                node: n,
            }],
            rise,
            time: 0.0,
            edge_speed: 0.0,
            prev: Some(prev.clone()),
        };
        completed &= chase_gates(net, ctx, &mut stage);
    }
    if found {
        return completed;
    }

    net.nodes[n.0].flags.in_path = true;
    for fid in incident {
        let far = {
            let fet = &net.fets[fid.0];
            let Some(far) = fet.other_terminal(n) else {
                continue;
            };
            if fet.flags.forced_off || net.nodes[far.0].flags.is_fixed() {
                continue;
            }
            far
        };
        if !crate::flow::lock(net, fid, far) {
            continue;
        }
        completed &= chase_loads(net, ctx, far, prev);
        crate::flow::unlock(net, fid, far);
    }
    net.nodes[n.0].flags.in_path = false;
    completed
}

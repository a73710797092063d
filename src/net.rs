// SPDX-License-Identifier: Apache-2.0

//! Core graph model for the timing analyzer: circuit nets (`Node`), MOS
//! transistors (`Fet`), and the flow-control groups (`Flow`) used to
//! disambiguate bidirectional pass-transistor conduction.
//!
//! All storage is arena-indexed: the owning [`crate::network::Network`] holds
//! `Vec<Node>` / `Vec<Fet>` / `Vec<Flow>` and everything else refers to
//! entries by the newtype ids below.

use crate::types::TypeId;

/// Index into `Network::nodes`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(pub usize);

/// Index into `Network::fets`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct FetId(pub usize);

/// Index into `Network::flows`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct FlowId(pub usize);

/// Sentinel meaning "this node has never been seen to transition".
pub const NEVER: f64 = -1.0;

/// Per-node flag set.
///
/// `fixed_zero`/`fixed_one` are mutually exclusive; assertion conflicts are
/// resolved by the mark pass ("1 wins") with a warning. `in_path` is the
/// cycle guard used by every recursive graph search and must be false on
/// every node whenever no search is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub fixed_zero: bool,
    pub fixed_one: bool,
    pub input: bool,
    pub output: bool,
    pub bus: bool,
    pub precharged: bool,
    pub predischarged: bool,
    pub dynamic: bool,
    pub watched: bool,
    pub blocked: bool,
    pub in_path: bool,
    pub ratio_error: bool,
}

impl NodeFlags {
    /// True if the node is permanently settled at a known level.
    pub fn is_fixed(&self) -> bool {
        self.fixed_zero || self.fixed_one
    }

    /// True if a search arriving here has found a source of signal value:
    /// either a settled level or a boundary the user declared (input, bus,
    /// precharge point).
    pub fn supplies_value(&self) -> bool {
        self.is_fixed() || self.input || self.bus || self.precharged || self.predischarged
    }
}

/// A circuit net.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Lumped capacitance in pF.
    pub cap: f64,
    /// Lumped interconnect resistance in ohms.
    pub res: f64,
    /// Worst-case time (ns) at which this node can rise; [`NEVER`] if it
    /// cannot. Updated monotonically: a candidate only overwrites a
    /// strictly greater value.
    pub hi_time: f64,
    /// Worst-case fall time (ns); same discipline as `hi_time`.
    pub lo_time: f64,
    pub flags: NodeFlags,
    /// Every fet touching this node (as gate, source, or drain), deduped.
    pub fets: Vec<FetId>,
}

impl Node {
    pub fn new(name: String) -> Self {
        Node {
            name,
            cap: 0.0,
            res: 0.0,
            hi_time: NEVER,
            lo_time: NEVER,
            flags: NodeFlags::default(),
            fets: Vec::new(),
        }
    }
}

/// Per-fet flag set.
///
/// The flow bits are recomputed from scratch on every mark pass; the forced
/// bits are transient per-analysis state cleared by `Network::clear_all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetFlags {
    /// Information can flow out of the source terminal toward the drain.
    pub flow_from_source: bool,
    /// Information can flow out of the drain terminal toward the source.
    pub flow_from_drain: bool,
    /// Gate level is known and turns this fet on.
    pub forced_on: bool,
    /// Gate level is known and turns this fet off.
    pub forced_off: bool,
    /// User hint: nothing useful ever arrives via the source terminal.
    pub no_source_info: bool,
    /// User hint: nothing useful ever arrives via the drain terminal.
    pub no_drain_info: bool,
}

/// Membership of a fet in a flow-control group. `on_source` records which
/// terminal carried the attribute; an `InOnly` policy admits traversals
/// entering at that terminal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowLink {
    pub flow: FlowId,
    pub on_source: bool,
}

/// A MOS transistor: a conditional conductor between `source` and `drain`,
/// controlled by `gate`.
#[derive(Debug, Clone)]
pub struct Fet {
    pub kind: TypeId,
    pub gate: NodeId,
    pub source: NodeId,
    pub drain: NodeId,
    /// Gate area in square microns.
    pub area: f64,
    /// Aspect ratio length/width; series resistance scales with this.
    pub aspect: f64,
    /// Layout location, for diagnostics only.
    pub location: (f64, f64),
    pub flags: FetFlags,
    pub flows: Vec<FlowLink>,
}

impl Fet {
    /// The terminal opposite `node`, or `None` if `node` is not a
    /// source/drain terminal of this fet.
    pub fn other_terminal(&self, node: NodeId) -> Option<NodeId> {
        if node == self.source {
            Some(self.drain)
        } else if node == self.drain {
            Some(self.source)
        } else {
            None
        }
    }

    /// True if this fet connects to `node` via source or drain (gate-only
    /// connections do not conduct).
    pub fn has_terminal(&self, node: NodeId) -> bool {
        self.source == node || self.drain == node
    }

    /// True if information may flow out of `from` through this fet.
    pub fn flows_from(&self, from: NodeId) -> bool {
        if from == self.source {
            self.flags.flow_from_source
        } else if from == self.drain {
            self.flags.flow_from_drain
        } else {
            false
        }
    }

    /// True if the user hinted that no information arrives via `terminal`.
    pub fn no_info_at(&self, terminal: NodeId) -> bool {
        (terminal == self.source && self.flags.no_source_info)
            || (terminal == self.drain && self.flags.no_drain_info)
    }
}

/// Global policy for a flow-control group, set by the user per named group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlowPolicy {
    /// Resolved only by runtime lock contention.
    #[default]
    Normal,
    /// Traversals may enter only at the attributed terminal.
    InOnly,
    /// Traversals may enter only at the unattributed terminal.
    OutOnly,
    /// Group has no effect.
    Ignore,
    /// Member fets never conduct.
    Off,
}

/// A named flow-control group. `entered`/`left` are the transient lock
/// state: while either is non-null a traversal is inside the group and
/// entries from the opposite side are refused. Both must be null whenever
/// no search is in flight.
#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub policy: FlowPolicy,
    pub entered: Option<NodeId>,
    pub left: Option<NodeId>,
}

impl Flow {
    pub fn new(name: String) -> Self {
        Flow {
            name,
            policy: FlowPolicy::Normal,
            entered: None,
            left: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.entered.is_some() || self.left.is_some()
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Per-transistor-class electrical parameters ("types").
//!
//! A [`FetType`] describes one class of transistor: when it conducts, how
//! strongly it pulls each way, its parasitic capacitance contributions, its
//! plain effective resistances, and the piecewise-linear slope tables used by
//! the slope-aware delay models. Types are immutable during analysis; the
//! only mutation path is an explicit user edit before marking.

use once_cell::sync::Lazy;

/// Index into `Network::types`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TypeId(pub usize);

/// Hard cap on the number of transistor classes, built-in plus user-defined.
pub const MAX_TYPES: usize = 64;

/// Number of sample points in a slope table.
pub const SLOPE_POINTS: usize = 10;

/// Gate condition under which a fet of this type conducts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnCondition {
    /// Conducts when the gate is high (n-channel enhancement).
    Gate1,
    /// Conducts when the gate is low (p-channel).
    Gate0,
    /// Always conducts (depletion loads).
    Always,
}

/// Piecewise-linear table keyed by the ratio of incoming edge speed to the
/// stage's native edge speed. Two parallel outputs per sample point: an
/// effective-resistance multiplier and an output-edge-speed multiplier.
///
/// Lookups interpolate linearly between adjacent points and extrapolate off
/// the top end using the last two points (the caller rate-limits the
/// extrapolation warning).
#[derive(Debug, Clone, PartialEq)]
pub struct SlopeTable {
    pub ratio: Vec<f64>,
    pub resistance: Vec<f64>,
    pub edge_speed: Vec<f64>,
}

impl SlopeTable {
    /// A table that reproduces plain RC behavior at every ratio.
    pub fn flat() -> Self {
        let ratio: Vec<f64> = (0..SLOPE_POINTS).map(|i| i as f64).collect();
        SlopeTable {
            ratio,
            resistance: vec![1.0; SLOPE_POINTS],
            edge_speed: vec![1.0; SLOPE_POINTS],
        }
    }

    /// Default shape: slow incoming edges raise the effective resistance of
    /// the switching device and slow the output edge.
    pub fn standard() -> Self {
        SlopeTable {
            ratio: vec![0.0, 0.5, 1.0, 1.5, 2.0, 3.0, 4.0, 6.0, 8.0, 10.0],
            resistance: vec![1.0, 1.05, 1.1, 1.2, 1.3, 1.5, 1.7, 2.1, 2.5, 2.9],
            edge_speed: vec![1.0, 1.1, 1.2, 1.35, 1.5, 1.8, 2.1, 2.7, 3.3, 3.9],
        }
    }

    /// Interpolated `(resistance multiplier, edge-speed multiplier)` at
    /// `ratio`. Returns `extrapolated = true` when `ratio` runs off the top
    /// of the table and the last two points were extended instead.
    pub fn lookup(&self, ratio: f64) -> (f64, f64, bool) {
        debug_assert!(self.ratio.len() >= 2, "slope table needs at least two points");
        let n = self.ratio.len();
        if ratio <= self.ratio[0] {
            return (self.resistance[0], self.edge_speed[0], false);
        }
        for i in 1..n {
            if ratio <= self.ratio[i] {
                let t = (ratio - self.ratio[i - 1]) / (self.ratio[i] - self.ratio[i - 1]);
                return (
                    self.resistance[i - 1] + t * (self.resistance[i] - self.resistance[i - 1]),
                    self.edge_speed[i - 1] + t * (self.edge_speed[i] - self.edge_speed[i - 1]),
                    false,
                );
            }
        }
        // Off the top end: extend the segment defined by the last two points.
        let t = (ratio - self.ratio[n - 2]) / (self.ratio[n - 1] - self.ratio[n - 2]);
        (
            self.resistance[n - 2] + t * (self.resistance[n - 1] - self.resistance[n - 2]),
            self.edge_speed[n - 2] + t * (self.edge_speed[n - 1] - self.edge_speed[n - 2]),
            true,
        )
    }
}

/// One transistor class.
#[derive(Debug, Clone, PartialEq)]
pub struct FetType {
    pub name: String,
    pub on_condition: OnCondition,
    /// Pull strength toward 1, used for strength competition in the mark
    /// pass. Strictly greater wins; equal strength preserves the status quo.
    pub strength_hi: f64,
    /// Pull strength toward 0.
    pub strength_lo: f64,
    /// Gate capacitance per square micron of area, pF.
    pub cap_per_area: f64,
    /// Overlap capacitance per micron of width, pF.
    pub cap_per_width: f64,
    /// Effective pull-up resistance, ohms per square; 0 means this type can
    /// never pull toward 1.
    pub resist_up: f64,
    /// Effective pull-down resistance, ohms per square; 0 means this type
    /// can never pull toward 0.
    pub resist_down: f64,
    pub up: SlopeTable,
    pub down: SlopeTable,
}

impl FetType {
    /// Series resistance in the given direction for a device of `aspect`
    /// length/width squares. 0.0 means "off in that direction".
    pub fn resistance(&self, rise: bool, aspect: f64) -> f64 {
        let per_square = if rise { self.resist_up } else { self.resist_down };
        per_square * aspect
    }

    pub fn slope_table(&self, rise: bool) -> &SlopeTable {
        if rise {
            &self.up
        } else {
            &self.down
        }
    }

    pub fn strength(&self, toward_one: bool) -> f64 {
        if toward_one {
            self.strength_hi
        } else {
            self.strength_lo
        }
    }
}

fn builtin(name: &str, on: OnCondition, s_hi: f64, s_lo: f64, r_up: f64, r_down: f64) -> FetType {
    FetType {
        name: name.to_string(),
        on_condition: on,
        strength_hi: s_hi,
        strength_lo: s_lo,
        cap_per_area: 0.0004,
        cap_per_width: 0.0002,
        resist_up: r_up,
        resist_down: r_down,
        up: SlopeTable::standard(),
        down: SlopeTable::standard(),
    }
}

/// Built-in type table template, cloned into each new `Network`. Indices are
/// stable: user types append after these.
pub static BUILTIN_TYPES: Lazy<Vec<FetType>> = Lazy::new(|| {
    vec![
        // n-enhancement: strong pulldown, weak (threshold-dropped) pullup.
        builtin("nenh", OnCondition::Gate1, 4.0, 6.0, 40_000.0, 10_000.0),
        // n-enhancement whose gate is only ever pass-driven; weaker.
        builtin("nenhp", OnCondition::Gate1, 3.0, 5.0, 50_000.0, 14_000.0),
        // Depletion load: always on, pulls up only.
        builtin("ndep", OnCondition::Always, 2.0, 0.0, 40_000.0, 0.0),
        // Explicit load device.
        builtin("nload", OnCondition::Always, 2.0, 0.0, 40_000.0, 0.0),
        // Super buffer: strong both ways.
        builtin("nsuper", OnCondition::Gate1, 8.0, 8.0, 10_000.0, 6_000.0),
        // Plain n-channel (CMOS).
        builtin("nchan", OnCondition::Gate1, 4.0, 6.0, 40_000.0, 10_000.0),
        // p-channel: conducts on low gate, pulls up.
        builtin("pchan", OnCondition::Gate0, 6.0, 4.0, 20_000.0, 60_000.0),
    ]
});

/// Indices of the built-in types within [`BUILTIN_TYPES`].
pub const TYPE_NENH: TypeId = TypeId(0);
pub const TYPE_NENHP: TypeId = TypeId(1);
pub const TYPE_NDEP: TypeId = TypeId(2);
pub const TYPE_NLOAD: TypeId = TypeId(3);
pub const TYPE_NSUPER: TypeId = TypeId(4);
pub const TYPE_NCHAN: TypeId = TypeId(5);
pub const TYPE_PCHAN: TypeId = TypeId(6);

// SPDX-License-Identifier: Apache-2.0

//! Static timing analysis for MOS transistor-level circuits.
//!
//! The library loads a `.sim` netlist into an arena-indexed graph of nodes
//! and transistors ([`network::Network`]), marks signal-flow directions and
//! known logic levels ([`mark`]), then propagates worst-case rise/fall
//! times from user-supplied input transitions ([`delay`]) under a pluggable
//! delay model ([`model`]). The worst paths found are archived by
//! [`crit_path::PathRecorder`]; [`check`] provides static electrical
//! sanity and nMOS ratio checks.

pub mod att;
pub mod check;
pub mod crit_path;
pub mod delay;
pub mod flow;
pub mod mark;
pub mod model;
pub mod net;
pub mod network;
pub mod sim;
pub mod types;

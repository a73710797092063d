// SPDX-License-Identifier: Apache-2.0

//! Critical-path recording.
//!
//! The delay engine reports every stage that worsens a node's settle time.
//! The recorder keeps the most interesting of them in three lanes: the
//! overall worst paths, paths ending in memory feedback loops, and paths
//! settling watched nodes. Recorded paths are converted to a self-contained,
//! name-resolved form so they stay printable and dumpable after the graph
//! is cleared or rebuilt.

use std::fmt::Write as _;
use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};

use crate::delay::Stage;
use crate::network::Network;

/// Which archive a path lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathList {
    /// Worst settle times anywhere in the circuit.
    Any,
    /// Paths that closed a memory feedback loop.
    Memory,
    /// Paths settling nodes the user flagged as watched.
    Watched,
}

impl PathList {
    fn index(self) -> usize {
        match self {
            PathList::Any => 0,
            PathList::Memory => 1,
            PathList::Watched => 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PathList::Any => "any",
            PathList::Memory => "memory",
            PathList::Watched => "watched",
        }
    }

    fn from_label(s: &str) -> Option<Self> {
        match s {
            "any" => Some(PathList::Any),
            "memory" => Some(PathList::Memory),
            "watched" => Some(PathList::Watched),
            _ => None,
        }
    }
}

/// One hop of an archived path, with names resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CritHop {
    pub node: String,
    pub cap: f64,
    /// Label of the transistor crossed into this node, e.g. `nenh@3,7`.
    pub fet: Option<String>,
    pub aspect: f64,
}

/// An archived stage; `prev` chains back to the transition that started the
/// path.
#[derive(Debug, Clone, PartialEq)]
pub struct CritStage {
    pub piece1: Vec<CritHop>,
    pub piece2: Vec<CritHop>,
    pub rise: bool,
    pub time: f64,
    pub edge_speed: f64,
    pub prev: Option<Box<CritStage>>,
}

impl CritStage {
    /// The name of the node this stage settles.
    pub fn settles(&self) -> &str {
        self.piece2
            .last()
            .map(|h| h.node.as_str())
            .unwrap_or("?")
    }

    fn depth(&self) -> usize {
        1 + self.prev.as_ref().map_or(0, |p| p.depth())
    }
}

/// One archive: paths sorted ascending by settle time.
#[derive(Debug, Default)]
pub struct PathLane {
    pub paths: Vec<CritStage>,
    pub duplicates: u64,
    capacity: usize,
}

impl PathLane {
    fn with_capacity(capacity: usize) -> Self {
        PathLane {
            paths: Vec::new(),
            duplicates: 0,
            capacity,
        }
    }
}

#[derive(Debug)]
pub struct PathRecorder {
    lanes: [PathLane; 3],
}

/// Two times within 0.1% of each other count as the same event.
fn same_time(a: f64, b: f64) -> bool {
    (a - b).abs() <= 0.001 * a.abs().max(b.abs())
}

impl PathRecorder {
    pub fn new(capacity: usize) -> Self {
        PathRecorder {
            lanes: [
                PathLane::with_capacity(capacity),
                PathLane::with_capacity(capacity),
                PathLane::with_capacity(capacity),
            ],
        }
    }

    pub fn lane(&self, list: PathList) -> &PathLane {
        &self.lanes[list.index()]
    }

    pub fn clear(&mut self) {
        for lane in &mut self.lanes {
            lane.paths.clear();
            lane.duplicates = 0;
        }
    }

    /// Consider a live stage for an archive. Paths that cannot displace the
    /// lane's weakest entry are dropped without conversion; a path settling
    /// in the same direction at essentially the same time as an existing
    /// entry, whatever node it settles, only bumps the duplicate counter.
    pub fn record(&mut self, net: &Network, stage: &Stage, list: PathList) {
        let lane = &mut self.lanes[list.index()];
        if lane.capacity == 0 {
            return;
        }
        let time = stage.time;
        if lane.paths.len() >= lane.capacity
            && time <= lane.paths.first().map_or(f64::NEG_INFINITY, |p| p.time)
        {
            return;
        }
        if lane
            .paths
            .iter()
            .any(|p| p.rise == stage.rise && same_time(p.time, time))
        {
            lane.duplicates += 1;
            return;
        }
        let settle = stage
            .settles()
            .map(|n| net.node_name(n))
            .unwrap_or("?");
        if let Some(pos) = lane
            .paths
            .iter()
            .position(|p| p.rise == stage.rise && p.settles() == settle)
        {
            if time <= lane.paths[pos].time {
                lane.duplicates += 1;
                return;
            }
            lane.paths.remove(pos);
        }
        let archived = archive_stage(net, stage);
        let at = lane
            .paths
            .partition_point(|p| p.time <= archived.time);
        lane.paths.insert(at, archived);
        if lane.paths.len() > lane.capacity {
            lane.paths.remove(0);
        }
    }

    /// Human-readable rendering of one lane, worst path first.
    pub fn format_lane(&self, list: PathList) -> String {
        let lane = self.lane(list);
        let mut out = String::new();
        if lane.paths.is_empty() {
            let _ = writeln!(out, "no {} paths recorded", list.label());
            return out;
        }
        for stage in lane.paths.iter().rev() {
            out.push_str(&format_path(stage));
        }
        if lane.duplicates > 0 {
            let _ = writeln!(out, "({} near-duplicate paths suppressed)", lane.duplicates);
        }
        out
    }

    /// Write every lane in the text archive format.
    pub fn dump(&self, w: &mut dyn Write) -> Result<()> {
        writeln!(w, "critdump 1")?;
        for list in [PathList::Any, PathList::Memory, PathList::Watched] {
            let lane = self.lane(list);
            writeln!(
                w,
                "lane {} {} {}",
                list.label(),
                lane.paths.len(),
                lane.duplicates
            )?;
            for path in &lane.paths {
                writeln!(w, "path {}", path.depth())?;
                // Stages are written root-first so undump can rebuild the
                // prev chain in one pass.
                let mut chain = Vec::new();
                let mut cur = Some(path);
                while let Some(s) = cur {
                    chain.push(s);
                    cur = s.prev.as_deref();
                }
                for stage in chain.into_iter().rev() {
                    write_stage(w, stage)?;
                }
            }
        }
        Ok(())
    }

    /// Rebuild a recorder from a [`dump`](Self::dump) archive.
    pub fn undump(r: &mut dyn BufRead, capacity: usize) -> Result<Self> {
        let mut lines = r.lines();
        let header = lines
            .next()
            .context("empty path archive")?
            .context("read error")?;
        if header.trim() != "critdump 1" {
            bail!("not a path archive: bad header '{}'", header.trim());
        }
        let mut rec = PathRecorder::new(capacity);
        let mut lineno = 1usize;
        loop {
            let line = match lines.next() {
                Some(l) => {
                    lineno += 1;
                    l.context("read error")?
                }
                None => break,
            };
            let mut toks = line.split_whitespace();
            match toks.next() {
                Some("lane") => {
                    let label = toks.next().with_context(|| format!("line {}: lane needs a label", lineno))?;
                    let list = PathList::from_label(label)
                        .with_context(|| format!("line {}: unknown lane '{}'", lineno, label))?;
                    let count: usize = parse_tok(toks.next(), "path count", lineno)?;
                    let dups: u64 = parse_tok(toks.next(), "duplicate count", lineno)?;
                    let lane = &mut rec.lanes[list.index()];
                    lane.duplicates = dups;
                    for _ in 0..count {
                        let header = lines
                            .next()
                            .with_context(|| format!("line {}: truncated archive", lineno))?
                            .context("read error")?;
                        lineno += 1;
                        let mut t = header.split_whitespace();
                        if t.next() != Some("path") {
                            bail!("line {}: expected 'path', got '{}'", lineno, header.trim());
                        }
                        let depth: usize = parse_tok(t.next(), "stage count", lineno)?;
                        let mut chain: Option<Box<CritStage>> = None;
                        for _ in 0..depth {
                            let stage = read_stage(&mut lines, &mut lineno, chain.take())?;
                            chain = Some(Box::new(stage));
                        }
                        let stage = *chain.context("empty path in archive")?;
                        let at = lane.paths.partition_point(|p| p.time <= stage.time);
                        lane.paths.insert(at, stage);
                    }
                }
                None => continue,
                Some(other) => bail!("line {}: unexpected '{}'", lineno, other),
            }
        }
        Ok(rec)
    }
}

fn parse_tok<T: std::str::FromStr>(tok: Option<&str>, what: &str, lineno: usize) -> Result<T> {
    let tok = tok.with_context(|| format!("line {}: missing {}", lineno, what))?;
    tok.parse()
        .map_err(|_| anyhow::anyhow!("line {}: bad {} '{}'", lineno, what, tok))
}

fn archive_hop(net: &Network, hop: &crate::delay::StageHop) -> CritHop {
    let node = net.node(hop.node);
    match hop.fet {
        Some(fid) => {
            let fet = net.fet(fid);
            let ty = net.fet_type(fid);
            CritHop {
                node: node.name.clone(),
                cap: node.cap,
                fet: Some(format!("{}@{},{}", ty.name, fet.location.0, fet.location.1)),
                aspect: fet.aspect,
            }
        }
        None => CritHop {
            node: node.name.clone(),
            cap: node.cap,
            fet: None,
            aspect: 0.0,
        },
    }
}

fn archive_stage(net: &Network, stage: &Stage) -> CritStage {
    CritStage {
        piece1: stage.piece1.iter().map(|h| archive_hop(net, h)).collect(),
        piece2: stage.piece2.iter().map(|h| archive_hop(net, h)).collect(),
        rise: stage.rise,
        time: stage.time,
        edge_speed: stage.edge_speed,
        prev: stage
            .prev
            .as_ref()
            .map(|p| Box::new(archive_stage(net, p))),
    }
}

fn write_stage(w: &mut dyn Write, stage: &CritStage) -> Result<()> {
    writeln!(
        w,
        "stage {} {} {} {} {}",
        stage.piece1.len(),
        stage.piece2.len(),
        if stage.rise { 1 } else { 0 },
        stage.time,
        stage.edge_speed
    )?;
    for (tag, piece) in [("h1", &stage.piece1), ("h2", &stage.piece2)] {
        for hop in piece.iter() {
            writeln!(
                w,
                "{} {} {} {} {}",
                tag,
                hop.node,
                hop.cap,
                hop.fet.as_deref().unwrap_or("-"),
                hop.aspect
            )?;
        }
    }
    Ok(())
}

fn read_stage(
    lines: &mut std::io::Lines<&mut dyn BufRead>,
    lineno: &mut usize,
    prev: Option<Box<CritStage>>,
) -> Result<CritStage> {
    let header = lines
        .next()
        .with_context(|| format!("line {}: truncated stage", lineno))?
        .context("read error")?;
    *lineno += 1;
    let mut t = header.split_whitespace();
    if t.next() != Some("stage") {
        bail!("line {}: expected 'stage', got '{}'", lineno, header.trim());
    }
    let p1: usize = parse_tok(t.next(), "piece1 size", *lineno)?;
    let p2: usize = parse_tok(t.next(), "piece2 size", *lineno)?;
    let rise: u8 = parse_tok(t.next(), "direction", *lineno)?;
    let time: f64 = parse_tok(t.next(), "time", *lineno)?;
    let edge_speed: f64 = parse_tok(t.next(), "edge speed", *lineno)?;
    let mut stage = CritStage {
        piece1: Vec::with_capacity(p1),
        piece2: Vec::with_capacity(p2),
        rise: rise != 0,
        time,
        edge_speed,
        prev,
    };
    for (tag, want) in [("h1", p1), ("h2", p2)] {
        for _ in 0..want {
            let line = lines
                .next()
                .with_context(|| format!("line {}: truncated hop list", lineno))?
                .context("read error")?;
            *lineno += 1;
            let mut t = line.split_whitespace();
            if t.next() != Some(tag) {
                bail!("line {}: expected '{}' hop, got '{}'", lineno, tag, line.trim());
            }
            let node = t
                .next()
                .with_context(|| format!("line {}: hop needs a node name", lineno))?
                .to_string();
            let cap: f64 = parse_tok(t.next(), "hop capacitance", *lineno)?;
            let fet_tok = t
                .next()
                .with_context(|| format!("line {}: hop needs a fet label", lineno))?;
            let fet = if fet_tok == "-" {
                None
            } else {
                Some(fet_tok.to_string())
            };
            let aspect: f64 = parse_tok(t.next(), "hop aspect", *lineno)?;
            let hop = CritHop { node, cap, fet, aspect };
            if tag == "h1" {
                stage.piece1.push(hop);
            } else {
                stage.piece2.push(hop);
            }
        }
    }
    Ok(stage)
}

/// Render one archived path, final stage first, chaining back through the
/// transitions that triggered it.
pub fn format_path(path: &CritStage) -> String {
    let mut out = String::new();
    let mut cur = Some(path);
    let mut first = true;
    while let Some(stage) = cur {
        let verb = if stage.rise { "rises" } else { "falls" };
        if first {
            let _ = writeln!(
                out,
                "{} {} at {:.2}ns (edge speed {:.2}ns/v)",
                stage.settles(),
                verb,
                stage.time,
                stage.edge_speed
            );
            first = false;
        } else {
            let _ = writeln!(
                out,
                "  ... triggered by {} {} at {:.2}ns",
                stage.settles(),
                verb,
                stage.time
            );
        }
        for hop in stage.piece2.iter().rev().skip(1) {
            let _ = writeln!(out, "      through {} ({:.3}pF)", hop.node, hop.cap);
        }
        if let Some(source) = stage.piece1.first() {
            let label = stage
                .piece2
                .first()
                .and_then(|h| h.fet.as_deref())
                .unwrap_or("-");
            let _ = writeln!(out, "      driven from {} via {}", source.node, label);
        }
        cur = stage.prev.as_deref();
    }
    out
}

// SPDX-License-Identifier: Apache-2.0

//! Reader for `.sim` transistor netlists.
//!
//! One record per line. Fet records start with a type letter:
//!
//! ```text
//! e gate source drain length width [x y] [g=attr] [s=attr] [d=attr]
//! ```
//!
//! with `e` enhancement, `d` depletion, `n` n-channel, `p` p-channel.
//! Lengths and widths are in centimicrons; the device aspect is
//! length/width. `C a b value` and `C a value` add femtofarads of lumped
//! capacitance, `R node ohms` adds interconnect resistance, `A node attr...`
//! sets node attributes, and `|` begins a comment.

use std::fmt;
use std::path::Path;

use anyhow::Context;

use crate::att;
use crate::network::Network;

#[derive(Debug)]
pub struct SimError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sim line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for SimError {}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub lines: usize,
    pub fets: usize,
    pub caps: usize,
    pub resists: usize,
    pub attrs: usize,
}

fn err(line: usize, message: impl Into<String>) -> SimError {
    SimError {
        line,
        message: message.into(),
    }
}

fn parse_f64(tok: &str, what: &str, line: usize) -> Result<f64, SimError> {
    tok.parse()
        .map_err(|_| err(line, format!("bad {} '{}'", what, tok)))
}

/// Parse `.sim` text into the network. Stops at the first malformed line.
pub fn read_sim(net: &mut Network, text: &str) -> Result<SimStats, SimError> {
    let mut stats = SimStats::default();
    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('|') {
            continue;
        }
        stats.lines += 1;
        let mut toks = line.split_whitespace();
        let head = toks.next().unwrap_or("");
        match head {
            "e" | "d" | "n" | "p" => {
                read_fet(net, head, &mut toks, lineno)?;
                stats.fets += 1;
            }
            "C" => {
                let a = toks.next().ok_or_else(|| err(lineno, "C needs a node"))?;
                let second = toks
                    .next()
                    .ok_or_else(|| err(lineno, "C needs a value"))?;
                let third = toks.next();
                // Three-token form couples two nodes; credit the cap to
                // both since either may switch against the other.
                let (nodes, value_tok): (Vec<&str>, &str) = match third {
                    Some(v) => (vec![a, second], v),
                    None => (vec![a], second),
                };
                let ff = parse_f64(value_tok, "capacitance", lineno)?;
                for name in nodes {
                    let id = net.build_node(name);
                    net.add_cap(id, ff / 1000.0); // fF -> pF
                }
                stats.caps += 1;
            }
            "R" => {
                let name = toks.next().ok_or_else(|| err(lineno, "R needs a node"))?;
                let ohms = toks
                    .next()
                    .ok_or_else(|| err(lineno, "R needs a value"))?;
                let ohms = parse_f64(ohms, "resistance", lineno)?;
                let id = net.build_node(name);
                net.add_res(id, ohms);
                stats.resists += 1;
            }
            "A" => {
                let name = toks.next().ok_or_else(|| err(lineno, "A needs a node"))?;
                let id = net.build_node(name);
                let mut any = false;
                for attr in toks {
                    att::node_attr(net, id, attr);
                    any = true;
                }
                if !any {
                    return Err(err(lineno, "A needs at least one attribute"));
                }
                stats.attrs += 1;
            }
            other => {
                return Err(err(lineno, format!("unrecognized record '{}'", other)));
            }
        }
    }
    Ok(stats)
}

fn read_fet<'a>(
    net: &mut Network,
    kind_ch: &str,
    toks: &mut impl Iterator<Item = &'a str>,
    lineno: usize,
) -> Result<(), SimError> {
    let type_name = match kind_ch {
        "e" => "nenh",
        "d" => "ndep",
        "n" => "nchan",
        "p" => "pchan",
        _ => unreachable!(),
    };
    let kind = net
        .find_type(type_name)
        .ok_or_else(|| err(lineno, format!("unknown device type '{}'", type_name)))?;
    let mut need = |what: &str| {
        toks.next()
            .ok_or_else(|| err(lineno, format!("fet record needs {}", what)))
    };
    let gate = need("a gate node")?.to_string();
    let source = need("a source node")?.to_string();
    let drain = need("a drain node")?.to_string();
    let length = parse_f64(need("a length")?, "length", lineno)?;
    let width = parse_f64(need("a width")?, "width", lineno)?;
    if width <= 0.0 || length <= 0.0 {
        return Err(err(lineno, "length and width must be positive"));
    }

    let mut coords: Vec<f64> = Vec::new();
    let mut attrs: Vec<(char, String)> = Vec::new();
    for tok in toks {
        if let Some((lhs, rhs)) = tok.split_once('=') {
            let side = match lhs {
                "g" => 'g',
                "s" => 's',
                "d" => 'd',
                _ => return Err(err(lineno, format!("unknown attribute target '{}'", lhs))),
            };
            for attr in rhs.split(',').filter(|a| !a.is_empty()) {
                attrs.push((side, attr.to_string()));
            }
        } else if coords.len() < 2 {
            coords.push(parse_f64(tok, "coordinate", lineno)?);
        } else {
            return Err(err(lineno, format!("unexpected token '{}'", tok)));
        }
    }
    let x = coords.first().copied().unwrap_or(0.0);
    let y = coords.get(1).copied().unwrap_or(0.0);

    let gate = net.build_node(&gate);
    let source = net.build_node(&source);
    let drain = net.build_node(&drain);
    let fid = net.build_fet(
        kind,
        gate,
        source,
        drain,
        length * width,
        length / width,
        (x, y),
    );
    for (side, attr) in attrs {
        match side {
            'g' => att::node_attr(net, gate, &attr),
            's' => att::terminal_attr(net, fid, true, &attr),
            'd' => att::terminal_attr(net, fid, false, &attr),
            _ => unreachable!(),
        }
    }
    Ok(())
}

/// Read a `.sim` file from disk into the network.
pub fn read_sim_file(net: &mut Network, path: &Path) -> anyhow::Result<SimStats> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let stats = read_sim(net, &text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::FlowPolicy;

    const INVERTER: &str = "\
| units: 100 tech: nmos
d out out Vdd 8 2 10 20
e in out GND 2 4 10 30
C out 50
A in in
A out out
";

    #[test]
    fn test_reads_inverter() {
        let mut net = Network::new();
        let stats = read_sim(&mut net, INVERTER).unwrap();
        assert_eq!(stats.fets, 2);
        assert_eq!(stats.caps, 1);
        assert_eq!(stats.attrs, 2);
        let out = net.find_node("out").unwrap();
        let inp = net.find_node("in").unwrap();
        assert!(net.node(inp).flags.input);
        assert!(net.node(out).flags.output);
        // 50 fF lumped plus the depletion load's own gate cap (it gates
        // itself from `out`): 0.0004 pF per unit area times 16.
        assert!((net.node(out).cap - 0.0564).abs() < 1e-9);
        assert!(net.node(inp).cap > 0.0);
        // Depletion load: aspect 4.0; pulldown: aspect 0.5.
        let load = net.fet(crate::net::FetId(0));
        assert_eq!(load.aspect, 4.0);
        let pd = net.fet(crate::net::FetId(1));
        assert_eq!(pd.aspect, 0.5);
    }

    #[test]
    fn test_coupling_cap_credits_both_nodes() {
        let mut net = Network::new();
        read_sim(&mut net, "C a b 100\n").unwrap();
        let a = net.find_node("a").unwrap();
        let b = net.find_node("b").unwrap();
        assert!((net.node(a).cap - 0.1).abs() < 1e-9);
        assert!((net.node(b).cap - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_terminal_attributes_create_flows() {
        let mut net = Network::new();
        read_sim(&mut net, "e sel busL busR 2 2 0 0 s=In:col d=NoInfo\n").unwrap();
        let flow = net.find_flow("col").expect("flow group created");
        assert_eq!(net.flow(flow).policy, FlowPolicy::InOnly);
        let fet = net.fet(crate::net::FetId(0));
        assert_eq!(fet.flows.len(), 1);
        assert!(fet.flows[0].on_source);
        assert!(fet.flags.no_drain_info);
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let mut net = Network::new();
        let e = read_sim(&mut net, "| ok\nC out
").unwrap_err();
        assert_eq!(e.line, 2);
        assert!(e.to_string().contains("line 2"));
    }

    #[test]
    fn test_unknown_record_rejected() {
        let mut net = Network::new();
        let e = read_sim(&mut net, "Q foo bar\n").unwrap_err();
        assert!(e.message.contains("unrecognized"));
    }
}

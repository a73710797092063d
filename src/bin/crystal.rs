// SPDX-License-Identifier: Apache-2.0

//! Command line driver: load a `.sim` netlist, run the marking pass, apply
//! input transitions, and report the worst-case critical paths.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;

use crystal::crit_path::{PathList, PathRecorder};
use crystal::delay::{self, DelayContext};
use crystal::network::Network;
use crystal::{check, mark, model, sim};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input transistor netlist in .sim format
    #[arg(required_unless_present = "undump")]
    sim: Option<PathBuf>,
    /// Delay model: rc, slope, or prslope
    #[arg(long, default_value = "rc")]
    model: String,
    /// Input transition, e.g. `phi1=1@0` (node phi1 rises at t=0ns);
    /// repeatable. A trailing `*` in the name matches by prefix.
    #[arg(long = "input")]
    inputs: Vec<String>,
    /// Watch a node: paths settling it go to a dedicated archive
    #[arg(long = "watch")]
    watches: Vec<String>,
    /// How many paths each archive keeps
    #[arg(long, default_value_t = 5)]
    paths: usize,
    /// Run the static electrical checks
    #[arg(long)]
    check: bool,
    /// Run the nMOS pullup/pulldown ratio check
    #[arg(long)]
    ratio: bool,
    /// Write the critical-path archives to FILE after analysis
    #[arg(long)]
    dump: Option<PathBuf>,
    /// Print a previously dumped archive and exit
    #[arg(long)]
    undump: Option<PathBuf>,
    /// Emit a machine-readable summary on stdout
    #[arg(long)]
    stats_json: bool,
}

#[derive(Serialize)]
struct Summary {
    nodes: usize,
    fets: usize,
    transitions: usize,
    search_completed: bool,
    mark_completed: bool,
    paths_recorded: usize,
    duplicate_paths: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    check_problems: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ratio_errors: Option<usize>,
}

/// Parse `name=level@time`, e.g. `phi1=1@0` or `col*=0@2.5`.
fn parse_input(spec: &str) -> Result<(String, bool, f64)> {
    let (name, rest) = spec
        .split_once('=')
        .with_context(|| format!("bad input spec '{}': expected name=level@time", spec))?;
    let (level, time) = rest
        .split_once('@')
        .with_context(|| format!("bad input spec '{}': expected name=level@time", spec))?;
    let level = match level {
        "1" => true,
        "0" => false,
        other => bail!("bad input level '{}' in '{}': use 0 or 1", other, spec),
    };
    let time: f64 = time
        .parse()
        .with_context(|| format!("bad input time in '{}'", spec))?;
    if time < 0.0 {
        bail!("input time must be nonnegative in '{}'", spec);
    }
    Ok((name.to_string(), level, time))
}

fn print_undump(path: &PathBuf, capacity: usize) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let rec = PathRecorder::undump(&mut (&mut reader as &mut dyn std::io::BufRead), capacity)?;
    for lane in [PathList::Any, PathList::Memory, PathList::Watched] {
        print!("{}", rec.format_lane(lane));
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    if let Some(archive) = &args.undump {
        return print_undump(archive, args.paths);
    }
    let sim_path = args.sim.as_ref().expect("clap enforces sim or --undump");

    let mut net = Network::new();
    net.limits.path_capacity = args.paths;
    let stats = sim::read_sim_file(&mut net, sim_path)?;
    log::info!(
        "read {}: {} fets, {} nodes",
        sim_path.display(),
        stats.fets,
        net.nodes.len()
    );

    for name in &args.watches {
        match net.find_node(name) {
            Some(id) => net.node_mut(id).flags.watched = true,
            None => log::warn!("watch target '{}' not in the netlist", name),
        }
    }

    let model = model::by_name(&args.model)
        .with_context(|| format!("unknown delay model '{}'", args.model))?;

    let mark_completed = mark::mark_flow(&mut net);

    if args.check {
        let report = check::check(&net);
        print!("{}", report.render());
    }
    let ratio_errors = if args.ratio {
        let report = check::ratio_cmd(&mut net);
        for m in &report.messages {
            println!("{}", m);
        }
        Some(report.errors)
    } else {
        None
    };

    let mut recorder = PathRecorder::new(args.paths);
    let mut search_completed = true;
    let mut transitions = 0usize;
    {
        let mut ctx = DelayContext::new(&net, model.as_ref(), &mut recorder);
        for spec in &args.inputs {
            let (pattern, level, time) = parse_input(spec)?;
            let (hi, lo) = if level {
                (time, crystal::net::NEVER)
            } else {
                (crystal::net::NEVER, time)
            };
            let (matched, completed) =
                delay::delay_set_from_str(&mut net, &mut ctx, &pattern, hi, lo);
            if matched == 0 {
                log::warn!("input '{}' matched no nodes", pattern);
            }
            transitions += matched;
            search_completed &= completed;
        }
    }

    if !args.inputs.is_empty() {
        print!("{}", recorder.format_lane(PathList::Any));
        if !recorder.lane(PathList::Memory).paths.is_empty() {
            println!("memory feedback paths:");
            print!("{}", recorder.format_lane(PathList::Memory));
        }
        if !args.watches.is_empty() {
            println!("watched paths:");
            print!("{}", recorder.format_lane(PathList::Watched));
        }
    }

    if let Some(path) = &args.dump {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut w = BufWriter::new(file);
        recorder.dump(&mut w)?;
        w.flush()?;
    }

    if args.stats_json {
        let check_problems = if args.check {
            Some(check::check(&net).problem_count())
        } else {
            None
        };
        let summary = Summary {
            nodes: net.nodes.len(),
            fets: net.fets.len(),
            transitions,
            search_completed,
            mark_completed,
            paths_recorded: recorder.lane(PathList::Any).paths.len(),
            duplicate_paths: recorder.lane(PathList::Any).duplicates,
            check_problems,
            ratio_errors,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn main() -> ExitCode {
    let _ = env_logger::builder().try_init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("crystal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

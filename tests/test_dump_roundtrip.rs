// SPDX-License-Identifier: Apache-2.0

//! Critical-path archives written to disk must read back equivalent and
//! re-dump byte-identically.

use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use crystal::crit_path::{PathList, PathRecorder};
use crystal::delay::{self, DelayContext};
use crystal::mark;
use crystal::model::RcModel;
use crystal::net::NEVER;
use crystal::network::Network;
use crystal::sim::read_sim;

const NETLIST: &str = "\
d mid mid Vdd 8 2 0 0
e in mid GND 2 4 0 1
d out out Vdd 8 2 1 0
e mid out GND 2 4 1 1
C mid 50
C out 100
A in in
A out out
";

#[test]
fn test_archive_round_trips_through_a_file() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut net = Network::new();
    read_sim(&mut net, NETLIST).unwrap();
    assert!(mark::mark_flow(&mut net));
    let model = RcModel;
    let mut recorder = PathRecorder::new(net.limits.path_capacity);
    {
        let mut ctx = DelayContext::new(&net, &model, &mut recorder);
        delay::delay_set_from_str(&mut net, &mut ctx, "in", 0.0, NEVER);
    }
    assert!(!recorder.lane(PathList::Any).paths.is_empty());

    let mut file = NamedTempFile::new().unwrap();
    let mut first = Vec::new();
    recorder.dump(&mut first).unwrap();
    file.write_all(&first).unwrap();
    file.flush().unwrap();

    file.seek(SeekFrom::Start(0)).unwrap();
    let mut reader = BufReader::new(file.as_file());
    let restored = PathRecorder::undump(
        &mut (&mut reader as &mut dyn BufRead),
        net.limits.path_capacity,
    )
    .unwrap();

    assert_eq!(
        restored.lane(PathList::Any).paths,
        recorder.lane(PathList::Any).paths
    );

    let mut second = Vec::new();
    restored.dump(&mut second).unwrap();
    assert_eq!(first, second, "re-dump must be byte-identical");

    // The restored archive still formats without the original network.
    drop(net);
    let text = restored.format_lane(PathList::Any);
    assert!(text.contains("out"), "{}", text);
}

#[test]
fn test_undump_rejects_garbage() {
    let mut reader = BufReader::new("not an archive\n".as_bytes());
    let err = PathRecorder::undump(&mut (&mut reader as &mut dyn BufRead), 5).unwrap_err();
    assert!(err.to_string().contains("bad header"), "{}", err);
}

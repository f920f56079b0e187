// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Payloads to report on a simulated library pair: `toy-0` runs in constant time, `toy-2` is
//! slower on the KyberSlash trigger ciphertext.

use std::fs;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use kyberslash_bench::adapters::{NativeDudectAdapter, ToolAdapter, WelchAdapter};
use kyberslash_bench::confusion::summarize;
use kyberslash_bench::kyber::{fixed_ciphertext, DEFAULT_SLOW_COEFFICIENT, KYBER512_DK_BYTES};
use kyberslash_bench::measure::{measure_collection, Measurer};
use kyberslash_bench::payload::{generate_batch, PayloadKind, PayloadOpts, RandomKeySource};
use kyberslash_bench::report::{analyze_scenario, write_reports, Attribute};
use kyberslash_bench::runner::{ConsoleState, RunEvent};
use kyberslash_bench::samples::{collection_name, read_timing_csv, timing_file_path, Class};
use kyberslash_bench::verdicts::{collect_verdicts, verdicts_path, CollectOpts, VerdictTable};
use kyberslash_bench::{CsvLayout, LibraryVariant, Result};

const PER_CLASS: usize = 100;
const DATASETS: usize = 2;

/// Uniform noise plus a fixed penalty on the trigger ciphertext when `leaky`
struct ToyDecaps {
    leaky: bool,
    rng: ChaCha20Rng,
}

impl Measurer for ToyDecaps {
    fn measure(&mut self, payload: &[u8]) -> Result<u64> {
        let slow = payload[KYBER512_DK_BYTES..] == fixed_ciphertext(DEFAULT_SLOW_COEFFICIENT)[..];
        let penalty = if self.leaky && slow { 400 } else { 0 };
        Ok(10_000 + self.rng.gen_range(0..100) + penalty)
    }
}

fn libraries() -> Vec<LibraryVariant> {
    vec![LibraryVariant::c("toy-0"), LibraryVariant::c("toy-2")]
}

fn build_timings(payload_root: &Path, timing_root: &Path) {
    let opts = PayloadOpts {
        kind: PayloadKind::KyberSlash,
        per_class: PER_CLASS,
        seed: Some(100),
        ..Default::default()
    };
    let files =
        generate_batch(&opts, payload_root, 0, DATASETS, &mut RandomKeySource::seeded(5)).unwrap();
    assert_eq!(files.len(), DATASETS);

    for i in 0..DATASETS {
        for (j, lib) in libraries().iter().enumerate() {
            let mut m = ToyDecaps {
                leaky: lib.is_leaky(),
                rng: ChaCha20Rng::seed_from_u64((10 * i + j) as u64),
            };
            let data = measure_collection(
                payload_root,
                &collection_name(PER_CLASS, i),
                opts.kind,
                &lib.name,
                &mut m,
                50,
                timing_root,
            )
            .unwrap();
            assert_eq!(data.count(Class::X), PER_CLASS);
            assert_eq!(data.count(Class::Y), PER_CLASS);
        }
    }
}

#[test]
fn timings_land_in_both_layouts() {
    let payloads = tempfile::tempdir().unwrap();
    let timings = tempfile::tempdir().unwrap();
    build_timings(payloads.path(), timings.path());

    let index = timing_file_path(timings.path(), "100_1", "toy-2", CsvLayout::Index);
    let no_index = timing_file_path(timings.path(), "100_1", "toy-2", CsvLayout::NoIndex);
    assert_eq!(read_timing_csv(&index).unwrap(), read_timing_csv(&no_index).unwrap());
    assert!(fs::read_to_string(&index).unwrap().starts_with("0;"));
}

#[test]
fn detectors_separate_the_toy_libraries() {
    let payloads = tempfile::tempdir().unwrap();
    let timings = tempfile::tempdir().unwrap();
    let verdict_dir = tempfile::tempdir().unwrap();
    let reports = tempfile::tempdir().unwrap();
    build_timings(payloads.path(), timings.path());

    let libs = libraries();
    let opts = CollectOpts {
        timing_root: timings.path(),
        per_class: PER_CLASS,
        datasets: 0..DATASETS,
        libraries: &libs,
    };
    let tools: Vec<Box<dyn ToolAdapter>> = vec![
        Box::new(WelchAdapter::default()),
        Box::new(NativeDudectAdapter::default()),
    ];

    let mut console = ConsoleState::new(Vec::new(), "dataset");
    let table = collect_verdicts(&opts, &tools, |e| console.on_event(e)).unwrap();
    let out = String::from_utf8(console.into_inner()).unwrap();
    assert!(out.starts_with("\nrunning 4 datasets\n"));
    assert!(out.contains("dataset 100_1 toy-2 ... : Welch=leak dudect-native=leak\n"));

    assert_eq!(table.tools, ["Welch", "dudect-native"]);
    let indices: Vec<usize> = table.rows.iter().map(|r| r.index).collect();
    assert_eq!(indices, [0, 1, 2, 3]);
    assert_eq!(table.truth(), [false, true, false, true]);
    assert_eq!(table.column(0), table.truth());

    table.write_csv(&verdicts_path(verdict_dir.path(), PER_CLASS)).unwrap();
    assert_eq!(
        VerdictTable::read_csv(&verdicts_path(verdict_dir.path(), PER_CLASS)).unwrap(),
        table
    );
    for s in summarize(&table).unwrap() {
        assert_eq!((s.tp, s.tn, s.fp, s.fn_), (2, 2, 0, 0), "{}", s.tool);
        assert_eq!(s.mcc, 1.0);
    }

    // The 200 size has no verdicts and is skipped
    let mut events = Vec::new();
    let report = analyze_scenario("Toy", verdict_dir.path(), &[PER_CLASS, 200], |e| {
        events.push(e);
        Ok(())
    })
    .unwrap();
    assert_eq!(report.sizes.len(), 1);
    assert_eq!(events.len(), 5);
    assert_eq!(events[0], RunEvent::Begin(vec!["100".into(), "200".into()]));
    assert_eq!(report.mean_of(Attribute::Accuracy), 1.0);

    let written = write_reports(reports.path(), &[report]).unwrap();
    assert_eq!(written.len(), 5);
    let mcc = fs::read_to_string(reports.path().join("MCC_toy.csv")).unwrap();
    assert_eq!(
        mcc,
        "Samples per class;MCC threshold;Welch t-test;dudect-native\n100;0.5;1.0000;1.0000\n"
    );
}

#[test]
fn broken_timing_file_counts_as_no_leak() {
    let payloads = tempfile::tempdir().unwrap();
    let timings = tempfile::tempdir().unwrap();
    build_timings(payloads.path(), timings.path());

    let broken = timing_file_path(timings.path(), "100_0", "toy-2", CsvLayout::NoIndex);
    fs::write(&broken, "X;1\nX;2\n").unwrap();

    let libs = libraries();
    let opts = CollectOpts {
        timing_root: timings.path(),
        per_class: PER_CLASS,
        datasets: 0..DATASETS,
        libraries: &libs,
    };
    let tools: Vec<Box<dyn ToolAdapter>> = vec![Box::new(WelchAdapter::default())];
    let mut console = ConsoleState::new(Vec::new(), "dataset");
    let table = collect_verdicts(&opts, &tools, |e| console.on_event(e)).unwrap();
    let out = String::from_utf8(console.into_inner()).unwrap();
    assert!(out.contains("dataset 100_0 toy-2 ... : Welch=? (no leak)\n"));

    // Row 1 (dataset 0, toy-2) stays in the table as a missed leak
    let indices: Vec<usize> = table.rows.iter().map(|r| r.index).collect();
    assert_eq!(indices, [0, 1, 2, 3]);
    assert!(table.rows[1].truth);
    assert_eq!(table.rows[1].verdicts, [false]);

    let welch = &summarize(&table).unwrap()[0];
    assert_eq!((welch.tp, welch.tn, welch.fp, welch.fn_), (1, 2, 0, 1));
}

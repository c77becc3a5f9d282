#![allow(missing_docs)]

//! Cooperative-abort scenario: the flag raised mid-generation stops every
//! worker, and the exporter output remains a valid, closed file.
//!
//! Kept in its own test binary: the abort flag is process-wide.

use evgen::generator;
use evgen::params::ParameterBag;
use evgen::run::{RunParameters, Runner};
use std::sync::atomic::{AtomicU64, Ordering};

#[test]
fn abort_mid_generation_leaves_a_valid_export() {
    generator::clear_abort();
    let dump_path = std::env::temp_dir().join(format!("evgen-abort-{}.txt", std::process::id()));

    // the two-body process carries a full event record, so every accepted
    // event reaches the dump exporter
    let process = evgen::processes::factory()
        .read()
        .unwrap()
        .build("twobody", &ParameterBag::new())
        .unwrap();
    let mut params = RunParameters::new(process);
    params.integrator = ParameterBag::new()
        .with("mod_name", "plain")
        .with("ncvg", 5_000_i64)
        .with("seed", 8_i64);
    params.generation.num_threads = 2;
    params.generation.print_every = 0;
    params.generation.seed = 60_601;
    params.exporters = vec![evgen::exporter::factory()
        .read()
        .unwrap()
        .build(
            "dump",
            &ParameterBag::new().with("filename", dump_path.to_str().unwrap()),
        )
        .unwrap()];

    let mut runner = Runner::new(params).unwrap();
    let seen = AtomicU64::new(0);
    let total = runner
        .generate(
            1_000_000,
            Some(&move |_event: Option<&evgen::event::Event>, count: u64| {
                seen.fetch_max(count, Ordering::Relaxed);
                if count >= 100 {
                    generator::abort();
                }
            }),
        )
        .unwrap();
    generator::clear_abort();

    assert!(total >= 100, "aborted before the callback threshold: {total}");
    assert!(total < 1_000_000, "the abort flag was ignored");

    // the exporter flushed on drop, the file is complete and parsable
    drop(runner);
    let content = std::fs::read_to_string(&dump_path).unwrap();
    let records = content.matches("--- event").count() as u64;
    assert_eq!(records, total);
    let _ = std::fs::remove_file(&dump_path);
}

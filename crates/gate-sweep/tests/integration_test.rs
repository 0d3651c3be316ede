use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use sweep_core::{Measurement, SpectroscopyRecord};
use sweep_io::{RunStore, SweepMode, SweepRecord};

const FAST: &[&str] = &[
    "--ramp-delay-ms",
    "0",
    "--settle-ms",
    "0",
    "--sample-delay-ms",
    "0",
    "--samples",
    "2",
];

fn gate_sweep(out_dir: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gate-sweep"))
        .args(FAST)
        .arg("--out-dir")
        .arg(out_dir)
        .args(extra)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to start gate-sweep")
}

fn saved_records(dir: &Path) -> Vec<PathBuf> {
    RunStore::new(dir).list().expect("run directory should be readable")
}

fn audit_events(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("audit log should exist")
        .lines()
        .map(|line| {
            let entry: serde_json::Value = serde_json::from_str(line).unwrap();
            entry["event_type"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn transport_sweep_saves_record() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let output = gate_sweep(
        dir.path(),
        &[
            "--run-name",
            "it-transport",
            "--count",
            "11",
            "--temperature",
            "4.2",
            "--audit-log",
            audit.to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "{output:?}");

    let records = saved_records(dir.path());
    assert_eq!(records.len(), 1);
    let record: SweepRecord<Measurement> = RunStore::new(dir.path()).load(&records[0]).unwrap();
    assert_eq!(record.run.run_name, "it-transport");
    assert_eq!(record.run.mode, SweepMode::Transport);
    assert_eq!(record.run.temperature_k, Some(4.2));
    assert!(!record.run.is_aborted());
    assert_eq!(record.result.points.len(), 11);
    assert!(record.result.is_complete());
    assert!(record.result.points[5].reading.scalar("resistance").is_some());

    let events = audit_events(&audit);
    assert_eq!(events.first().map(String::as_str), Some("system_start"));
    assert_eq!(events.iter().filter(|e| *e == "point_recorded").count(), 11);
    for expected in ["sweep_start", "sweep_complete", "ramp_to_safe", "record_saved"] {
        assert!(events.iter().any(|e| e == expected), "missing {expected}");
    }
    assert_eq!(events.last().map(String::as_str), Some("system_shutdown"));
}

#[test]
fn instrument_failure_keeps_partial_record() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    // Two channels, two samples: four reads per point, so the 26th read
    // fails while measuring the seventh point.
    let output = gate_sweep(
        dir.path(),
        &[
            "--run-name",
            "it-fault",
            "--count",
            "10",
            "--fault-after",
            "25",
            "--audit-log",
            audit.to_str().unwrap(),
        ],
    );
    assert!(!output.status.success());

    let records = saved_records(dir.path());
    assert_eq!(records.len(), 1);
    let record: SweepRecord<Measurement> = RunStore::new(dir.path()).load(&records[0]).unwrap();
    assert!(record.run.is_aborted());
    assert_eq!(record.result.points.len(), 6);
    assert!(!record.result.is_complete());

    let events = audit_events(&audit);
    assert!(events.iter().any(|e| e == "sweep_aborted"));
    assert!(events.iter().any(|e| e == "ramp_to_safe"));
}

#[test]
fn spectroscopy_sweep_saves_traces() {
    let dir = tempfile::tempdir().unwrap();
    let output = gate_sweep(
        dir.path(),
        &["--mode", "sts", "--start", "0", "--end", "1", "--count", "3"],
    );
    assert!(output.status.success(), "{output:?}");

    let records = saved_records(dir.path());
    let record: SweepRecord<SpectroscopyRecord> =
        RunStore::new(dir.path()).load(&records[0]).unwrap();
    assert_eq!(record.run.mode, SweepMode::Sts);
    assert_eq!(record.result.setpoints(), vec![0.0, 0.5, 1.0]);
    assert_eq!(record.result.stats.triggers, 3);
    for point in &record.result.points {
        assert!(point.reading.trace("LI Demod 1 X (A)").is_some());
    }
}

#[test]
fn out_of_range_axis_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = gate_sweep(
        dir.path(),
        &["--start", "0", "--end", "12", "--count", "5", "--max-gate", "10"],
    );
    assert!(!output.status.success());
    assert!(saved_records(dir.path()).is_empty());
}

#[test]
fn oversized_axis_and_ramp_fail_cleanly() {
    for extra in [
        &["--step", "1e-300"][..],
        &["--count", "18446744073709551615"][..],
        &["--count", "5", "--ramp-step", "1e-9"][..],
    ] {
        let dir = tempfile::tempdir().unwrap();
        let output = gate_sweep(dir.path(), extra);
        assert_eq!(output.status.code(), Some(1), "{extra:?}: {output:?}");
        assert!(saved_records(dir.path()).is_empty());
    }
}

#[test]
fn bad_arguments_exit_with_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = gate_sweep(dir.path(), &["--count", "lots"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--count"));
}

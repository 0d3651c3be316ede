//! Audit trail for sweep runs.
//!
//! Every gate movement that matters for the device (sweep start, each
//! recorded point, aborts and the final ramp to the safe value) is appended
//! to a JSONL file that survives the process. Entries carry a sequence
//! number that continues across reopens of the same file.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SystemStart,
    SweepStart,
    /// One axis point ramped, settled and measured
    PointRecorded,
    SweepComplete,
    /// Sweep ended early; details carry the error and completed count
    SweepAborted,
    RampToSafe,
    RecordSaved,
    SystemShutdown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stamp {
    pub monotonic_us: u64,
    pub unix_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub run: String,
    pub monotonic_us: u64,
    pub unix_us: u64,
    pub event_type: AuditEventType,
    pub details: serde_json::Value,
}

struct Sink {
    writer: BufWriter<File>,
    next_seq: u64,
}

/// JSONL journal shared by everything that touches the gate during a run.
pub struct AuditLogger {
    run: String,
    sink: Mutex<Sink>,
}

impl AuditLogger {
    /// Opens `path` for appending, creating parent directories. Sequence
    /// numbers resume after the entries already in the file.
    pub fn open(path: &Path, run: impl Into<String>) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let next_seq = match File::open(path) {
            Ok(existing) => BufReader::new(existing)
                .lines()
                .map_while(Result::ok)
                .filter(|line| !line.trim().is_empty())
                .count() as u64,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            run: run.into(),
            sink: Mutex::new(Sink {
                writer: BufWriter::new(file),
                next_seq,
            }),
        })
    }

    /// Appends one event and flushes it; returns its sequence number.
    pub fn append(
        &self,
        stamp: Stamp,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> io::Result<u64> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = AuditEntry {
            seq: sink.next_seq,
            run: self.run.clone(),
            monotonic_us: stamp.monotonic_us,
            unix_us: stamp.unix_us,
            event_type,
            details,
        };
        serde_json::to_writer(&mut sink.writer, &entry)?;
        sink.writer.write_all(b"\n")?;
        sink.writer.flush()?;
        sink.next_seq += 1;
        Ok(entry.seq)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepStartDetails<'a> {
    pub device_id: &'a str,
    pub mode: &'a str,
    pub points: usize,
    pub first: f64,
    pub last: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointDetails<'a> {
    pub index: usize,
    pub setpoint: f64,
    pub samples: usize,
    /// Scalar values of the point, by name
    pub values: Vec<(&'a str, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepAbortedDetails {
    pub error: String,
    pub completed: usize,
    pub total: usize,
}

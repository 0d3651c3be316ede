//! Versioned on-disk record of one sweep run.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use sweep_core::{Measurement, SweepResult};
use thiserror::Error;

pub const RECORD_FORMAT: &str = "gate-sweep";

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RecordVersion {
    pub major: u8,
    pub minor: u8,
}

impl RecordVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

impl fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a gate-sweep record (format '{found}')")]
    WrongFormat { found: String },

    #[error("unsupported record version {0}")]
    UnsupportedVersion(RecordVersion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Lock-in X/Y across a series resistor.
    Transport,
    /// Resistance-ratio channel.
    Ratio,
    /// Bias spectroscopy at each gate voltage.
    Sts,
}

impl SweepMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "transport" => Some(Self::Transport),
            "ratio" => Some(Self::Ratio),
            "sts" => Some(Self::Sts),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Ratio => "ratio",
            Self::Sts => "sts",
        }
    }
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who ran what, on which device, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_name: String,
    pub device_id: String,
    /// Sample temperature (K).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_k: Option<f64>,
    pub mode: SweepMode,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Error that ended the sweep early, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunInfo {
    pub fn new(run_name: impl Into<String>, device_id: impl Into<String>, mode: SweepMode) -> Self {
        Self {
            run_name: run_name.into(),
            device_id: device_id.into(),
            temperature_k: None,
            mode,
            started_at: Utc::now(),
            finished_at: None,
            aborted: None,
        }
    }

    pub fn with_temperature(mut self, kelvin: Option<f64>) -> Self {
        self.temperature_k = kelvin;
        self
    }

    /// Stamps the finish time; `error` marks the run as aborted.
    pub fn finish(&mut self, error: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.aborted = error;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord<T> {
    pub format: String,
    pub version: RecordVersion,
    pub run: RunInfo,
    /// Free-form acquisition settings (lock-in frequency, drive, ...).
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub result: SweepResult<T>,
}

#[derive(Deserialize)]
struct RecordHeader {
    format: String,
    #[serde(default)]
    version: RecordVersion,
}

impl<T> SweepRecord<T> {
    pub fn new(run: RunInfo, result: SweepResult<T>) -> Self {
        Self {
            format: RECORD_FORMAT.to_string(),
            version: RecordVersion::v1(),
            run,
            parameters: BTreeMap::new(),
            result,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

impl<T: Serialize> SweepRecord<T> {
    pub fn encode(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<T: DeserializeOwned> SweepRecord<T> {
    /// Parses a record, rejecting foreign formats and unsupported major
    /// versions before looking at the body.
    pub fn decode(raw: &str) -> Result<Self, RecordError> {
        let header: RecordHeader = serde_json::from_str(raw)?;
        if header.format != RECORD_FORMAT {
            return Err(RecordError::WrongFormat {
                found: header.format,
            });
        }
        if !header.version.is_supported() {
            return Err(RecordError::UnsupportedVersion(header.version));
        }
        Ok(serde_json::from_str(raw)?)
    }
}

/// Scalar measurements flattened into parallel columns, one entry per
/// completed point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportColumns {
    pub setpoint: Vec<f64>,
    pub samples: Vec<usize>,
    pub values: BTreeMap<String, Vec<f64>>,
}

impl TransportColumns {
    /// Vector readings have no column and are skipped.
    pub fn from_result(result: &SweepResult<Measurement>) -> Self {
        let mut columns = Self::default();
        for point in &result.points {
            columns.setpoint.push(point.setpoint);
            columns.samples.push(point.samples);
            for named in &point.reading.values {
                if let Some(v) = named.reading.as_scalar() {
                    columns
                        .values
                        .entry(named.name.clone())
                        .or_default()
                        .push(v);
                }
            }
        }
        columns
    }

    pub fn len(&self) -> usize {
        self.setpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setpoint.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        match name {
            "setpoint" => Some(&self.setpoint),
            _ => self.values.get(name).map(Vec::as_slice),
        }
    }
}

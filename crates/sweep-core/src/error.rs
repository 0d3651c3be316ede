//! Error taxonomy for sweeps.
//!
//! Configuration errors are raised before any instrument I/O. Instrument
//! errors come from the devices mid-sweep and are never retried.

use crate::safety::SafetyViolation;
use thiserror::Error;

/// Invalid sweep parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("exactly one of point count or step must be given")]
    AxisSpacingAmbiguous,

    #[error("point count must be at least 2 (got {count})")]
    TooFewPoints { count: usize },

    #[error("axis step must be finite and positive (got {step})")]
    InvalidStep { step: f64 },

    #[error("{name} must be finite (got {value})")]
    NonFinite { name: &'static str, value: f64 },

    #[error("ramp step size must be finite and positive (got {step_size})")]
    InvalidRampStep { step_size: f64 },

    #[error("ramp tolerance must be finite and non-negative (got {tolerance})")]
    InvalidTolerance { tolerance: f64 },

    #[error("sample count must be at least 1")]
    ZeroSampleCount,

    #[error("channel spec has no channels")]
    NoChannels,

    #[error("derived quantity '{name}' references unknown value '{source_name}'")]
    UnknownSource { name: String, source_name: String },

    #[error("axis index {index} out of range for {len} points")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("axis has no points")]
    EmptyAxis,

    #[error("{what} needs {count:.0} points, more than the limit of {max}")]
    TooManyPoints {
        what: &'static str,
        count: f64,
        max: usize,
    },

    #[error("setpoint rejected: {0}")]
    Limit(SafetyViolation),
}

/// Communication or device-state failure during a sweep.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstrumentError {
    #[error("{device}: communication failure: {message}")]
    Communication { device: String, message: String },

    #[error("{device}: rejected value {value}: {reason}")]
    Rejected {
        device: String,
        value: f64,
        reason: String,
    },

    #[error("{device}: channel {channel} is not available")]
    UnknownChannel { device: String, channel: u32 },

    #[error("channel {channel}: reading shape changed from {expected} to {actual} values")]
    ShapeMismatch {
        channel: u32,
        expected: usize,
        actual: usize,
    },

    #[error("readings combined into '{name}' have different lengths")]
    IncompatibleReadings { name: String },

    #[error("{device}: instrument is already claimed by another sweep")]
    Busy { device: String },
}

impl InstrumentError {
    pub fn communication(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Communication {
            device: device.into(),
            message: message.into(),
        }
    }
}

/// Any failure that ends a sweep.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SweepError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("instrument error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("sweep cancelled after {completed} points")]
    Cancelled { completed: usize },
}

impl SweepError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_instrument(&self) -> bool {
        matches!(self, Self::Instrument(_))
    }
}

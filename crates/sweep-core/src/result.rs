use crate::axis::SweepAxis;
use crate::controller::SweepConfig;
use crate::error::SweepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One recorded point of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint<T> {
    pub index: usize,
    pub setpoint: f64,
    pub reading: T,
    /// Raw samples folded into `reading`.
    pub samples: usize,
}

#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepStats {
    pub points_completed: u64,
    pub actuator_writes: u64,
    pub direct_writes: u64,
    pub raw_samples: u64,
    pub triggers: u64,
}

/// Everything a finished (or aborted) sweep hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult<T> {
    pub axis: SweepAxis,
    pub config: SweepConfig,
    pub points: Vec<SamplePoint<T>>,
    pub stats: SweepStats,
    pub elapsed: Duration,
}

impl<T> SweepResult<T> {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() == self.axis.len()
    }

    pub fn setpoints(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.setpoint).collect()
    }
}

/// A sweep that stopped early, with every point completed before the
/// failure.
#[derive(Debug)]
pub struct SweepAbort<T> {
    pub error: SweepError,
    pub partial: SweepResult<T>,
}

impl<T> fmt::Display for SweepAbort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sweep aborted after {} of {} points: {}",
            self.partial.points.len(),
            self.partial.axis.len(),
            self.error
        )
    }
}

impl<T: fmt::Debug> std::error::Error for SweepAbort<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on the writes of a single ramp.
pub const MAX_RAMP_WRITES: usize = 1_000_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RampConfig {
    /// Largest change per actuator write.
    pub step_size: f64,
    /// Wait between consecutive writes.
    pub step_delay: Duration,
    /// Below this distance the target is written directly.
    pub tolerance: f64,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            step_size: 50e-3,
            step_delay: Duration::from_millis(100),
            tolerance: 1e-6,
        }
    }
}

impl RampConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(ConfigurationError::InvalidRampStep {
                step_size: self.step_size,
            });
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigurationError::InvalidTolerance {
                tolerance: self.tolerance,
            });
        }
        Ok(())
    }
}

/// Setpoints from the current actuator value to a target. Excludes the
/// starting value, never moves more than `step_size` per element and always
/// ends on the exact target.
#[derive(Debug, Clone, PartialEq)]
pub struct RampPath {
    points: Vec<f64>,
}

impl RampPath {
    pub fn new(current: f64, target: f64, step_size: f64) -> Result<Self, ConfigurationError> {
        if !step_size.is_finite() || step_size <= 0.0 {
            return Err(ConfigurationError::InvalidRampStep { step_size });
        }
        if !current.is_finite() {
            return Err(ConfigurationError::NonFinite {
                name: "current value",
                value: current,
            });
        }
        if !target.is_finite() {
            return Err(ConfigurationError::NonFinite {
                name: "target",
                value: target,
            });
        }

        let writes = ((target - current).abs() / step_size).ceil();
        if !writes.is_finite() || writes > MAX_RAMP_WRITES as f64 {
            return Err(ConfigurationError::TooManyPoints {
                what: "ramp",
                count: writes,
                max: MAX_RAMP_WRITES,
            });
        }

        let direction = if target >= current { 1.0 } else { -1.0 };
        let mut points: Vec<f64> = (1u64..)
            .map(|i| current + direction * step_size * i as f64)
            .take_while(|p| (target - p) * direction > 0.0)
            .take(MAX_RAMP_WRITES)
            .collect();
        points.push(target);
        Ok(Self { points })
    }

    /// Single direct write.
    pub fn direct(target: f64) -> Self {
        Self {
            points: vec![target],
        }
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn target(&self) -> f64 {
        // Both constructors push the target last.
        self.points[self.points.len() - 1]
    }
}

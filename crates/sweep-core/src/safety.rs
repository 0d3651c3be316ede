use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct Unvalidated;

#[derive(Debug, Clone, Copy)]
pub struct Validated;

/// A commanded actuator value, checked against [`OutputLimits`] before it
/// can reach a device.
#[derive(Debug, Clone, Copy)]
pub struct Setpoint<State = Unvalidated> {
    value: f64,
    _state: PhantomData<State>,
}

/// Allowed output range of an actuator, e.g. a source-meter voltage range.
/// A missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputLimits {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl OutputLimits {
    pub const fn unbounded() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    /// `[-max_abs, +max_abs]`
    pub fn symmetric(max_abs: f64) -> Self {
        let max_abs = max_abs.abs();
        Self {
            min: Some(-max_abs),
            max: Some(max_abs),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SafetyViolation {
    #[error("setpoint {requested} is not finite")]
    NonFiniteSetpoint { requested: f64 },

    #[error("setpoint {requested} exceeds maximum {limit}")]
    AboveMax { requested: f64, limit: f64 },

    #[error("setpoint {requested} is below minimum {limit}")]
    BelowMin { requested: f64, limit: f64 },
}

impl Setpoint<Unvalidated> {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            _state: PhantomData,
        }
    }

    pub fn validate(self, limits: &OutputLimits) -> Result<Setpoint<Validated>, SafetyViolation> {
        if !self.value.is_finite() {
            return Err(SafetyViolation::NonFiniteSetpoint {
                requested: self.value,
            });
        }
        if let Some(limit) = limits.max {
            if self.value > limit {
                return Err(SafetyViolation::AboveMax {
                    requested: self.value,
                    limit,
                });
            }
        }
        if let Some(limit) = limits.min {
            if self.value < limit {
                return Err(SafetyViolation::BelowMin {
                    requested: self.value,
                    limit,
                });
            }
        }

        Ok(Setpoint {
            value: self.value,
            _state: PhantomData,
        })
    }
}

impl Setpoint<Validated> {
    pub fn value(&self) -> f64 {
        self.value
    }
}

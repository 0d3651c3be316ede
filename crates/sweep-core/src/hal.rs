//! Instrument capabilities consumed by the sweep controller.
//!
//! Concrete drivers (scanning-probe controller, source-meter) live outside
//! this crate; the controller only ever sees these traits.

use crate::error::InstrumentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

/// Index of a readable signal on a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One read from one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Reading {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Vector(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Reading {
        match self {
            Self::Scalar(v) => Self::Scalar(f(*v)),
            Self::Vector(v) => Self::Vector(v.iter().map(|x| f(*x)).collect()),
        }
    }

    /// Element-wise combination; scalars broadcast against vectors.
    /// `None` when two vectors differ in length.
    pub fn zip_with(&self, other: &Reading, f: impl Fn(f64, f64) -> f64) -> Option<Reading> {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => Some(Self::Scalar(f(*a, *b))),
            (Self::Scalar(a), Self::Vector(b)) => {
                Some(Self::Vector(b.iter().map(|y| f(*a, *y)).collect()))
            }
            (Self::Vector(a), Self::Scalar(b)) => {
                Some(Self::Vector(a.iter().map(|x| f(*x, *b)).collect()))
            }
            (Self::Vector(a), Self::Vector(b)) if a.len() == b.len() => Some(Self::Vector(
                a.iter().zip(b).map(|(x, y)| f(*x, *y)).collect(),
            )),
            (Self::Vector(_), Self::Vector(_)) => None,
        }
    }
}

/// Named trace returned by a spectroscopy trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub name: String,
    pub values: Vec<f64>,
}

/// Everything one spectroscopy trigger returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectroscopyRecord {
    pub traces: Vec<Trace>,
    pub parameters: Vec<(String, f64)>,
}

impl SpectroscopyRecord {
    pub fn trace(&self, name: &str) -> Option<&[f64]> {
        self.traces
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.values.as_slice())
    }
}

/// Settable scalar output, e.g. a gate-voltage source.
pub trait Actuator {
    fn current_value(&mut self) -> Result<f64, InstrumentError>;
    fn set_value(&mut self, value: f64) -> Result<(), InstrumentError>;
}

/// One or more readable signal channels.
pub trait Sampler {
    fn read_channel(&mut self, channel: ChannelId) -> Result<Reading, InstrumentError>;
}

/// Triggered acquisition of a full multi-channel trace.
pub trait SpectroscopySampler {
    fn start(&mut self) -> Result<SpectroscopyRecord, InstrumentError>;
}

impl<T: Actuator + ?Sized> Actuator for &mut T {
    fn current_value(&mut self) -> Result<f64, InstrumentError> {
        (**self).current_value()
    }

    fn set_value(&mut self, value: f64) -> Result<(), InstrumentError> {
        (**self).set_value(value)
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn current_value(&mut self) -> Result<f64, InstrumentError> {
        (**self).current_value()
    }

    fn set_value(&mut self, value: f64) -> Result<(), InstrumentError> {
        (**self).set_value(value)
    }
}

impl<T: Sampler + ?Sized> Sampler for &mut T {
    fn read_channel(&mut self, channel: ChannelId) -> Result<Reading, InstrumentError> {
        (**self).read_channel(channel)
    }
}

impl<T: Sampler + ?Sized> Sampler for Box<T> {
    fn read_channel(&mut self, channel: ChannelId) -> Result<Reading, InstrumentError> {
        (**self).read_channel(channel)
    }
}

impl<T: SpectroscopySampler + ?Sized> SpectroscopySampler for &mut T {
    fn start(&mut self) -> Result<SpectroscopyRecord, InstrumentError> {
        (**self).start()
    }
}

impl<T: SpectroscopySampler + ?Sized> SpectroscopySampler for Box<T> {
    fn start(&mut self) -> Result<SpectroscopyRecord, InstrumentError> {
        (**self).start()
    }
}

/// Shareable handle that enforces one sweep at a time per physical
/// instrument. A claim that finds the instrument in use fails immediately
/// instead of queueing.
pub struct InstrumentHandle<T> {
    name: String,
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for InstrumentHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> InstrumentHandle<T> {
    pub fn new(name: impl Into<String>, device: T) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(device)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn claim(&self) -> Result<Claimed<'_, T>, InstrumentError> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(Claimed { guard }),
            Err(TryLockError::WouldBlock) => Err(InstrumentError::Busy {
                device: self.name.clone(),
            }),
            // A sweep that panicked left the device at its last value; the
            // next owner is expected to ramp it to a known state.
            Err(TryLockError::Poisoned(poisoned)) => Ok(Claimed {
                guard: poisoned.into_inner(),
            }),
        }
    }
}

/// Exclusive access to a device for the lifetime of the claim.
pub struct Claimed<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> std::ops::Deref for Claimed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for Claimed<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: Actuator> Actuator for Claimed<'_, T> {
    fn current_value(&mut self) -> Result<f64, InstrumentError> {
        self.guard.current_value()
    }

    fn set_value(&mut self, value: f64) -> Result<(), InstrumentError> {
        self.guard.set_value(value)
    }
}

impl<T: Sampler> Sampler for Claimed<'_, T> {
    fn read_channel(&mut self, channel: ChannelId) -> Result<Reading, InstrumentError> {
        self.guard.read_channel(channel)
    }
}

impl<T: SpectroscopySampler> SpectroscopySampler for Claimed<'_, T> {
    fn start(&mut self) -> Result<SpectroscopyRecord, InstrumentError> {
        self.guard.start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl Actuator for Fixed {
        fn current_value(&mut self) -> Result<f64, InstrumentError> {
            Ok(self.0)
        }

        fn set_value(&mut self, value: f64) -> Result<(), InstrumentError> {
            self.0 = value;
            Ok(())
        }
    }

    #[test]
    fn second_claim_is_busy() {
        let handle = InstrumentHandle::new("gate", Fixed(0.0));
        let other = handle.clone();
        let mut first = handle.claim().unwrap();
        first.set_value(1.5).unwrap();
        assert!(matches!(
            other.claim(),
            Err(InstrumentError::Busy { ref device }) if device == "gate"
        ));
        drop(first);
        let mut again = other.claim().unwrap();
        assert_eq!(again.current_value().unwrap(), 1.5);
    }

    #[test]
    fn zip_with_broadcasts_scalars() {
        let v = Reading::Vector(vec![1.0, 2.0]);
        let s = Reading::Scalar(10.0);
        assert_eq!(
            s.zip_with(&v, |a, b| a - b),
            Some(Reading::Vector(vec![9.0, 8.0]))
        );
        assert_eq!(
            v.zip_with(&Reading::Vector(vec![1.0]), |a, b| a + b),
            None
        );
    }
}

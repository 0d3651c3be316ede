//! Scoped teardown for a gate sweep.
//!
//! [`SafeShutdown`] owns the actuator for the duration of a sweep. Calling
//! [`SafeShutdown::finish`] ramps it to the safe value and reports errors;
//! dropping the guard on any other path (early return, `?`, panic) makes a
//! best-effort ramp and only logs failures.

use crate::controller::SweepController;
use crate::error::SweepError;
use crate::hal::Actuator;
use crate::timebase::Clock;
use log::{info, warn};

pub struct SafeShutdown<'c, A: Actuator, C: Clock> {
    actuator: Option<A>,
    controller: &'c mut SweepController<C>,
    safe_value: f64,
}

impl<'c, A: Actuator, C: Clock> SafeShutdown<'c, A, C> {
    pub fn new(actuator: A, controller: &'c mut SweepController<C>) -> Self {
        Self {
            actuator: Some(actuator),
            controller,
            safe_value: 0.0,
        }
    }

    pub fn with_safe_value(mut self, value: f64) -> Self {
        self.safe_value = value;
        self
    }

    pub fn safe_value(&self) -> f64 {
        self.safe_value
    }

    /// The actuator together with the controller that drives it.
    pub fn parts(&mut self) -> (&mut A, &mut SweepController<C>) {
        let actuator = self
            .actuator
            .as_mut()
            .unwrap_or_else(|| unreachable!("actuator is only taken by finish or drop"));
        (actuator, &mut *self.controller)
    }

    /// Ramps to the safe value and hands the actuator back.
    pub fn finish(mut self) -> Result<A, SweepError> {
        let mut actuator = self
            .actuator
            .take()
            .unwrap_or_else(|| unreachable!("actuator is only taken by finish or drop"));
        info!("ramping actuator to safe value {}", self.safe_value);
        self.controller.ramp_to(&mut actuator, self.safe_value)?;
        Ok(actuator)
    }
}

impl<A: Actuator, C: Clock> Drop for SafeShutdown<'_, A, C> {
    fn drop(&mut self) {
        if let Some(mut actuator) = self.actuator.take() {
            warn!(
                "sweep ended without teardown; ramping actuator to {}",
                self.safe_value
            );
            if let Err(e) = self.controller.ramp_to(&mut actuator, self.safe_value) {
                warn!("best-effort ramp to safe value failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SweepConfig;
    use crate::error::InstrumentError;
    use crate::timebase::VirtualClock;

    struct Gate<'a> {
        value: &'a mut f64,
        fail: bool,
    }

    impl Actuator for Gate<'_> {
        fn current_value(&mut self) -> Result<f64, InstrumentError> {
            Ok(*self.value)
        }

        fn set_value(&mut self, value: f64) -> Result<(), InstrumentError> {
            if self.fail {
                return Err(InstrumentError::communication("gate", "link down"));
            }
            *self.value = value;
            Ok(())
        }
    }

    #[test]
    fn finish_ramps_to_safe_value() {
        let mut value = 0.0;
        let mut ctl = SweepController::new(SweepConfig::default(), VirtualClock::new());
        let mut guard = SafeShutdown::new(
            Gate {
                value: &mut value,
                fail: false,
            },
            &mut ctl,
        );
        {
            let (gate, ctl) = guard.parts();
            ctl.ramp_to(gate, 0.4).unwrap();
            assert_eq!(gate.current_value().unwrap(), 0.4);
        }
        guard.finish().unwrap();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn drop_ramps_on_error_path() {
        let mut value = 0.0;
        let mut ctl = SweepController::new(SweepConfig::default(), VirtualClock::new());
        fn run(value: &mut f64, ctl: &mut SweepController<VirtualClock>) -> Result<(), SweepError> {
            let mut guard =
                SafeShutdown::new(Gate { value, fail: false }, ctl).with_safe_value(-0.1);
            let (gate, ctl) = guard.parts();
            ctl.ramp_to(gate, 0.3)?;
            Err(InstrumentError::communication("lockin", "timeout").into())
        }

        assert!(run(&mut value, &mut ctl).is_err());
        assert_eq!(value, -0.1);
    }

    #[test]
    fn drop_swallows_teardown_failure() {
        let mut value = 0.25;
        let mut ctl = SweepController::new(SweepConfig::default(), VirtualClock::new());
        let guard = SafeShutdown::new(
            Gate {
                value: &mut value,
                fail: true,
            },
            &mut ctl,
        );
        drop(guard);
        assert_eq!(value, 0.25);
    }
}

use crate::axis::SweepAxis;
use crate::error::{ConfigurationError, SweepError};
use crate::hal::{Actuator, Sampler, SpectroscopyRecord, SpectroscopySampler};
use crate::ramp::{RampConfig, RampPath, MAX_RAMP_WRITES};
use crate::result::{SamplePoint, SweepAbort, SweepResult, SweepStats};
use crate::safety::{OutputLimits, Setpoint};
use crate::sampling::{self, ChannelSpec, Measurement};
use crate::timebase::Clock;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub ramp: RampConfig,
    /// Wait after reaching a setpoint, before sampling.
    pub settle_time: Duration,
    pub sample_count: usize,
    pub inter_sample_delay: Duration,
    /// Wait after a spectroscopy trigger, before the next gate step.
    pub post_trigger_delay: Duration,
    pub limits: OutputLimits,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            ramp: RampConfig::default(),
            settle_time: Duration::from_millis(150),
            sample_count: 10,
            inter_sample_delay: Duration::from_millis(10),
            post_trigger_delay: Duration::ZERO,
            limits: OutputLimits::unbounded(),
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.ramp.validate()?;
        if self.sample_count == 0 {
            return Err(ConfigurationError::ZeroSampleCount);
        }
        Ok(())
    }

    /// Checks every setpoint of `axis` against the output limits, and that a
    /// ramp across the whole axis stays within [`MAX_RAMP_WRITES`].
    pub fn check_axis(&self, axis: &SweepAxis) -> Result<(), ConfigurationError> {
        if axis.is_empty() {
            return Err(ConfigurationError::EmptyAxis);
        }
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for v in axis.iter() {
            Setpoint::new(v)
                .validate(&self.limits)
                .map_err(ConfigurationError::Limit)?;
            lo = lo.min(v);
            hi = hi.max(v);
        }
        let writes = ((hi - lo) / self.ramp.step_size).ceil();
        if !writes.is_finite() || writes > MAX_RAMP_WRITES as f64 {
            return Err(ConfigurationError::TooManyPoints {
                what: "ramp",
                count: writes,
                max: MAX_RAMP_WRITES,
            });
        }
        Ok(())
    }
}

/// Drives an actuator through a sweep axis: ramp, settle, sample, record.
///
/// The controller never ramps the actuator back to a safe value on its own;
/// wrap the actuator in [`crate::SafeShutdown`] for that.
pub struct SweepController<C: Clock> {
    config: SweepConfig,
    clock: C,
    stats: SweepStats,
    stop: Option<Arc<AtomicBool>>,
}

impl<C: Clock> SweepController<C> {
    pub fn new(config: SweepConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            stats: SweepStats::default(),
            stop: None,
        }
    }

    /// Polled between points; once set the sweep ends with
    /// [`SweepError::Cancelled`].
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn stats(&self) -> &SweepStats {
        &self.stats
    }

    /// Steps the actuator to `target`, at most `ramp.step_size` per write.
    pub fn ramp_to<A: Actuator + ?Sized>(
        &mut self,
        actuator: &mut A,
        target: f64,
    ) -> Result<(), SweepError> {
        let ramp = &self.config.ramp;
        ramp.validate()?;
        let target = Setpoint::new(target)
            .validate(&self.config.limits)
            .map_err(ConfigurationError::Limit)?
            .value();

        let current = actuator.current_value()?;
        let path = if (target - current).abs() < ramp.tolerance {
            self.stats.direct_writes += 1;
            RampPath::direct(target)
        } else {
            RampPath::new(current, target, ramp.step_size)?
        };
        debug!(
            "ramp {:.6} -> {:.6} in {} writes",
            current,
            target,
            path.len()
        );

        let step_delay = ramp.step_delay;
        for (i, &value) in path.points().iter().enumerate() {
            if i > 0 {
                self.clock.sleep(step_delay);
            }
            actuator.set_value(value)?;
            self.stats.actuator_writes += 1;
        }
        Ok(())
    }

    pub fn sample_averaged<S: Sampler + ?Sized>(
        &mut self,
        sampler: &mut S,
        channels: &ChannelSpec,
    ) -> Result<Measurement, SweepError> {
        let measurement = sampling::sample_averaged(
            sampler,
            channels,
            self.config.sample_count,
            self.config.inter_sample_delay,
            &self.clock,
        )?;
        self.stats.raw_samples += (self.config.sample_count * channels.channels.len()) as u64;
        Ok(measurement)
    }

    /// Scalar sweep: averaged channels at every axis point.
    pub fn run<A, S, P>(
        &mut self,
        actuator: &mut A,
        sampler: &mut S,
        axis: &SweepAxis,
        channels: &ChannelSpec,
        on_point: P,
    ) -> Result<SweepResult<Measurement>, SweepAbort<Measurement>>
    where
        A: Actuator + ?Sized,
        S: Sampler + ?Sized,
        P: FnMut(&SamplePoint<Measurement>),
    {
        let sample_count = self.config.sample_count;
        let precheck = channels.validate();
        self.drive(actuator, axis, precheck, on_point, |ctl| {
            ctl.sample_averaged(sampler, channels)
                .map(|m| (m, sample_count))
        })
    }

    /// Spectroscopy sweep: one triggered trace at every axis point.
    pub fn run_spectroscopy<A, S, P>(
        &mut self,
        actuator: &mut A,
        spectrometer: &mut S,
        axis: &SweepAxis,
        on_point: P,
    ) -> Result<SweepResult<SpectroscopyRecord>, SweepAbort<SpectroscopyRecord>>
    where
        A: Actuator + ?Sized,
        S: SpectroscopySampler + ?Sized,
        P: FnMut(&SamplePoint<SpectroscopyRecord>),
    {
        self.drive(actuator, axis, Ok(()), on_point, |ctl| {
            let record = spectrometer.start()?;
            ctl.stats.triggers += 1;
            ctl.clock.sleep(ctl.config.post_trigger_delay);
            Ok((record, 1))
        })
    }

    fn drive<T, A, P, M>(
        &mut self,
        actuator: &mut A,
        axis: &SweepAxis,
        precheck: Result<(), ConfigurationError>,
        mut on_point: P,
        mut measure: M,
    ) -> Result<SweepResult<T>, SweepAbort<T>>
    where
        A: Actuator + ?Sized,
        P: FnMut(&SamplePoint<T>),
        M: FnMut(&mut Self) -> Result<(T, usize), SweepError>,
    {
        self.stats = SweepStats::default();
        let started = self.clock.elapsed();
        let mut points: Vec<SamplePoint<T>> = Vec::with_capacity(axis.len());

        let checked = precheck
            .and_then(|_| self.config.validate())
            .and_then(|_| self.config.check_axis(axis));
        if let Err(e) = checked {
            return Err(self.abort(e.into(), axis, points, started));
        }

        for (index, setpoint) in axis.iter().enumerate() {
            if self.stop_requested() {
                let error = SweepError::Cancelled {
                    completed: points.len(),
                };
                return Err(self.abort(error, axis, points, started));
            }

            let outcome = match self.ramp_to(actuator, setpoint) {
                Ok(()) => {
                    self.clock.sleep(self.config.settle_time);
                    measure(self)
                }
                Err(e) => Err(e),
            };
            let (reading, samples) = match outcome {
                Ok(v) => v,
                Err(e) => return Err(self.abort(e, axis, points, started)),
            };

            let point = SamplePoint {
                index,
                setpoint,
                reading,
                samples,
            };
            on_point(&point);
            points.push(point);
            self.stats.points_completed += 1;
            debug!("point {}/{} at {:.6} recorded", index + 1, axis.len(), setpoint);
        }

        Ok(self.finish(axis, points, started))
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|s| s.load(Ordering::Relaxed))
    }

    fn finish<T>(
        &self,
        axis: &SweepAxis,
        points: Vec<SamplePoint<T>>,
        started: Duration,
    ) -> SweepResult<T> {
        SweepResult {
            axis: axis.clone(),
            config: self.config.clone(),
            points,
            stats: self.stats.clone(),
            elapsed: self.clock.elapsed().saturating_sub(started),
        }
    }

    fn abort<T>(
        &self,
        error: SweepError,
        axis: &SweepAxis,
        points: Vec<SamplePoint<T>>,
        started: Duration,
    ) -> SweepAbort<T> {
        SweepAbort {
            error,
            partial: self.finish(axis, points, started),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstrumentError;
    use crate::hal::{ChannelId, Reading, Trace};
    use crate::sampling::Channel;
    use crate::timebase::VirtualClock;

    #[derive(Default)]
    struct RecordingGate {
        value: f64,
        writes: Vec<f64>,
    }

    impl Actuator for RecordingGate {
        fn current_value(&mut self) -> Result<f64, InstrumentError> {
            Ok(self.value)
        }

        fn set_value(&mut self, value: f64) -> Result<(), InstrumentError> {
            self.value = value;
            self.writes.push(value);
            Ok(())
        }
    }

    /// Returns the read count; fails once `fail_on_read` is reached.
    struct CountingSampler {
        reads: usize,
        fail_on_read: Option<usize>,
    }

    impl Sampler for CountingSampler {
        fn read_channel(&mut self, _channel: ChannelId) -> Result<Reading, InstrumentError> {
            self.reads += 1;
            if self.fail_on_read == Some(self.reads) {
                return Err(InstrumentError::communication("lockin", "timeout"));
            }
            Ok(Reading::Scalar(1.0))
        }
    }

    fn fast_config() -> SweepConfig {
        SweepConfig {
            ramp: RampConfig {
                step_size: 0.05,
                step_delay: Duration::from_millis(100),
                tolerance: 1e-6,
            },
            settle_time: Duration::from_millis(500),
            sample_count: 1,
            inter_sample_delay: Duration::ZERO,
            post_trigger_delay: Duration::ZERO,
            limits: OutputLimits::unbounded(),
        }
    }

    fn spec() -> ChannelSpec {
        ChannelSpec::new(vec![Channel::new("i", ChannelId(0))])
    }

    #[test]
    fn ramp_within_tolerance_is_single_write() {
        let mut ctl = SweepController::new(fast_config(), VirtualClock::new());
        let mut gate = RecordingGate {
            value: 0.3,
            ..Default::default()
        };
        ctl.ramp_to(&mut gate, 0.3 + 1e-9).unwrap();
        assert_eq!(gate.writes, vec![0.3 + 1e-9]);
        assert!(ctl.clock().sleeps().is_empty());
        assert_eq!(ctl.stats().direct_writes, 1);
    }

    #[test]
    fn ramp_steps_are_bounded_and_end_on_target() {
        let mut ctl = SweepController::new(fast_config(), VirtualClock::new());
        let mut gate = RecordingGate::default();
        ctl.ramp_to(&mut gate, -0.23).unwrap();

        assert_eq!(gate.writes.len(), 5);
        assert_eq!(*gate.writes.last().unwrap(), -0.23);
        let mut prev = 0.0;
        for &w in &gate.writes {
            assert!(w <= prev);
            assert!((w - prev).abs() <= 0.05 + 1e-12);
            prev = w;
        }
        assert_eq!(ctl.clock().sleeps(), vec![Duration::from_millis(100); 4]);
    }

    #[test]
    fn ramp_rejects_bad_step_before_io() {
        let mut config = fast_config();
        config.ramp.step_size = 0.0;
        let mut ctl = SweepController::new(config, VirtualClock::new());
        let mut gate = RecordingGate::default();
        let err = ctl.ramp_to(&mut gate, 1.0).unwrap_err();
        assert!(err.is_configuration());
        assert!(gate.writes.is_empty());
    }

    #[test]
    fn ramp_rejects_target_outside_limits() {
        let mut config = fast_config();
        config.limits = OutputLimits::symmetric(5.0);
        let mut ctl = SweepController::new(config, VirtualClock::new());
        let mut gate = RecordingGate::default();
        let err = ctl.ramp_to(&mut gate, 7.5).unwrap_err();
        assert!(matches!(
            err,
            SweepError::Configuration(ConfigurationError::Limit(_))
        ));
        assert!(gate.writes.is_empty());
    }

    #[test]
    fn run_records_every_axis_point_in_order() {
        let axis = SweepAxis::build(-1.0, 1.0, Some(21), None, false).unwrap();
        let mut ctl = SweepController::new(fast_config(), VirtualClock::new());
        let mut gate = RecordingGate::default();
        let mut sampler = CountingSampler {
            reads: 0,
            fail_on_read: None,
        };
        let mut seen = Vec::new();

        let result = ctl
            .run(&mut gate, &mut sampler, &axis, &spec(), |p| seen.push(p.index))
            .unwrap();

        assert_eq!(result.len(), 21);
        assert!(result.is_complete());
        assert_eq!(result.setpoints(), axis.points());
        assert_eq!(seen, (0..21).collect::<Vec<_>>());
        assert_eq!(result.stats.points_completed, 21);
        assert_eq!(gate.value, 1.0);
    }

    #[test]
    fn settle_happens_between_ramp_and_sample() {
        let axis = SweepAxis::from_points(vec![0.0]).unwrap();
        let mut config = fast_config();
        config.sample_count = 2;
        config.inter_sample_delay = Duration::from_millis(20);
        let mut ctl = SweepController::new(config, VirtualClock::new());
        let mut gate = RecordingGate::default();
        let mut sampler = CountingSampler {
            reads: 0,
            fail_on_read: None,
        };
        let result = ctl
            .run(&mut gate, &mut sampler, &axis, &spec(), |_| {})
            .unwrap();
        assert_eq!(result.points[0].samples, 2);
        assert_eq!(
            ctl.clock().sleeps(),
            vec![
                Duration::from_millis(500),
                Duration::from_millis(20),
                Duration::from_millis(20)
            ]
        );
        assert_eq!(result.elapsed, Duration::from_millis(540));
    }

    #[test]
    fn instrument_failure_keeps_completed_points() {
        let axis = SweepAxis::build(0.0, 0.9, Some(10), None, false).unwrap();
        let mut ctl = SweepController::new(fast_config(), VirtualClock::new());
        let mut gate = RecordingGate::default();
        let mut sampler = CountingSampler {
            reads: 0,
            fail_on_read: Some(5),
        };

        let abort = ctl
            .run(&mut gate, &mut sampler, &axis, &spec(), |_| {})
            .unwrap_err();

        assert!(abort.error.is_instrument());
        assert_eq!(abort.partial.len(), 4);
        assert!(!abort.partial.is_complete());
        assert_eq!(abort.partial.setpoints(), &axis.points()[..4]);
        // Left at the fifth setpoint, not reset.
        assert!((gate.value - axis.points()[4]).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_axis_fails_before_any_io() {
        let axis = SweepAxis::build(-8.0, 8.0, Some(5), None, false).unwrap();
        let mut config = fast_config();
        config.limits = OutputLimits::symmetric(5.0);
        let mut ctl = SweepController::new(config, VirtualClock::new());
        let mut gate = RecordingGate::default();
        let mut sampler = CountingSampler {
            reads: 0,
            fail_on_read: None,
        };
        let abort = ctl
            .run(&mut gate, &mut sampler, &axis, &spec(), |_| {})
            .unwrap_err();
        assert!(abort.error.is_configuration());
        assert!(abort.partial.is_empty());
        assert!(gate.writes.is_empty());
        assert_eq!(sampler.reads, 0);
    }

    #[test]
    fn stop_flag_cancels_between_points() {
        let axis = SweepAxis::build(0.0, 1.0, Some(5), None, false).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let mut ctl =
            SweepController::new(fast_config(), VirtualClock::new()).with_stop_flag(stop.clone());
        let mut gate = RecordingGate::default();
        let mut sampler = CountingSampler {
            reads: 0,
            fail_on_read: None,
        };
        let abort = ctl
            .run(&mut gate, &mut sampler, &axis, &spec(), |p| {
                if p.index == 1 {
                    stop.store(true, Ordering::Relaxed);
                }
            })
            .unwrap_err();
        assert_eq!(abort.error, SweepError::Cancelled { completed: 2 });
        assert_eq!(abort.partial.len(), 2);
    }

    #[test]
    fn oversized_ramp_fails_before_any_io() {
        let axis = SweepAxis::build(-10.0, 10.0, Some(3), None, false).unwrap();
        let mut config = fast_config();
        config.ramp.step_size = 1e-9;
        let mut ctl = SweepController::new(config, VirtualClock::new());
        let mut gate = RecordingGate::default();
        let mut sampler = CountingSampler {
            reads: 0,
            fail_on_read: None,
        };
        let abort = ctl
            .run(&mut gate, &mut sampler, &axis, &spec(), |_| {})
            .unwrap_err();
        assert!(matches!(
            abort.error,
            SweepError::Configuration(ConfigurationError::TooManyPoints { what: "ramp", .. })
        ));
        assert!(gate.writes.is_empty());
        assert_eq!(sampler.reads, 0);
    }

    struct FixedSpectrometer {
        triggers: usize,
    }

    impl SpectroscopySampler for FixedSpectrometer {
        fn start(&mut self) -> Result<SpectroscopyRecord, InstrumentError> {
            self.triggers += 1;
            Ok(SpectroscopyRecord {
                traces: vec![Trace {
                    name: "Current (A)".into(),
                    values: vec![0.0, 1e-9],
                }],
                parameters: Vec::new(),
            })
        }
    }

    #[test]
    fn spectroscopy_sweep_triggers_once_per_point() {
        let axis = SweepAxis::build(-1.0, 1.0, None, Some(0.5), true).unwrap();
        let mut config = fast_config();
        config.post_trigger_delay = Duration::from_millis(500);
        let mut ctl = SweepController::new(config, VirtualClock::new());
        let mut gate = RecordingGate::default();
        let mut spectrometer = FixedSpectrometer { triggers: 0 };

        let result = ctl
            .run_spectroscopy(&mut gate, &mut spectrometer, &axis, |_| {})
            .unwrap();

        assert_eq!(axis.len(), 9);
        assert_eq!(result.len(), 9);
        assert_eq!(spectrometer.triggers, 9);
        assert_eq!(result.stats.triggers, 9);
        assert_eq!(
            result.points[4].reading.trace("Current (A)"),
            Some(&[0.0, 1e-9][..])
        );
    }

    /// Notes the virtual time of every trigger.
    struct TimedSpectrometer {
        clock: VirtualClock,
        triggered_at: Vec<Duration>,
    }

    impl SpectroscopySampler for TimedSpectrometer {
        fn start(&mut self) -> Result<SpectroscopyRecord, InstrumentError> {
            self.triggered_at.push(self.clock.elapsed());
            Ok(SpectroscopyRecord {
                traces: Vec::new(),
                parameters: Vec::new(),
            })
        }
    }

    #[test]
    fn spectroscopy_triggers_after_settle_and_waits_before_next_step() {
        let axis = SweepAxis::from_points(vec![0.0, 0.1]).unwrap();
        let mut config = fast_config();
        config.settle_time = Duration::from_millis(300);
        config.post_trigger_delay = Duration::from_millis(700);
        let clock = VirtualClock::new();
        let mut ctl = SweepController::new(config, clock.clone());
        let mut gate = RecordingGate::default();
        let mut spectrometer = TimedSpectrometer {
            clock,
            triggered_at: Vec::new(),
        };

        ctl.run_spectroscopy(&mut gate, &mut spectrometer, &axis, |_| {})
            .unwrap();

        let ms = Duration::from_millis;
        // First point needs no ramp; the second ramps 0 -> 0.1 in two writes.
        assert_eq!(
            ctl.clock().sleeps(),
            vec![ms(300), ms(700), ms(100), ms(300), ms(700)]
        );
        assert_eq!(spectrometer.triggered_at, vec![ms(300), ms(1400)]);
        assert_eq!(gate.writes.len(), 3);
    }
}

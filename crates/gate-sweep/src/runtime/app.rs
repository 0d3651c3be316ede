use crate::infra::audit::{
    AuditEventType, AuditLogger, PointDetails, Stamp, SweepAbortedDetails, SweepStartDetails,
};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use sweep_core::hal_sim::{GrapheneModel, LockInSetup, SimulatedDevice};
use sweep_core::{
    Actuator, ChannelSpec, Clock, ConfigurationError, InstrumentError, InstrumentHandle,
    Measurement, OutputLimits, RampConfig, SafeShutdown, SpectroscopyRecord, SweepAbort,
    SweepAxis, SweepConfig, SweepController, SweepError, SweepResult, SystemClock, TimeBase,
};
use sweep_io::{RunInfo, RunStore, StoreError, SweepMode, SweepRecord};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to open audit log {}: {source}", path.display())]
    Audit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error("sweep aborted after {completed} of {total} points: {source}")]
    Sweep {
        completed: usize,
        total: usize,
        #[source]
        source: SweepError,
    },

    #[error("ramp to safe value failed: {0}")]
    Teardown(#[source] SweepError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}\nRun with --help for usage.");
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    let _log_guard = match init_tracing(config.json_logs, config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to open log directory: {e}");
            return ExitCode::from(2);
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gate-sweep failed");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let journal = Journal {
        logger: init_audit_logger(config.audit_path.as_deref(), &config.run_name)?,
        timebase: TimeBase::new(),
    };
    journal.record(
        AuditEventType::SystemStart,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "mode": config.mode.as_str(),
            "out_dir": config.out_dir.display().to_string(),
        }),
    );

    let outcome = run_sweep(&config, &journal);

    journal.record(
        AuditEventType::SystemShutdown,
        serde_json::json!({ "ok": outcome.is_ok() }),
    );
    outcome
}

fn run_sweep(config: &RuntimeConfig, journal: &Journal) -> Result<(), AppError> {
    let (count, step) = config.spacing();
    let axis = SweepAxis::build(config.start, config.end, count, step, config.backward)?;
    let sweep_config = sweep_config(config);
    sweep_config.validate()?;
    sweep_config.check_axis(&axis)?;

    let device = build_device(config);
    let gate = InstrumentHandle::new("gate", device.gate());
    let mut controller = SweepController::new(sweep_config, SystemClock::new());

    info!(
        run_name = %config.run_name,
        mode = %config.mode,
        points = axis.len(),
        start = config.start,
        end = config.end,
        backward = config.backward,
        max_gate = config.max_gate,
        "Starting gate sweep"
    );
    journal.record(
        AuditEventType::SweepStart,
        SweepStartDetails {
            device_id: &config.device_id,
            mode: config.mode.as_str(),
            points: axis.len(),
            first: axis.points().first().copied().unwrap_or_default(),
            last: axis.points().last().copied().unwrap_or_default(),
        },
    );

    let report = Report {
        config,
        journal,
        store: RunStore::new(&config.out_dir),
        run: RunInfo::new(&config.run_name, &config.device_id, config.mode)
            .with_temperature(config.temperature_k),
    };
    let mut shutdown =
        SafeShutdown::new(gate.claim()?, &mut controller).with_safe_value(config.safe_value);

    match config.mode {
        SweepMode::Transport | SweepMode::Ratio => {
            let channels = match config.mode {
                SweepMode::Ratio => ChannelSpec::resistance_ratio(config.series_resistance),
                _ => ChannelSpec::lockin_divider(config.drive_amplitude, config.series_resistance),
            };
            let lockin = InstrumentHandle::new("lockin", device.lockin());
            let mut lockin = lockin.claim()?;
            let (gate, ctl) = shutdown.parts();
            let outcome = ctl.run(gate, &mut lockin, &axis, &channels, |point| {
                journal.record(
                    AuditEventType::PointRecorded,
                    PointDetails {
                        index: point.index,
                        setpoint: point.setpoint,
                        samples: point.samples,
                        values: scalar_values(&point.reading),
                    },
                );
            });
            let parameters = vec![
                ("drive_amplitude_v", serde_json::json!(config.drive_amplitude)),
                ("lockin_frequency_hz", serde_json::json!(config.lockin_frequency)),
                ("series_resistance_ohm", serde_json::json!(config.series_resistance)),
                ("channels", serde_json::to_value(&channels).unwrap_or_default()),
            ];
            report.settle(shutdown, outcome, parameters)
        }
        SweepMode::Sts => {
            let spectrometer = InstrumentHandle::new("spectrometer", device.spectrometer());
            let mut spectrometer = spectrometer.claim()?;
            let (gate, ctl) = shutdown.parts();
            let outcome = ctl.run_spectroscopy(gate, &mut spectrometer, &axis, |point| {
                journal.record(
                    AuditEventType::PointRecorded,
                    PointDetails {
                        index: point.index,
                        setpoint: point.setpoint,
                        samples: point.samples,
                        values: trace_parameters(&point.reading),
                    },
                );
            });
            let parameters = vec![
                ("drive_amplitude_v", serde_json::json!(config.drive_amplitude)),
                ("lockin_frequency_hz", serde_json::json!(config.lockin_frequency)),
            ];
            report.settle(shutdown, outcome, parameters)
        }
    }
}

/// Wraps up one sweep: ramps to the safe value, journals the outcome and
/// saves whatever was measured.
struct Report<'a> {
    config: &'a RuntimeConfig,
    journal: &'a Journal,
    store: RunStore,
    run: RunInfo,
}

impl Report<'_> {
    fn settle<T, A, C>(
        self,
        shutdown: SafeShutdown<'_, A, C>,
        outcome: Result<SweepResult<T>, SweepAbort<T>>,
        parameters: Vec<(&str, serde_json::Value)>,
    ) -> Result<(), AppError>
    where
        T: Serialize,
        A: Actuator,
        C: Clock,
    {
        let (result, failure) = match outcome {
            Ok(result) => {
                info!(
                    points = result.len(),
                    actuator_writes = result.stats.actuator_writes,
                    raw_samples = result.stats.raw_samples,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "Sweep complete"
                );
                self.journal.record(
                    AuditEventType::SweepComplete,
                    serde_json::json!({ "points": result.len() }),
                );
                (result, None)
            }
            Err(abort) => {
                let SweepAbort { error, partial } = abort;
                error!(
                    error = %error,
                    completed = partial.len(),
                    total = partial.axis.len(),
                    "Sweep aborted"
                );
                self.journal.record(
                    AuditEventType::SweepAborted,
                    SweepAbortedDetails {
                        error: error.to_string(),
                        completed: partial.len(),
                        total: partial.axis.len(),
                    },
                );
                (partial, Some(error))
            }
        };

        let safe_value = shutdown.safe_value();
        let teardown = shutdown.finish().map(drop);
        match &teardown {
            Ok(()) => info!(safe_value, "Gate ramped to safe value"),
            Err(e) => error!(error = %e, safe_value, "Failed to ramp gate to safe value"),
        }
        self.journal.record(
            AuditEventType::RampToSafe,
            serde_json::json!({
                "safe_value": safe_value,
                "ok": teardown.is_ok(),
            }),
        );

        let completed = result.len();
        let total = result.axis.len();
        let mut run = self.run;
        run.finish(failure.as_ref().map(ToString::to_string));
        let saved = if result.is_empty() {
            warn!("No points completed; nothing to save");
            Ok(())
        } else {
            let mut record = SweepRecord::new(run, result);
            for (key, value) in parameters {
                record = record.with_parameter(key, value);
            }
            record = record
                .with_parameter("settle_ms", serde_json::json!(self.config.settle_ms))
                .with_parameter("max_gate_v", serde_json::json!(self.config.max_gate));
            match self.store.save_unique(&record) {
                Ok(path) => {
                    self.journal.record(
                        AuditEventType::RecordSaved,
                        serde_json::json!({
                            "path": path.display().to_string(),
                            "points": completed,
                            "partial": failure.is_some(),
                        }),
                    );
                    Ok(())
                }
                Err(e) => {
                    // Last copy of the data; keep it in the log.
                    match record.encode() {
                        Ok(encoded) => {
                            error!(error = %e, record = %encoded, "Sweep record not saved")
                        }
                        Err(_) => error!(error = %e, "Sweep record not saved"),
                    }
                    Err(e)
                }
            }
        };

        if let Some(source) = failure {
            if let Err(e) = saved {
                error!(error = %e, "Failed to save partial sweep record");
            }
            return Err(AppError::Sweep {
                completed,
                total,
                source,
            });
        }
        teardown.map_err(AppError::Teardown)?;
        saved?;
        Ok(())
    }
}

struct Journal {
    logger: Option<AuditLogger>,
    timebase: TimeBase,
}

impl Journal {
    /// Audit write failures never stop a sweep; they are logged and dropped.
    fn record(&self, event_type: AuditEventType, details: impl Serialize) {
        let Some(logger) = &self.logger else {
            return;
        };
        let details = serde_json::to_value(details).unwrap_or_default();
        let stamp = Stamp {
            monotonic_us: self.timebase.now_us(),
            unix_us: self.timebase.unix_us(),
        };
        if let Err(e) = logger.append(stamp, event_type, details) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}

fn init_audit_logger(path: Option<&Path>, run: &str) -> Result<Option<AuditLogger>, AppError> {
    let Some(path) = path else {
        return Ok(None);
    };
    match AuditLogger::open(path, run) {
        Ok(logger) => {
            info!(path = %path.display(), "Audit logging enabled");
            Ok(Some(logger))
        }
        Err(source) => Err(AppError::Audit {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn sweep_config(config: &RuntimeConfig) -> SweepConfig {
    SweepConfig {
        ramp: RampConfig {
            step_size: config.ramp_step,
            step_delay: Duration::from_millis(config.ramp_delay_ms),
            tolerance: config.ramp_tolerance,
        },
        settle_time: Duration::from_millis(config.settle_ms),
        sample_count: config.samples,
        inter_sample_delay: Duration::from_millis(config.sample_delay_ms),
        post_trigger_delay: Duration::from_millis(config.trigger_delay_ms),
        limits: OutputLimits::symmetric(config.max_gate),
    }
}

fn build_device(config: &RuntimeConfig) -> SimulatedDevice {
    let model = GrapheneModel {
        dirac_point: config.dirac_point,
        ..GrapheneModel::default()
    };
    let lockin = LockInSetup {
        amplitude: config.drive_amplitude,
        frequency: config.lockin_frequency,
        series_resistance: config.series_resistance,
        ..LockInSetup::default()
    };
    let device = SimulatedDevice::new(model)
        .with_lockin(lockin)
        .with_compliance(config.max_gate);
    match config.fault_after {
        Some(reads) => {
            warn!(reads, "Simulated instrument will fail after {reads} reads");
            device.fail_after_reads(reads)
        }
        None => device,
    }
}

fn scalar_values(measurement: &Measurement) -> Vec<(&str, f64)> {
    measurement
        .values
        .iter()
        .filter_map(|v| v.reading.as_scalar().map(|x| (v.name.as_str(), x)))
        .collect()
}

fn trace_parameters(record: &SpectroscopyRecord) -> Vec<(&str, f64)> {
    record
        .parameters
        .iter()
        .map(|(name, value)| (name.as_str(), *value))
        .collect()
}

use std::path::PathBuf;
use std::str::FromStr;
use sweep_io::SweepMode;
use thiserror::Error;

/// Points on the forward leg when neither `--count` nor `--step` is given.
const DEFAULT_POINT_COUNT: usize = 101;

#[derive(Debug, Error, PartialEq)]
pub enum ArgError {
    #[error("{flag} requires a value")]
    MissingValue { flag: String },

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown option '{0}'")]
    UnknownFlag(String),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_name: String,
    pub device_id: String,
    pub temperature_k: Option<f64>,
    pub mode: SweepMode,
    pub start: f64,
    pub end: f64,
    pub count: Option<usize>,
    pub step: Option<f64>,
    pub backward: bool,
    pub ramp_step: f64,
    pub ramp_delay_ms: u64,
    pub ramp_tolerance: f64,
    pub settle_ms: u64,
    pub samples: usize,
    pub sample_delay_ms: u64,
    pub trigger_delay_ms: u64,
    pub max_gate: f64,
    pub safe_value: f64,
    pub series_resistance: f64,
    pub drive_amplitude: f64,
    pub lockin_frequency: f64,
    pub dirac_point: f64,
    pub fault_after: Option<u64>,
    pub out_dir: PathBuf,
    pub audit_path: Option<PathBuf>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_name: "gate-sweep".to_string(),
            device_id: "sim-graphene".to_string(),
            temperature_k: None,
            mode: SweepMode::Transport,
            start: -1.0,
            end: 1.0,
            count: None,
            step: None,
            backward: false,
            ramp_step: 50e-3,
            ramp_delay_ms: 100,
            ramp_tolerance: 1e-6,
            settle_ms: 150,
            samples: 10,
            sample_delay_ms: 10,
            trigger_delay_ms: 0,
            max_gate: 10.0,
            safe_value: 0.0,
            series_resistance: 1e5,
            drive_amplitude: 10e-3,
            lockin_frequency: 977.0,
            dirac_point: 0.2,
            fault_after: None,
            out_dir: PathBuf::from("runs"),
            audit_path: None,
            json_logs: false,
            log_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ArgError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ArgError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--run-name" => cfg.run_name = value(args, &mut i)?.to_string(),
                "--device" => cfg.device_id = value(args, &mut i)?.to_string(),
                "--temperature" => cfg.temperature_k = Some(parse(args, &mut i)?),
                "--mode" => {
                    let raw = value(args, &mut i)?;
                    cfg.mode = SweepMode::parse(raw).ok_or_else(|| ArgError::InvalidValue {
                        flag: flag.to_string(),
                        value: raw.to_string(),
                    })?;
                }
                "--start" => cfg.start = parse(args, &mut i)?,
                "--end" => cfg.end = parse(args, &mut i)?,
                "--count" => cfg.count = Some(parse(args, &mut i)?),
                "--step" => cfg.step = Some(parse(args, &mut i)?),
                "--backward" => cfg.backward = true,
                "--ramp-step" => cfg.ramp_step = parse(args, &mut i)?,
                "--ramp-delay-ms" => cfg.ramp_delay_ms = parse(args, &mut i)?,
                "--ramp-tolerance" => cfg.ramp_tolerance = parse(args, &mut i)?,
                "--settle-ms" => cfg.settle_ms = parse(args, &mut i)?,
                "--samples" => cfg.samples = parse(args, &mut i)?,
                "--sample-delay-ms" => cfg.sample_delay_ms = parse(args, &mut i)?,
                "--trigger-delay-ms" => cfg.trigger_delay_ms = parse(args, &mut i)?,
                "--max-gate" => cfg.max_gate = parse(args, &mut i)?,
                "--safe-value" => cfg.safe_value = parse(args, &mut i)?,
                "--series-resistance" => cfg.series_resistance = parse(args, &mut i)?,
                "--drive" => cfg.drive_amplitude = parse(args, &mut i)?,
                "--lockin-freq" => cfg.lockin_frequency = parse(args, &mut i)?,
                "--dirac-point" => cfg.dirac_point = parse(args, &mut i)?,
                "--fault-after" => cfg.fault_after = Some(parse(args, &mut i)?),
                "--out-dir" => cfg.out_dir = PathBuf::from(value(args, &mut i)?),
                "--audit-log" => cfg.audit_path = Some(PathBuf::from(value(args, &mut i)?)),
                "--json-logs" => cfg.json_logs = true,
                "--log-dir" => cfg.log_dir = Some(PathBuf::from(value(args, &mut i)?)),
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => return Err(ArgError::UnknownFlag(other.to_string())),
            }
            i += 1;
        }
        Ok(cfg)
    }

    /// `(count, step)` for the axis builder. Falls back to a fixed point
    /// count when neither was given; both given is left for the builder to
    /// reject.
    pub fn spacing(&self) -> (Option<usize>, Option<f64>) {
        match (self.count, self.step) {
            (None, None) => (Some(DEFAULT_POINT_COUNT), None),
            other => other,
        }
    }

    pub fn print_help() {
        println!(
            r#"gate-sweep - Gate-voltage sweep controller (simulated graphene device)

USAGE:
    gate-sweep [OPTIONS]

RUN:
    --run-name <NAME>         Run name used in the output file name [default: gate-sweep]
    --device <ID>             Device identifier stored in the record [default: sim-graphene]
    --temperature <K>         Sample temperature stored in the record
    --mode <MODE>             transport | ratio | sts [default: transport]

AXIS:
    --start <V>               First gate voltage [default: -1.0]
    --end <V>                 Last gate voltage of the forward leg [default: 1.0]
    --count <N>               Points on the forward leg [default: 101]
    --step <V>                Fixed step instead of a point count
    --backward                Return to the start after the forward leg

RAMP & TIMING:
    --ramp-step <V>           Largest gate change per write [default: 0.05]
    --ramp-delay-ms <MS>      Wait between ramp writes [default: 100]
    --ramp-tolerance <V>      Write directly below this distance [default: 1e-6]
    --settle-ms <MS>          Wait after reaching each point [default: 150]
    --samples <N>             Samples averaged per point [default: 10]
    --sample-delay-ms <MS>    Wait before each sample [default: 10]
    --trigger-delay-ms <MS>   Wait after each spectroscopy trigger [default: 0]
    --max-gate <V>            Reject setpoints beyond +/- this value [default: 10]
    --safe-value <V>          Gate value to ramp to on exit [default: 0]

INSTRUMENT:
    --series-resistance <OHM> Known series resistor [default: 1e5]
    --drive <V>               Lock-in drive amplitude [default: 0.01]
    --lockin-freq <HZ>        Lock-in frequency [default: 977]
    --dirac-point <V>         Simulated charge-neutrality gate voltage [default: 0.2]
    --fault-after <N>         Simulate an instrument failure after N reads

OUTPUT:
    --out-dir <PATH>          Directory for sweep records [default: runs]
    --audit-log <PATH>        Append run events to a JSONL file
    --json-logs               Output logs in JSON format
    --log-dir <PATH>          Also write JSON logs to <PATH>/gate-sweep.log
    -h, --help                Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log filter (e.g., RUST_LOG=debug,sweep_core=trace)

EXAMPLES:
    # Forward and back, 0.1 V steps, 4 K
    gate-sweep --start -5 --end 5 --step 0.1 --backward --temperature 4

    # Spectroscopy at 11 gate voltages with an audit trail
    gate-sweep --mode sts --count 11 --audit-log runs/audit.jsonl
"#
        );
    }
}

fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, ArgError> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| ArgError::MissingValue { flag: flag.clone() })
}

fn parse<T: FromStr>(args: &[String], i: &mut usize) -> Result<T, ArgError> {
    let flag = args[*i].clone();
    let raw = value(args, i)?;
    raw.parse().map_err(|_| ArgError::InvalidValue {
        flag,
        value: raw.to_string(),
    })
}

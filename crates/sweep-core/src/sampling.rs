//! Averaged sampling of one or more channels plus derived quantities.

use crate::error::{ConfigurationError, InstrumentError, SweepError};
use crate::hal::{ChannelId, Reading, Sampler};
use crate::tags;
use crate::timebase::Clock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub id: ChannelId,
}

impl Channel {
    pub fn new(name: impl Into<String>, id: ChannelId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    pub fn from_tag(tag: &tags::SignalTag) -> Self {
        Self::new(tag.key, tag.channel())
    }
}

/// Pure post-processing applied to averaged values, in declaration order.
/// `source`, `x` and `y` name a channel or an earlier derived value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derived {
    /// `sqrt(x² + y²)`
    Magnitude { name: String, x: String, y: String },
    /// Unknown resistance in series with a known one, from the voltage
    /// across the known resistor: `(drive - v) / (v / known_resistance)`.
    DividerResistance {
        name: String,
        source: String,
        drive_amplitude: f64,
        known_resistance: f64,
    },
    /// Current through a known resistor: `v / known_resistance`.
    SeriesCurrent {
        name: String,
        source: String,
        known_resistance: f64,
    },
    /// `factor * v`
    Scale {
        name: String,
        source: String,
        factor: f64,
    },
}

impl Derived {
    pub fn name(&self) -> &str {
        match self {
            Self::Magnitude { name, .. }
            | Self::DividerResistance { name, .. }
            | Self::SeriesCurrent { name, .. }
            | Self::Scale { name, .. } => name,
        }
    }

    fn sources(&self) -> Vec<&str> {
        match self {
            Self::Magnitude { x, y, .. } => vec![x.as_str(), y.as_str()],
            Self::DividerResistance { source, .. }
            | Self::SeriesCurrent { source, .. }
            | Self::Scale { source, .. } => vec![source.as_str()],
        }
    }

    fn apply(&self, values: &Measurement) -> Result<Reading, SweepError> {
        let lookup = |source: &str| {
            values
                .get(source)
                .ok_or_else(|| ConfigurationError::UnknownSource {
                    name: self.name().to_string(),
                    source_name: source.to_string(),
                })
        };
        let reading = match self {
            Self::Magnitude { x, y, .. } => {
                let x = lookup(x)?;
                let y = lookup(y)?;
                x.zip_with(y, |a, b| (a * a + b * b).sqrt()).ok_or_else(|| {
                    InstrumentError::IncompatibleReadings {
                        name: self.name().to_string(),
                    }
                })?
            }
            Self::DividerResistance {
                source,
                drive_amplitude,
                known_resistance,
                ..
            } => lookup(source)?.map(|v| (drive_amplitude - v) / (v / known_resistance)),
            Self::SeriesCurrent {
                source,
                known_resistance,
                ..
            } => lookup(source)?.map(|v| v / known_resistance),
            Self::Scale { source, factor, .. } => lookup(source)?.map(|v| factor * v),
        };
        Ok(reading)
    }
}

/// Which channels to read at each point and what to derive from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub derived: Vec<Derived>,
}

impl ChannelSpec {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels,
            derived: Vec::new(),
        }
    }

    pub fn with_derived(mut self, derived: Derived) -> Self {
        self.derived.push(derived);
        self
    }

    /// Lock-in X/Y across a series resistor driven by the lock-in output:
    /// magnitude, device current and device resistance.
    pub fn lockin_divider(drive_amplitude: f64, series_resistance: f64) -> Self {
        Self::new(vec![
            Channel::from_tag(&tags::DEMOD_X),
            Channel::from_tag(&tags::DEMOD_Y),
        ])
        .with_derived(Derived::Magnitude {
            name: "v_series".into(),
            x: tags::DEMOD_X.key.into(),
            y: tags::DEMOD_Y.key.into(),
        })
        .with_derived(Derived::SeriesCurrent {
            name: "current".into(),
            source: "v_series".into(),
            known_resistance: series_resistance,
        })
        .with_derived(Derived::DividerResistance {
            name: "resistance".into(),
            source: "v_series".into(),
            drive_amplitude,
            known_resistance: series_resistance,
        })
    }

    /// Resistance-ratio signal scaled by the series resistor.
    pub fn resistance_ratio(series_resistance: f64) -> Self {
        Self::new(vec![Channel::from_tag(&tags::RESISTANCE_RATIO)]).with_derived(Derived::Scale {
            name: "resistance".into(),
            source: tags::RESISTANCE_RATIO.key.into(),
            factor: series_resistance,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.channels.is_empty() {
            return Err(ConfigurationError::NoChannels);
        }
        let mut known: Vec<&str> = self.channels.iter().map(|c| c.name.as_str()).collect();
        for derived in &self.derived {
            if let Some(missing) = derived.sources().into_iter().find(|s| !known.contains(s)) {
                return Err(ConfigurationError::UnknownSource {
                    name: derived.name().to_string(),
                    source_name: missing.to_string(),
                });
            }
            known.push(derived.name());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedReading {
    pub name: String,
    pub reading: Reading,
}

/// Averaged channel values followed by derived values, in `ChannelSpec` order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub values: Vec<NamedReading>,
}

impl Measurement {
    pub fn get(&self, name: &str) -> Option<&Reading> {
        self.values
            .iter()
            .find(|v| v.name == name)
            .map(|v| &v.reading)
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Reading::as_scalar)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.name.as_str())
    }

    fn push(&mut self, name: &str, reading: Reading) {
        self.values.push(NamedReading {
            name: name.to_string(),
            reading,
        });
    }
}

/// Reads every channel `sample_count` times, sleeping `delay` before each
/// pass, and keeps a running mean `acc += raw / n`. Derived values are
/// computed from the finished means.
pub fn sample_averaged<S, C>(
    sampler: &mut S,
    spec: &ChannelSpec,
    sample_count: usize,
    delay: Duration,
    clock: &C,
) -> Result<Measurement, SweepError>
where
    S: Sampler + ?Sized,
    C: Clock + ?Sized,
{
    spec.validate()?;
    if sample_count == 0 {
        return Err(ConfigurationError::ZeroSampleCount.into());
    }

    let n = sample_count as f64;
    let mut means: Vec<Option<Reading>> = vec![None; spec.channels.len()];
    for _ in 0..sample_count {
        clock.sleep(delay);
        for (mean, channel) in means.iter_mut().zip(&spec.channels) {
            let raw = sampler.read_channel(channel.id)?;
            let contribution = raw.map(|v| v / n);
            let next = match mean.take() {
                None => contribution,
                Some(acc) => accumulate(channel.id, acc, &contribution)?,
            };
            *mean = Some(next);
        }
    }

    let mut measurement = Measurement::default();
    for (mean, channel) in means.into_iter().zip(&spec.channels) {
        if let Some(reading) = mean {
            measurement.push(&channel.name, reading);
        }
    }
    for derived in &spec.derived {
        let reading = derived.apply(&measurement)?;
        measurement.push(derived.name(), reading);
    }
    Ok(measurement)
}

fn accumulate(channel: ChannelId, acc: Reading, next: &Reading) -> Result<Reading, InstrumentError> {
    let mismatch = || InstrumentError::ShapeMismatch {
        channel: channel.0,
        expected: acc.len(),
        actual: next.len(),
    };
    match (&acc, next) {
        (Reading::Scalar(_), Reading::Scalar(_)) => {}
        (Reading::Vector(a), Reading::Vector(b)) if a.len() == b.len() => {}
        _ => return Err(mismatch()),
    }
    acc.zip_with(next, |a, b| a + b).ok_or_else(mismatch)
}

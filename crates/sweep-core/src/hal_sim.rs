use crate::analysis::{E_CHARGE, HBAR_EV_S};
use crate::error::InstrumentError;
use crate::hal::{Actuator, ChannelId, Reading, Sampler, SpectroscopyRecord, SpectroscopySampler, Trace};
use crate::tags;
use std::sync::{Arc, Mutex, PoisonError};

/// Gated graphene flake with a Dirac-point resistance peak.
#[derive(Debug, Clone)]
pub struct GrapheneModel {
    /// Gate voltage of charge neutrality (V).
    pub dirac_point: f64,
    pub contact_resistance: f64,
    /// Residual carrier density at neutrality (1/m²).
    pub residual_density: f64,
    /// Carrier mobility (m²/Vs).
    pub mobility: f64,
    /// Gate capacitance per area (F/m²).
    pub gate_capacitance: f64,
    /// Channel length over width.
    pub aspect_ratio: f64,
    pub fermi_velocity: f64,
}

impl Default for GrapheneModel {
    fn default() -> Self {
        Self {
            dirac_point: 0.2,
            contact_resistance: 1e3,
            residual_density: 1e15,
            mobility: 0.5,
            gate_capacitance: 1.15e-4,
            aspect_ratio: 1.0,
            fermi_velocity: 1e6,
        }
    }
}

impl GrapheneModel {
    /// Induced carrier density (1/m²), positive for electrons.
    pub fn carrier_density(&self, gate: f64) -> f64 {
        self.gate_capacitance * (gate - self.dirac_point) / E_CHARGE
    }

    pub fn resistance(&self, gate: f64) -> f64 {
        let n = self.carrier_density(gate);
        let n_eff = (self.residual_density.powi(2) + n * n).sqrt();
        self.contact_resistance + self.aspect_ratio / (E_CHARGE * self.mobility * n_eff)
    }

    /// Dirac-point energy relative to the Fermi level (eV).
    pub fn dirac_energy(&self, gate: f64) -> f64 {
        let n = self.carrier_density(gate);
        -n.signum() * HBAR_EV_S * self.fermi_velocity * (std::f64::consts::PI * n.abs()).sqrt()
    }
}

/// Lock-in excitation across the flake in series with a known resistor.
#[derive(Debug, Clone)]
pub struct LockInSetup {
    pub amplitude: f64,
    pub frequency: f64,
    pub series_resistance: f64,
    /// Phase of the demodulated signal (rad).
    pub phase: f64,
}

impl Default for LockInSetup {
    fn default() -> Self {
        Self {
            amplitude: 10e-3,
            frequency: 977.0,
            series_resistance: 1e5,
            phase: 0.0,
        }
    }
}

/// Bias-spectroscopy settings of the simulated tip.
#[derive(Debug, Clone)]
pub struct SpectroscopySetup {
    pub bias_start: f64,
    pub bias_end: f64,
    pub points: usize,
    /// Conductance floor (S).
    pub base_conductance: f64,
    /// Conductance slope away from the Dirac energy (S/V).
    pub slope: f64,
}

impl Default for SpectroscopySetup {
    fn default() -> Self {
        Self {
            bias_start: -0.5,
            bias_end: 0.5,
            points: 201,
            base_conductance: 1e-10,
            slope: 2e-9,
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    gate: f64,
    reads: u64,
    fail_after_reads: Option<u64>,
}

/// Shared simulated device. `gate()`, `lockin()` and `spectrometer()` hand
/// out front-ends that see the same gate voltage.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    model: GrapheneModel,
    lockin: LockInSetup,
    spectroscopy: SpectroscopySetup,
    compliance: f64,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    pub fn new(model: GrapheneModel) -> Self {
        Self {
            model,
            lockin: LockInSetup::default(),
            spectroscopy: SpectroscopySetup::default(),
            compliance: 10.0,
            state: Arc::new(Mutex::new(DeviceState {
                gate: 0.0,
                reads: 0,
                fail_after_reads: None,
            })),
        }
    }

    pub fn with_lockin(mut self, lockin: LockInSetup) -> Self {
        self.lockin = lockin;
        self
    }

    pub fn with_spectroscopy(mut self, spectroscopy: SpectroscopySetup) -> Self {
        self.spectroscopy = spectroscopy;
        self
    }

    /// Largest gate magnitude the source accepts (V).
    pub fn with_compliance(mut self, compliance: f64) -> Self {
        self.compliance = compliance.abs();
        self
    }

    /// Every read after the first `reads` fails with a communication error.
    pub fn fail_after_reads(self, reads: u64) -> Self {
        self.lock().fail_after_reads = Some(reads);
        self
    }

    pub fn model(&self) -> &GrapheneModel {
        &self.model
    }

    pub fn gate_voltage(&self) -> f64 {
        self.lock().gate
    }

    pub fn gate(&self) -> SimulatedGate {
        SimulatedGate {
            device: self.clone(),
        }
    }

    pub fn lockin(&self) -> SimulatedLockIn {
        SimulatedLockIn {
            device: self.clone(),
        }
    }

    pub fn spectrometer(&self) -> SimulatedSpectrometer {
        SimulatedSpectrometer {
            device: self.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_read(&self, device: &str) -> Result<f64, InstrumentError> {
        let mut state = self.lock();
        state.reads += 1;
        if let Some(limit) = state.fail_after_reads {
            if state.reads > limit {
                return Err(InstrumentError::communication(device, "no response"));
            }
        }
        Ok(state.gate)
    }

    fn series_voltage(&self, gate: f64) -> f64 {
        let r = self.model.resistance(gate);
        let r1 = self.lockin.series_resistance;
        self.lockin.amplitude * r1 / (r1 + r)
    }
}

pub struct SimulatedGate {
    device: SimulatedDevice,
}

impl Actuator for SimulatedGate {
    fn current_value(&mut self) -> Result<f64, InstrumentError> {
        Ok(self.device.gate_voltage())
    }

    fn set_value(&mut self, value: f64) -> Result<(), InstrumentError> {
        if !value.is_finite() || value.abs() > self.device.compliance {
            return Err(InstrumentError::Rejected {
                device: "sim-gate".into(),
                value,
                reason: format!("outside +/-{} V range", self.device.compliance),
            });
        }
        self.device.lock().gate = value;
        Ok(())
    }
}

pub struct SimulatedLockIn {
    device: SimulatedDevice,
}

impl Sampler for SimulatedLockIn {
    fn read_channel(&mut self, channel: ChannelId) -> Result<Reading, InstrumentError> {
        let gate = self.device.begin_read("sim-lockin")?;
        let v = self.device.series_voltage(gate);
        let phase = self.device.lockin.phase;
        let value = match channel.0 {
            i if i == tags::DEMOD_X.index => v * phase.cos(),
            i if i == tags::DEMOD_Y.index => v * phase.sin(),
            i if i == tags::RESISTANCE_RATIO.index => {
                self.device.model.resistance(gate) / self.device.lockin.series_resistance
            }
            i if i == tags::GATE_OUTPUT.index => gate,
            other => {
                return Err(InstrumentError::UnknownChannel {
                    device: "sim-lockin".into(),
                    channel: other,
                })
            }
        };
        Ok(Reading::Scalar(value))
    }
}

pub struct SimulatedSpectrometer {
    device: SimulatedDevice,
}

impl SpectroscopySampler for SimulatedSpectrometer {
    fn start(&mut self) -> Result<SpectroscopyRecord, InstrumentError> {
        let gate = self.device.begin_read("sim-spectrometer")?;
        let setup = &self.device.spectroscopy;
        let dirac = self.device.model.dirac_energy(gate);
        let n = setup.points.max(2);
        let step = (setup.bias_end - setup.bias_start) / (n - 1) as f64;

        // I(V) is the integral from 0 of g0 + k|v - E_D|.
        let primitive = |v: f64| {
            let d = v - dirac;
            setup.base_conductance * v + setup.slope * d * d.abs() / 2.0
        };
        let bias: Vec<f64> = (0..n).map(|i| setup.bias_start + step * i as f64).collect();
        let current: Vec<f64> = bias.iter().map(|&v| primitive(v) - primitive(0.0)).collect();
        let didv: Vec<f64> = bias
            .iter()
            .map(|&v| {
                (setup.base_conductance + setup.slope * (v - dirac).abs())
                    * self.device.lockin.amplitude
            })
            .collect();

        Ok(SpectroscopyRecord {
            traces: vec![
                Trace {
                    name: "Bias calc (V)".into(),
                    values: bias,
                },
                Trace {
                    name: "Current (A)".into(),
                    values: current,
                },
                Trace {
                    name: "LI Demod 1 X (A)".into(),
                    values: didv,
                },
            ],
            parameters: vec![
                ("Gate (V)".into(), gate),
                ("Lock-in amplitude (V)".into(), self.device.lockin.amplitude),
                ("Lock-in frequency (Hz)".into(), self.device.lockin.frequency),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resistance_peaks_at_dirac_point() {
        let model = GrapheneModel::default();
        let peak = model.resistance(model.dirac_point);
        assert!(peak > model.resistance(model.dirac_point + 1.0));
        assert!(peak > model.resistance(model.dirac_point - 1.0));
        let expected = 1e3 + 1.0 / (E_CHARGE * 0.5 * 1e15);
        assert!((peak - expected).abs() < 1e-6);
    }

    #[test]
    fn front_ends_share_gate_state() {
        let device = SimulatedDevice::new(GrapheneModel::default());
        let mut gate = device.gate();
        let mut lockin = device.lockin();
        gate.set_value(0.2).unwrap();
        let ratio = lockin.read_channel(tags::RESISTANCE_RATIO.channel()).unwrap();
        let expected = device.model().resistance(0.2) / 1e5;
        assert!((ratio.as_scalar().unwrap() - expected).abs() < 1e-12);
        assert!(expected > 0.13 && expected < 0.14);
        assert_eq!(device.gate_voltage(), 0.2);
    }

    #[test]
    fn gate_rejects_values_beyond_compliance() {
        let device = SimulatedDevice::new(GrapheneModel::default()).with_compliance(5.0);
        let mut gate = device.gate();
        assert!(matches!(
            gate.set_value(6.0),
            Err(InstrumentError::Rejected { .. })
        ));
        assert_eq!(device.gate_voltage(), 0.0);
    }

    #[test]
    fn injected_fault_fails_later_reads() {
        let device = SimulatedDevice::new(GrapheneModel::default()).fail_after_reads(2);
        let mut lockin = device.lockin();
        assert!(lockin.read_channel(tags::DEMOD_X.channel()).is_ok());
        assert!(lockin.read_channel(tags::DEMOD_Y.channel()).is_ok());
        assert!(matches!(
            lockin.read_channel(tags::DEMOD_X.channel()),
            Err(InstrumentError::Communication { .. })
        ));
    }

    #[test]
    fn spectrum_minimum_tracks_dirac_energy() {
        let device = SimulatedDevice::new(GrapheneModel::default());
        let mut gate = device.gate();
        gate.set_value(2.2).unwrap();
        let record = device.spectrometer().start().unwrap();
        let bias = record.trace("Bias calc (V)").unwrap();
        let didv = record.trace("LI Demod 1 X (A)").unwrap();
        let (min_index, _) = didv
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |acc, (i, &v)| if v < acc.1 { (i, v) } else { acc });
        let expected = device.model().dirac_energy(2.2);
        assert!(expected < 0.0);
        assert!((bias[min_index] - expected).abs() <= 0.005 + 1e-9);
    }
}

//! Post-processing for recorded traces.
//!
//! Smoothing and derivatives for spectroscopy, Gaussian broadening, and the
//! gate-capacitance model that maps Dirac-point energy to gate voltage.

use thiserror::Error;

/// Elementary charge (C).
pub const E_CHARGE: f64 = 1.602_176_634e-19;
/// Reduced Planck constant (eV·s).
pub const HBAR_EV_S: f64 = 6.582_119_569e-16;
/// Vacuum permittivity (F/m).
pub const EPSILON_0: f64 = 8.854_187_812_8e-12;
/// Graphene Fermi velocity (m/s).
pub const FERMI_VELOCITY: f64 = 1e6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("window length must be odd and positive (got {0})")]
    EvenWindow(usize),

    #[error("polynomial order {order} must be smaller than window length {window}")]
    OrderTooLarge { order: usize, window: usize },

    #[error("trace of {len} points is shorter than window length {window}")]
    TraceTooShort { len: usize, window: usize },

    #[error("sample spacing must be finite and non-zero (got {0})")]
    InvalidSpacing(f64),

    #[error("gaussian width must be finite and positive (got {0})")]
    InvalidWidth(f64),

    #[error("least-squares fit is singular")]
    Singular,
}

/// Rescales `values` onto [0, 1]. A flat trace maps to all zeros.
pub fn normalize_min_max(values: &[f64]) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = max - min;
    if span.is_nan() || span <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / span).collect()
}

/// Element-wise `1 / x`, e.g. resistance to conductance.
pub fn reciprocal(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| v.recip()).collect()
}

/// Savitzky-Golay filter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavGol {
    pub window: usize,
    pub order: usize,
    pub deriv: usize,
    pub delta: f64,
}

impl SavGol {
    pub fn smooth(window: usize, order: usize) -> Self {
        Self {
            window,
            order,
            deriv: 0,
            delta: 1.0,
        }
    }

    pub fn derivative(window: usize, order: usize, deriv: usize, delta: f64) -> Self {
        Self {
            window,
            order,
            deriv,
            delta,
        }
    }

    fn validate(&self, len: usize) -> Result<(), AnalysisError> {
        if self.window == 0 || self.window % 2 == 0 {
            return Err(AnalysisError::EvenWindow(self.window));
        }
        if self.order >= self.window {
            return Err(AnalysisError::OrderTooLarge {
                order: self.order,
                window: self.window,
            });
        }
        if len < self.window {
            return Err(AnalysisError::TraceTooShort {
                len,
                window: self.window,
            });
        }
        if !self.delta.is_finite() || self.delta == 0.0 {
            return Err(AnalysisError::InvalidSpacing(self.delta));
        }
        Ok(())
    }

    /// Filters `values`. Interior points use the centred window; the first
    /// and last half-windows are evaluated on a polynomial fitted to the
    /// edge window.
    pub fn apply(&self, values: &[f64]) -> Result<Vec<f64>, AnalysisError> {
        self.validate(values.len())?;
        let half = self.window / 2;
        let n = values.len();
        let mut out = Vec::with_capacity(n);

        let head = polyfit(&values[..self.window], self.order)?;
        for i in 0..half {
            out.push(self.evaluate(&head, i as f64 - half as f64));
        }
        for centre in half..n - half {
            let coeffs = polyfit(&values[centre - half..=centre + half], self.order)?;
            out.push(self.evaluate(&coeffs, 0.0));
        }
        let tail = polyfit(&values[n - self.window..], self.order)?;
        for i in n - half..n {
            let x = (i + self.window - n) as f64 - half as f64;
            out.push(self.evaluate(&tail, x));
        }
        Ok(out)
    }

    fn evaluate(&self, coeffs: &[f64], x: f64) -> f64 {
        let mut acc = 0.0;
        for (k, &c) in coeffs.iter().enumerate().skip(self.deriv).rev() {
            let falling: f64 = ((k - self.deriv + 1)..=k).map(|j| j as f64).product();
            acc = acc * x + c * falling;
        }
        acc / self.delta.powi(self.deriv as i32)
    }
}

/// Least-squares polynomial through `values` sampled at offsets centred on
/// the middle of the slice. Returns coefficients from x^0 upwards.
fn polyfit(values: &[f64], order: usize) -> Result<Vec<f64>, AnalysisError> {
    let m = order + 1;
    let centre = (values.len() - 1) as f64 / 2.0;
    let mut ata = vec![vec![0.0; m]; m];
    let mut aty = vec![0.0; m];
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64 - centre;
        let mut powers = vec![1.0; m];
        for k in 1..m {
            powers[k] = powers[k - 1] * x;
        }
        for r in 0..m {
            aty[r] += powers[r] * y;
            for c in 0..m {
                ata[r][c] += powers[r] * powers[c];
            }
        }
    }
    solve(ata, aty)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, AnalysisError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .ok_or(AnalysisError::Singular)?;
        if a[pivot][col].abs() < 1e-12 {
            return Err(AnalysisError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

/// Gaussian evaluated on `axis`, normalised to unit sum.
pub fn gaussian_kernel(axis: &[f64], mu: f64, sigma: f64) -> Result<Vec<f64>, AnalysisError> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(AnalysisError::InvalidWidth(sigma));
    }
    let mut kernel: Vec<f64> = axis
        .iter()
        .map(|x| (-(x - mu).powi(2) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    if total > 0.0 {
        kernel.iter_mut().for_each(|k| *k /= total);
    }
    Ok(kernel)
}

/// Discrete convolution cropped to `max(a.len(), b.len())` samples centred on
/// the full result.
pub fn convolve_same(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let full_len = a.len() + b.len() - 1;
    let mut full = vec![0.0; full_len];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            full[i + j] += x * y;
        }
    }
    let len = a.len().max(b.len());
    let start = (a.len().min(b.len()) - 1) / 2;
    full[start..start + len].to_vec()
}

/// Convolves `values` with a unit-sum Gaussian of width `sigma` sampled on
/// `axis` and centred at zero.
pub fn gaussian_broaden(
    values: &[f64],
    axis: &[f64],
    sigma: f64,
) -> Result<Vec<f64>, AnalysisError> {
    let kernel = gaussian_kernel(axis, 0.0, sigma)?;
    Ok(convolve_same(values, &kernel))
}

/// Quantum capacitance of graphene (F/m²) at energy `energy_ev` from the
/// Dirac point.
pub fn quantum_capacitance(energy_ev: f64) -> f64 {
    let hbar_vf = HBAR_EV_S * FERMI_VELOCITY;
    let density_of_states = 2.0 * energy_ev.abs() / (std::f64::consts::PI * hbar_vf * hbar_vf);
    E_CHARGE * density_of_states
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DielectricLayer {
    /// Thickness (m).
    pub thickness: f64,
    pub relative_permittivity: f64,
}

impl DielectricLayer {
    pub const fn new(thickness: f64, relative_permittivity: f64) -> Self {
        Self {
            thickness,
            relative_permittivity,
        }
    }
}

/// Parallel-plate capacitance per area (F/m²) of layers stacked in series.
pub fn stack_capacitance(layers: &[DielectricLayer]) -> f64 {
    let inverse: f64 = layers
        .iter()
        .map(|l| l.thickness / (EPSILON_0 * l.relative_permittivity))
        .sum();
    inverse.recip()
}

pub fn series_capacitance(a: f64, b: f64) -> f64 {
    (a.recip() + b.recip()).recip()
}

pub fn to_uf_per_cm2(farads_per_m2: f64) -> f64 {
    farads_per_m2 * 1e6 * 1e-4
}

/// Gate voltage (relative to charge neutrality) that places the Fermi level
/// `energy_ev` away from the Dirac point, for gate capacitance `capacitance`
/// in F/m².
pub fn energy_to_gate_voltage(energy_ev: f64, capacitance: f64) -> f64 {
    let alpha = capacitance / E_CHARGE;
    let k = energy_ev / (HBAR_EV_S * FERMI_VELOCITY);
    energy_ev.signum() * k * k / (std::f64::consts::PI * alpha)
}

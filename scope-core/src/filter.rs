//! # Digital Filter Module
//!
//! Designs 4th-order Butterworth filters and runs them over a calibrated
//! window.
//!
//! ## Design
//! The design follows the classic analog-prototype route:
//! 1. Butterworth prototype poles on the left half of the unit circle
//! 2. Pre-warp the cutoff(s) for the bilinear transform
//! 3. Low→low, low→high or low→band transform in zero-pole-gain form
//! 4. Bilinear transform to the z-plane
//! 5. Expand zeros and poles into `(b, a)` polynomials
//!
//! ## Application
//! The filter runs in transposed direct form II. The delay line starts at rest
//! for every window: nothing is carried over between ticks, so the first few
//! milliseconds of each filtered window contain the step transient of the
//! filter. This is a known limitation of per-window filtering.

use std::f64::consts::PI;
use std::str::FromStr;

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FilterDesignError;

/// Order of every designed filter.
pub const FILTER_ORDER: usize = 4;

/// Bilinear transform constant for a design normalized to fs = 2 (Nyquist = 1).
const BILINEAR_FS2: f64 = 4.0;

type C64 = Complex<f64>;

/// Filter response selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    None,
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lowpass" | "low" => Ok(Self::Lowpass),
            "highpass" | "high" => Ok(Self::Highpass),
            "bandpass" | "band" => Ok(Self::Bandpass),
            other => Err(format!("unknown filter kind '{other}'")),
        }
    }
}

/// Filter selection read by the pipeline on every tick.
///
/// `Lowpass` cuts at `cutoff_low_hz`, `Highpass` at `cutoff_high_hz`, and
/// `Bandpass` passes the band between the two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub cutoff_low_hz: f64,
    pub cutoff_high_hz: f64,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            kind: FilterKind::Lowpass,
            cutoff_low_hz: 10.0,
            cutoff_high_hz: 100.0,
        }
    }
}

impl FilterSpec {
    pub fn none() -> Self {
        Self {
            kind: FilterKind::None,
            ..Self::default()
        }
    }

    pub fn lowpass(cutoff_hz: f64) -> Self {
        Self {
            kind: FilterKind::Lowpass,
            cutoff_low_hz: cutoff_hz,
            ..Self::default()
        }
    }

    pub fn highpass(cutoff_hz: f64) -> Self {
        Self {
            kind: FilterKind::Highpass,
            cutoff_high_hz: cutoff_hz,
            ..Self::default()
        }
    }

    pub fn bandpass(low_hz: f64, high_hz: f64) -> Self {
        Self {
            kind: FilterKind::Bandpass,
            cutoff_low_hz: low_hz,
            cutoff_high_hz: high_hz,
        }
    }
}

/// Transfer function coefficients, normalized so that `a[0] == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct IirCoefficients {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

impl IirCoefficients {
    /// Pass-through filter, `H(z) = 1`.
    pub fn identity() -> Self {
        Self {
            b: vec![1.0],
            a: vec![1.0],
        }
    }

    fn is_finite(&self) -> bool {
        self.b.iter().chain(self.a.iter()).all(|c| c.is_finite())
    }

    /// Runs the filter over `input` starting from rest.
    ///
    /// Without a usable leading denominator coefficient (`a` empty or
    /// `a[0] == 0`) the input is returned unchanged.
    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        if self.a.first().is_none_or(|&a0| a0 == 0.0) {
            warn!("[FILTER] Degenerate denominator {:?}, passing window through", self.a);
            return input.to_vec();
        }

        let order = self.b.len().max(self.a.len());
        let mut b = self.b.clone();
        let mut a = self.a.clone();
        b.resize(order, 0.0);
        a.resize(order, 0.0);

        let a0 = a[0];
        if a0 != 1.0 {
            b.iter_mut().for_each(|c| *c /= a0);
            a.iter_mut().for_each(|c| *c /= a0);
        }

        if order == 1 {
            return input.iter().map(|&x| b[0] * x).collect();
        }

        let mut state = vec![0.0; order - 1];
        let last = order - 2;
        input
            .iter()
            .map(|&x| {
                let y = b[0] * x + state[0];
                for i in 0..last {
                    state[i] = b[i + 1] * x + state[i + 1] - a[i + 1] * y;
                }
                state[last] = b[order - 1] * x - a[order - 1] * y;
                y
            })
            .collect()
    }
}

/// Zeros, poles and gain of a filter in either s- or z-plane.
#[derive(Debug, Clone)]
struct Zpk {
    zeros: Vec<C64>,
    poles: Vec<C64>,
    gain: f64,
}

/// Analog Butterworth prototype with unit cutoff.
fn butterworth_prototype(order: usize) -> Zpk {
    let n = order as f64;
    let poles = (0..order)
        .map(|k| {
            let m = -(n - 1.0) + 2.0 * k as f64;
            -C64::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect();
    Zpk {
        zeros: Vec::new(),
        poles,
        gain: 1.0,
    }
}

/// Maps a normalized digital cutoff onto the analog axis used by the design.
fn prewarp(normalized: f64) -> f64 {
    BILINEAR_FS2 * (PI * normalized / 2.0).tan()
}

fn lowpass_transform(proto: Zpk, warped: f64) -> Zpk {
    let degree = (proto.poles.len() - proto.zeros.len()) as i32;
    Zpk {
        zeros: proto.zeros.iter().map(|&z| z * warped).collect(),
        poles: proto.poles.iter().map(|&p| p * warped).collect(),
        gain: proto.gain * warped.powi(degree),
    }
}

fn highpass_transform(proto: Zpk, warped: f64) -> Zpk {
    let degree = proto.poles.len() - proto.zeros.len();
    let warped = C64::new(warped, 0.0);
    let num: C64 = proto.zeros.iter().map(|&z| -z).product();
    let den: C64 = proto.poles.iter().map(|&p| -p).product();

    let mut zeros: Vec<C64> = proto.zeros.iter().map(|&z| warped / z).collect();
    zeros.extend(std::iter::repeat_n(C64::new(0.0, 0.0), degree));
    Zpk {
        zeros,
        poles: proto.poles.iter().map(|&p| warped / p).collect(),
        gain: proto.gain * (num / den).re,
    }
}

fn bandpass_transform(proto: Zpk, warped_low: f64, warped_high: f64) -> Zpk {
    let degree = proto.poles.len() - proto.zeros.len();
    let bandwidth = warped_high - warped_low;
    let centre_sq = C64::new(warped_low * warped_high, 0.0);

    let split = |roots: &[C64]| -> Vec<C64> {
        let scaled: Vec<C64> = roots.iter().map(|&r| r * (bandwidth / 2.0)).collect();
        let upper = scaled.iter().map(|&r| r + (r * r - centre_sq).sqrt());
        let lower = scaled.iter().map(|&r| r - (r * r - centre_sq).sqrt());
        upper.chain(lower).collect()
    };

    let mut zeros = split(&proto.zeros);
    zeros.extend(std::iter::repeat_n(C64::new(0.0, 0.0), degree));
    Zpk {
        zeros,
        poles: split(&proto.poles),
        gain: proto.gain * bandwidth.powi(degree as i32),
    }
}

fn bilinear(analog: Zpk) -> Zpk {
    let fs2 = C64::new(BILINEAR_FS2, 0.0);
    let degree = analog.poles.len() - analog.zeros.len();

    let num: C64 = analog.zeros.iter().map(|&z| fs2 - z).product();
    let den: C64 = analog.poles.iter().map(|&p| fs2 - p).product();

    let mut zeros: Vec<C64> = analog.zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    zeros.extend(std::iter::repeat_n(C64::new(-1.0, 0.0), degree));
    Zpk {
        zeros,
        poles: analog.poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect(),
        gain: analog.gain * (num / den).re,
    }
}

/// Expands `prod(x - root)` into polynomial coefficients, highest power first.
fn poly(roots: &[C64]) -> Vec<f64> {
    let mut coeffs = vec![C64::new(1.0, 0.0)];
    for &root in roots {
        let mut next = coeffs.clone();
        next.push(C64::new(0.0, 0.0));
        for i in 1..next.len() {
            next[i] -= root * coeffs[i - 1];
        }
        coeffs = next;
    }
    coeffs.into_iter().map(|c| c.re).collect()
}

fn normalized_cutoff(cutoff_hz: f64, nyquist: f64) -> Result<f64, FilterDesignError> {
    let normalized = cutoff_hz / nyquist;
    if !normalized.is_finite() || normalized <= 0.0 || normalized >= 1.0 {
        return Err(FilterDesignError::CutoffOutOfRange(normalized));
    }
    Ok(normalized)
}

/// Designs the transfer function for `spec` at `sample_rate` Hz.
///
/// `FilterKind::None` yields [`IirCoefficients::identity`].
pub fn design(spec: &FilterSpec, sample_rate: f64) -> Result<IirCoefficients, FilterDesignError> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(FilterDesignError::InvalidSampleRate(sample_rate));
    }
    let nyquist = sample_rate / 2.0;
    let proto = butterworth_prototype(FILTER_ORDER);

    let analog = match spec.kind {
        FilterKind::None => return Ok(IirCoefficients::identity()),
        FilterKind::Lowpass => {
            let wn = normalized_cutoff(spec.cutoff_low_hz, nyquist)?;
            lowpass_transform(proto, prewarp(wn))
        }
        FilterKind::Highpass => {
            let wn = normalized_cutoff(spec.cutoff_high_hz, nyquist)?;
            highpass_transform(proto, prewarp(wn))
        }
        FilterKind::Bandpass => {
            let low = normalized_cutoff(spec.cutoff_low_hz, nyquist)?;
            let high = normalized_cutoff(spec.cutoff_high_hz, nyquist)?;
            if low >= high {
                return Err(FilterDesignError::InvertedBand {
                    low: spec.cutoff_low_hz,
                    high: spec.cutoff_high_hz,
                });
            }
            bandpass_transform(proto, prewarp(low), prewarp(high))
        }
    };

    let digital = bilinear(analog);
    let coefficients = IirCoefficients {
        b: poly(&digital.zeros)
            .into_iter()
            .map(|c| c * digital.gain)
            .collect(),
        a: poly(&digital.poles),
    };

    if !coefficients.is_finite() {
        return Err(FilterDesignError::NonFiniteCoefficients);
    }
    Ok(coefficients)
}

/// Filters a window, reporting design or numeric failures.
pub fn try_filter_window(
    window: &[f64],
    spec: &FilterSpec,
    sample_rate: f64,
) -> Result<Vec<f64>, FilterDesignError> {
    if spec.kind == FilterKind::None {
        return Ok(window.to_vec());
    }
    let coefficients = design(spec, sample_rate)?;
    let filtered = coefficients.apply(window);
    if filtered.iter().any(|y| !y.is_finite()) {
        return Err(FilterDesignError::NonFiniteOutput);
    }
    Ok(filtered)
}

/// Result of the filter stage for one tick.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    pub samples: Vec<f64>,
    /// Set when the design failed and `samples` is the unfiltered input.
    pub fell_back: bool,
}

/// Filters a window, falling back to the unfiltered input on any failure.
pub fn filter_window(window: &[f64], spec: &FilterSpec, sample_rate: f64) -> FilterOutput {
    match try_filter_window(window, spec, sample_rate) {
        Ok(samples) => FilterOutput {
            samples,
            fell_back: false,
        },
        Err(e) => {
            warn!("[FILTER] {:?} design failed ({}), passing window through", spec.kind, e);
            FilterOutput {
                samples: window.to_vec(),
                fell_back: true,
            }
        }
    }
}

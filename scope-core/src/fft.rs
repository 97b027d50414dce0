//! # Fast Fourier Transform (FFT) Module
//!
//! Turns a real-valued window into its one-sided magnitude spectrum.
//!
//! ## Features
//! - FFT planning through RustFFT, with plans cached across ticks
//! - DC offset removal so a static bias does not dominate bin 0
//! - `N/2 + 1` bins from 0 Hz to Nyquist, spaced `FS / N` apart
//!
//! No window function is applied; leakage around strong tones is expected and
//! is what the harmonic summary reports.

use rustfft::{FftPlanner, num_complex::Complex};

/// One-sided magnitude spectrum of a single window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    /// Bin centre frequencies in Hz, ascending.
    pub frequencies: Vec<f64>,
    /// `|X[k]|` for each bin in `frequencies`.
    pub magnitudes: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Iterates `(frequency, magnitude)` pairs in bin order.
    pub fn bins(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.frequencies
            .iter()
            .copied()
            .zip(self.magnitudes.iter().copied())
    }
}

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Signal to process (modified in-place)
fn remove_dc_offset(signal: &mut [f64]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f64>() / len as f64;
    for sample in signal.iter_mut() {
        *sample -= avg;
    }
}

/// Frequencies of the `n / 2 + 1` non-negative bins of an `n`-point transform.
pub fn bin_frequencies(n: usize, sample_rate: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let spacing = sample_rate / n as f64;
    (0..=n / 2).map(|k| k as f64 * spacing).collect()
}

/// Computes magnitude spectra, reusing FFT plans between calls.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f64>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer").finish_non_exhaustive()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Performs a forward FFT on the mean-removed signal.
    ///
    /// Returns an empty vector for an empty signal instead of planning a
    /// zero-length transform.
    pub fn perform_fft(&mut self, signal: &[f64]) -> Vec<Complex<f64>> {
        if signal.is_empty() {
            return Vec::new();
        }

        let mut processed_signal = signal.to_vec();
        remove_dc_offset(&mut processed_signal);

        let fft = self.planner.plan_fft_forward(processed_signal.len());

        let mut buffer: Vec<Complex<f64>> = processed_signal
            .into_iter()
            .map(|sample| Complex { re: sample, im: 0.0 })
            .collect();

        fft.process(&mut buffer);
        buffer
    }

    /// One-sided magnitude spectrum of `signal` sampled at `sample_rate` Hz.
    pub fn magnitude_spectrum(&mut self, signal: &[f64], sample_rate: f64) -> Spectrum {
        if signal.is_empty() {
            return Spectrum::default();
        }

        let n = signal.len();
        let transform = self.perform_fft(signal);
        let magnitudes = transform
            .iter()
            .take(n / 2 + 1)
            .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
            .collect();

        Spectrum {
            frequencies: bin_frequencies(n, sample_rate),
            magnitudes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_empty_window_gives_empty_spectrum() {
        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.magnitude_spectrum(&[], 1000.0);
        assert!(spectrum.is_empty());
        assert!(spectrum.frequencies.is_empty());
        assert!(analyzer.perform_fft(&[]).is_empty());
    }

    #[test]
    fn test_bin_layout_for_power_of_two() {
        let freqs = bin_frequencies(512, 1000.0);
        assert_eq!(freqs.len(), 257);
        assert_eq!(freqs[0], 0.0);
        assert!((freqs[1] - 1000.0 / 512.0).abs() < 1e-12);
        assert!((freqs[256] - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_bin_layout_for_odd_length() {
        let freqs = bin_frequencies(5, 10.0);
        assert_eq!(freqs, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_constant_offset_is_removed() {
        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.magnitude_spectrum(&[3.0; 64], 1000.0);
        assert_eq!(spectrum.len(), 33);
        assert!(spectrum.magnitudes.iter().all(|&m| m < 1e-9));
    }

    #[test]
    fn test_bin_centred_tone_magnitude() {
        // 8 full cycles in 256 samples lands exactly on bin 8.
        let n = 256;
        let amplitude = 2.0;
        let signal: Vec<f64> = (0..n)
            .map(|i| 5.0 + amplitude * (2.0 * PI * 8.0 * i as f64 / n as f64).sin())
            .collect();
        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.magnitude_spectrum(&signal, n as f64);

        assert!((spectrum.magnitudes[8] - amplitude * n as f64 / 2.0).abs() < 1e-6);
        assert!(spectrum.magnitudes[0] < 1e-9);
        assert!(spectrum.magnitudes[20] < 1e-6);
        assert_eq!(spectrum.bins().count(), n / 2 + 1);
    }
}

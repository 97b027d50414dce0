//! # Harmonic Detection Module
//!
//! Picks the strongest components out of a magnitude spectrum and formats
//! them for display.
//!
//! Selection is deliberately simple: every bin above the noise floor is a
//! candidate, candidates are ranked by magnitude, and the top few are kept.
//! Leakage around a single strong tone can therefore fill several slots.

use serde::{Deserialize, Serialize};

use crate::fft::Spectrum;

/// Magnitude a bin must exceed to count as a harmonic.
pub const DEFAULT_NOISE_FLOOR: f64 = 10.0;

/// Number of harmonics reported per frame.
pub const DEFAULT_MAX_PEAKS: usize = 3;

/// A significant spectral component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicPeak {
    /// Bin frequency in Hz.
    pub frequency: f64,
    pub magnitude: f64,
}

/// Returns up to `max_peaks` bins above `threshold`, strongest first.
///
/// Bins with equal magnitude keep their spectral order, so the lower
/// frequency wins a tie.
pub fn find_harmonic_peaks(
    spectrum: &Spectrum,
    threshold: f64,
    max_peaks: usize,
) -> Vec<HarmonicPeak> {
    let mut candidates: Vec<HarmonicPeak> = spectrum
        .bins()
        .filter(|&(_, magnitude)| magnitude > threshold)
        .map(|(frequency, magnitude)| HarmonicPeak {
            frequency,
            magnitude,
        })
        .collect();

    // `sort_by` is stable: ties stay in ascending-frequency order.
    candidates.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
    candidates.truncate(max_peaks);
    candidates
}

/// Human-readable one-line summary of the detected harmonics.
pub fn harmonic_summary(peaks: &[HarmonicPeak]) -> String {
    if peaks.is_empty() {
        return "No harmonics detected above threshold".to_string();
    }

    let mut text = String::from("Detected harmonics: ");
    for peak in peaks.iter().take(DEFAULT_MAX_PEAKS) {
        text.push_str(&format!(
            "| {:.1} Hz ({:.1} amp) ",
            peak.frequency, peak.magnitude
        ));
    }
    text.truncate(text.trim_end().len());
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::SpectrumAnalyzer;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn spectrum_from(magnitudes: &[f64]) -> Spectrum {
        Spectrum {
            frequencies: (0..magnitudes.len()).map(|k| k as f64 * 10.0).collect(),
            magnitudes: magnitudes.to_vec(),
        }
    }

    #[test]
    fn test_sine_at_fifty_hz_is_top_peak() {
        let n = 512;
        let fs = 1000.0;
        let amplitude = 5.0;
        let mut rng = StdRng::seed_from_u64(7);
        let window: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                amplitude * (2.0 * PI * 50.0 * t).sin() + rng.gen_range(-0.05..0.05)
            })
            .collect();

        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.magnitude_spectrum(&window, fs);
        let peaks = find_harmonic_peaks(&spectrum, DEFAULT_NOISE_FLOOR, DEFAULT_MAX_PEAKS);

        assert!(!peaks.is_empty());
        assert!(peaks.len() <= 3);
        assert!((peaks[0].frequency - 50.0).abs() <= fs / n as f64);
        assert!(peaks.windows(2).all(|w| w[0].magnitude >= w[1].magnitude));
    }

    #[test]
    fn test_at_most_max_peaks_are_returned() {
        let spectrum = spectrum_from(&[0.0, 50.0, 40.0, 30.0, 20.0, 15.0]);
        let peaks = find_harmonic_peaks(&spectrum, DEFAULT_NOISE_FLOOR, 3);
        let freqs: Vec<f64> = peaks.iter().map(|p| p.frequency).collect();
        assert_eq!(freqs, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_bins_at_or_below_threshold_are_ignored() {
        let spectrum = spectrum_from(&[0.0, 10.0, 11.0, 9.0]);
        let peaks = find_harmonic_peaks(&spectrum, 10.0, 3);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].frequency, 20.0);
    }

    #[test]
    fn test_ties_prefer_lower_frequency() {
        let spectrum = spectrum_from(&[0.0, 25.0, 40.0, 25.0, 25.0]);
        let peaks = find_harmonic_peaks(&spectrum, 10.0, 3);
        let freqs: Vec<f64> = peaks.iter().map(|p| p.frequency).collect();
        assert_eq!(freqs, vec![20.0, 10.0, 30.0]);
    }

    #[test]
    fn test_empty_spectrum_has_no_peaks() {
        let peaks = find_harmonic_peaks(&Spectrum::default(), 10.0, 3);
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_summary_formats_one_decimal() {
        let peaks = [
            HarmonicPeak {
                frequency: 50.78,
                magnitude: 1234.56,
            },
            HarmonicPeak {
                frequency: 48.83,
                magnitude: 600.04,
            },
        ];
        assert_eq!(
            harmonic_summary(&peaks),
            "Detected harmonics: | 50.8 Hz (1234.6 amp) | 48.8 Hz (600.0 amp)"
        );
    }

    #[test]
    fn test_summary_without_peaks() {
        assert_eq!(harmonic_summary(&[]), "No harmonics detected above threshold");
    }
}

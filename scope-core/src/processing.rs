//! # Frame Processing Module
//!
//! Runs one buffer snapshot through calibration, filtering and spectral
//! analysis to produce an [`AnalysisFrame`].
//!
//! A processor is owned by whichever context drives the ticks; it keeps the
//! FFT planner warm and numbers the frames it emits.

use tracing::debug;

use crate::AnalysisFrame;
use crate::calibration::CalibrationParams;
use crate::config::{AnalysisConfig, ScopeConfig, SpectrumSource};
use crate::fft::SpectrumAnalyzer;
use crate::filter::{FilterSpec, filter_window};
use crate::harmonics::find_harmonic_peaks;
use crate::ring_buffer::RawSample;

#[derive(Debug)]
pub struct FrameProcessor {
    calibration: CalibrationParams,
    sample_rate: f64,
    analysis: AnalysisConfig,
    analyzer: SpectrumAnalyzer,
    sequence: u64,
}

impl FrameProcessor {
    pub fn new(config: &ScopeConfig) -> Self {
        Self {
            calibration: config.calibration,
            sample_rate: config.acquisition.sample_rate,
            analysis: config.analysis.clone(),
            analyzer: SpectrumAnalyzer::new(),
            sequence: 0,
        }
    }

    /// Number of frames produced so far.
    pub fn frames_processed(&self) -> u64 {
        self.sequence
    }

    /// Calibrate → filter → spectrum → harmonics for one window.
    pub fn process(&mut self, window: &[RawSample], filter: FilterSpec) -> AnalysisFrame {
        let raw = self.calibration.calibrate_window(window);
        let filter_output = filter_window(&raw, &filter, self.sample_rate);

        let analysed = match self.analysis.spectrum_source {
            SpectrumSource::Filtered => &filter_output.samples,
            SpectrumSource::Calibrated => &raw,
        };
        let spectrum = self.analyzer.magnitude_spectrum(analysed, self.sample_rate);
        let harmonics =
            find_harmonic_peaks(&spectrum, self.analysis.noise_floor, self.analysis.max_peaks);

        self.sequence += 1;
        debug!(
            "[TICK] Frame {}: {} samples, {} harmonics, filter {:?}{}",
            self.sequence,
            raw.len(),
            harmonics.len(),
            filter.kind,
            if filter_output.fell_back { " (bypassed)" } else { "" }
        );

        AnalysisFrame {
            sequence: self.sequence,
            filter,
            filter_fell_back: filter_output.fell_back,
            raw,
            filtered: filter_output.samples,
            spectrum,
            harmonics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterKind;

    fn tone_window(config: &ScopeConfig, freq: f64, amplitude: f64) -> Vec<RawSample> {
        let fs = config.acquisition.sample_rate;
        (0..config.acquisition.buffer_size)
            .map(|i| {
                let value = amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / fs).sin();
                config.calibration.physical_to_raw(value)
            })
            .collect()
    }

    #[test]
    fn test_frame_carries_all_stages() {
        let config = ScopeConfig::default();
        let mut processor = FrameProcessor::new(&config);
        let window = tone_window(&config, 50.0, 5.0);

        let frame = processor.process(&window, FilterSpec::none());

        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.raw.len(), 512);
        assert_eq!(frame.filtered, frame.raw);
        assert_eq!(frame.spectrum.len(), 257);
        assert!(!frame.filter_fell_back);
        assert!((frame.harmonics[0].frequency - 50.0).abs() <= 1000.0 / 512.0);
    }

    #[test]
    fn test_sequence_increments_per_frame() {
        let config = ScopeConfig::default();
        let mut processor = FrameProcessor::new(&config);
        let window = vec![512; 512];
        processor.process(&window, FilterSpec::none());
        let frame = processor.process(&window, FilterSpec::none());
        assert_eq!(frame.sequence, 2);
        assert_eq!(processor.frames_processed(), 2);
    }

    #[test]
    fn test_highpass_removes_tone_from_filtered_spectrum() {
        let mut config = ScopeConfig::default();
        config.analysis.spectrum_source = SpectrumSource::Filtered;
        let mut processor = FrameProcessor::new(&config);
        let window = tone_window(&config, 20.0, 5.0);

        let unfiltered = processor.process(&window, FilterSpec::none());
        let filtered = processor.process(&window, FilterSpec::highpass(200.0));

        assert_eq!(filtered.filter.kind, FilterKind::Highpass);
        let peak = |frame: &AnalysisFrame| frame.harmonics.first().map_or(0.0, |p| p.magnitude);
        assert!(peak(&filtered) < 0.1 * peak(&unfiltered));
    }

    #[test]
    fn test_default_spectrum_ignores_filter() {
        let config = ScopeConfig::default();
        let mut processor = FrameProcessor::new(&config);
        let window = tone_window(&config, 20.0, 5.0);

        let plain = processor.process(&window, FilterSpec::none());
        let highpassed = processor.process(&window, FilterSpec::highpass(200.0));
        assert_eq!(plain.spectrum, highpassed.spectrum);
        assert_ne!(plain.filtered, highpassed.filtered);
    }

    #[test]
    fn test_failed_design_is_reported_on_frame() {
        let config = ScopeConfig::default();
        let mut processor = FrameProcessor::new(&config);
        let window = tone_window(&config, 50.0, 2.0);

        let frame = processor.process(&window, FilterSpec::bandpass(100.0, 10.0));
        assert!(frame.filter_fell_back);
        assert_eq!(frame.filtered, frame.raw);
    }
}

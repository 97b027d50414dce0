//! Configuration for the acquisition and analysis pipeline.
//!
//! Values are fixed at start-up. The only parameter that can change while
//! the pipeline is running is the filter selection, which lives in a
//! [`crate::pipeline::FilterControl`] seeded from [`ScopeConfig::filter`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationParams;
use crate::error::ScopeError;
use crate::filter::FilterSpec;
use crate::harmonics::{DEFAULT_MAX_PEAKS, DEFAULT_NOISE_FLOOR};

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub acquisition: AcquisitionConfig,
    pub calibration: CalibrationParams,
    /// Filter applied until the operator selects another one.
    pub filter: FilterSpec,
    pub analysis: AnalysisConfig,
}

/// Sampling and scheduling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Rate the source produces samples at, in Hz
    pub sample_rate: f64,
    /// Ring buffer capacity and analysis window length (power of two)
    pub buffer_size: usize,
    /// Interval between analysis ticks
    pub tick_interval_ms: u64,
    /// How long `stop()` waits for each worker thread before detaching it
    pub join_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1000.0,
            buffer_size: 512,
            tick_interval_ms: 50,
            join_timeout_ms: 250,
        }
    }
}

impl AcquisitionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Which window the spectral stage transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumSource {
    /// Calibrated window before filtering.
    #[default]
    Calibrated,
    /// Output of the filter stage.
    Filtered,
}

/// Harmonic detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Magnitude a bin must exceed to be reported
    pub noise_floor: f64,
    /// Maximum number of harmonics per frame
    pub max_peaks: usize,
    pub spectrum_source: SpectrumSource,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            noise_floor: DEFAULT_NOISE_FLOOR,
            max_peaks: DEFAULT_MAX_PEAKS,
            spectrum_source: SpectrumSource::Calibrated,
        }
    }
}

impl ScopeConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ScopeError> {
        let acq = &self.acquisition;
        if !acq.sample_rate.is_finite() || acq.sample_rate <= 0.0 {
            return Err(ScopeError::InvalidConfig(format!(
                "sample_rate must be positive, got {}",
                acq.sample_rate
            )));
        }
        if !acq.buffer_size.is_power_of_two() {
            return Err(ScopeError::InvalidConfig(format!(
                "buffer_size must be a non-zero power of two, got {}",
                acq.buffer_size
            )));
        }
        if acq.tick_interval_ms == 0 {
            return Err(ScopeError::InvalidConfig(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        let cal = &self.calibration;
        if cal.code_max == 0 || cal.reference_voltage <= 0.0 || cal.gain == 0.0 {
            return Err(ScopeError::InvalidConfig(
                "calibration needs a non-zero code range, reference voltage and gain".to_string(),
            ));
        }
        Ok(())
    }
}

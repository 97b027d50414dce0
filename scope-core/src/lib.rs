// scope-core/src/lib.rs

//! The core logic for the harmonic scope.
//! This crate is responsible for sample ingestion, calibration, filtering
//! and spectral analysis of a 10-bit ADC stream. It is completely headless
//! and contains no rendering code.

pub mod calibration;
pub mod config;
pub mod error;
pub mod fft;
pub mod filter;
pub mod harmonics;
pub mod pipeline;
pub mod processing;
pub mod ring_buffer;
pub mod source;

use fft::Spectrum;
use filter::FilterSpec;
use harmonics::HarmonicPeak;

pub use config::ScopeConfig;
pub use error::{FilterDesignError, ScopeError};
pub use pipeline::{FilterControl, FrameSink, Pipeline, PipelineState};

/// Represents the result of a single analysis tick.
///
/// Frames are handed to the renderer and never retained by the pipeline.
#[derive(Debug, Clone)]
pub struct AnalysisFrame {
    /// Tick counter, starting at 1 for the first frame.
    pub sequence: u64,
    /// Filter selection in effect for this tick.
    pub filter: FilterSpec,
    /// True when the filter design failed and `filtered` equals `raw`.
    pub filter_fell_back: bool,
    /// Calibrated window, oldest sample first.
    pub raw: Vec<f64>,
    /// Output of the filter stage, same length as `raw`.
    pub filtered: Vec<f64>,
    pub spectrum: Spectrum,
    /// Strongest components, descending by magnitude.
    pub harmonics: Vec<HarmonicPeak>,
}

impl AnalysisFrame {
    /// One-line harmonic summary for display.
    pub fn summary(&self) -> String {
        harmonics::harmonic_summary(&self.harmonics)
    }
}

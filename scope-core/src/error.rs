//! Error types for the acquisition and analysis core.
//!
//! None of these are fatal to a running pipeline: filter design errors are
//! turned into a passthrough for the current tick, and construction errors
//! surface before any thread is spawned.

use thiserror::Error;

/// Errors raised while building pipeline components.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// A ring buffer must hold at least one sample.
    #[error("ring buffer capacity must be greater than zero")]
    ZeroCapacity,

    /// Configuration rejected by [`crate::config::ScopeConfig::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Reasons a Butterworth design can be rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterDesignError {
    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(f64),

    /// Normalized cutoff (cutoff / Nyquist) must lie strictly inside (0, 1).
    #[error("normalized cutoff {0} is outside (0, 1)")]
    CutoffOutOfRange(f64),

    #[error("bandpass low cutoff {low} Hz must be below high cutoff {high} Hz")]
    InvertedBand { low: f64, high: f64 },

    #[error("filter design produced non-finite coefficients")]
    NonFiniteCoefficients,

    #[error("filter output contained non-finite samples")]
    NonFiniteOutput,
}

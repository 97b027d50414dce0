//! # Calibration Module
//!
//! Converts raw ADC codes into physical units (volts at the probe).
//!
//! The acquisition board reads a biased, attenuated copy of the input: the
//! signal is divided down by the hardware gain and shifted up by the offset so
//! it fits the converter's 0..V_ref range. Calibration undoes both.

use serde::{Deserialize, Serialize};

use crate::ring_buffer::RawSample;

/// Largest code a 10-bit converter reports.
pub const CODE_MAX: u16 = 1023;

/// Constants of the affine map from ADC code to physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Converter reference voltage.
    pub reference_voltage: f64,
    /// Full-scale code.
    pub code_max: u16,
    /// Hardware bias added before the converter.
    pub offset: f64,
    /// Inverse of the input divider's attenuation.
    pub gain: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            reference_voltage: 5.0,
            code_max: CODE_MAX,
            offset: 2.5,
            gain: 3.0,
        }
    }
}

impl CalibrationParams {
    /// `((code * V_ref / CODE_MAX) - offset) * gain`
    #[inline]
    pub fn raw_to_physical(&self, code: RawSample) -> f64 {
        let volts_at_adc = f64::from(code) * self.reference_voltage / f64::from(self.code_max);
        (volts_at_adc - self.offset) * self.gain
    }

    /// Inverse map, rounded and clamped to the valid code range.
    pub fn physical_to_raw(&self, value: f64) -> RawSample {
        let volts_at_adc = value / self.gain + self.offset;
        let code = (volts_at_adc * f64::from(self.code_max) / self.reference_voltage).round();
        code.clamp(0.0, f64::from(self.code_max)) as RawSample
    }

    /// Applies the calibration element-wise to a buffer snapshot.
    pub fn calibrate_window(&self, window: &[RawSample]) -> Vec<f64> {
        window.iter().map(|&code| self.raw_to_physical(code)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_full_scale_endpoints() {
        let params = CalibrationParams::default();
        assert!((params.raw_to_physical(0) - (-7.5)).abs() < EPS);
        assert!((params.raw_to_physical(1023) - 7.5).abs() < EPS);
    }

    #[test]
    fn test_mid_high_code() {
        let params = CalibrationParams::default();
        let value = params.raw_to_physical(682);
        // 682 * 5 / 1023 is exactly 10/3 V at the converter.
        assert!((value - 2.5).abs() < 1e-9, "got {value}");
        assert!(value > 2.49);
    }

    #[test]
    fn test_map_is_affine() {
        let params = CalibrationParams::default();
        let step = params.raw_to_physical(1) - params.raw_to_physical(0);
        for code in [100u16, 511, 900] {
            let delta = params.raw_to_physical(code + 1) - params.raw_to_physical(code);
            assert!((delta - step).abs() < EPS);
        }
    }

    #[test]
    fn test_inverse_recovers_every_code() {
        let params = CalibrationParams::default();
        for code in 0..=CODE_MAX {
            assert_eq!(params.physical_to_raw(params.raw_to_physical(code)), code);
        }
    }

    #[test]
    fn test_inverse_clamps_out_of_range_values() {
        let params = CalibrationParams::default();
        assert_eq!(params.physical_to_raw(-100.0), 0);
        assert_eq!(params.physical_to_raw(100.0), CODE_MAX);
    }

    #[test]
    fn test_calibrate_window_preserves_length_and_order() {
        let params = CalibrationParams::default();
        let window = params.calibrate_window(&[0, 1023, 0]);
        assert_eq!(window.len(), 3);
        assert!(window[0] < window[1]);
        assert!((window[0] - window[2]).abs() < EPS);
    }
}

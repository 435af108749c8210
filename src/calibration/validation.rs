// Sample and model validation for calibration
//
// SampleValidator checks sample pairs before they reach the fitter.
// ValidationReport measures how much a fitted model actually improves the
// reference colors compared with leaving the capture uncorrected.

use std::collections::HashSet;

use serde::Serialize;

use crate::calibration::model::{CorrectionModel, SamplePair};
use crate::color::Rgb;
use crate::error::CalibrationError;

/// Validator for calibration samples
pub struct SampleValidator;

impl SampleValidator {
    /// Validate a set of sample pairs
    ///
    /// # Returns
    /// * `Ok(())` - Samples valid
    /// * `Err(CalibrationError::InvalidSample)` - Two pairs share a swatch id
    ///
    /// Sample counts are checked by the fitter, which knows how many
    /// independent swatches it needs.
    pub fn validate_pairs(pairs: &[SamplePair]) -> Result<(), CalibrationError> {
        let mut seen = HashSet::with_capacity(pairs.len());
        for pair in pairs {
            if !seen.insert(pair.swatch_id) {
                return Err(CalibrationError::InvalidSample {
                    reason: format!("Duplicate swatch id {}", pair.swatch_id),
                });
            }
        }
        Ok(())
    }
}

/// Before/after error for one reference swatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwatchValidation {
    pub swatch_id: u32,
    pub expected: Rgb,
    pub measured: Rgb,
    pub corrected: Rgb,
    pub original_error: f64,
    pub corrected_error: f64,
}

/// How well a model corrects the colors it was fitted from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub swatches: Vec<SwatchValidation>,
    /// Mean distance between measured and expected
    pub mean_original_error: f64,
    /// Mean distance between corrected (rounded, clamped) and expected
    pub mean_corrected_error: f64,
    /// Percentage reduction of the mean error; 0 when there was nothing to fix
    pub improvement_percent: f64,
}

impl ValidationReport {
    /// Compare uncorrected and corrected colors over `pairs`
    pub fn evaluate(model: &CorrectionModel, pairs: &[SamplePair]) -> Self {
        let swatches: Vec<SwatchValidation> = pairs
            .iter()
            .map(|pair| {
                let corrected = model.apply(pair.measured);
                SwatchValidation {
                    swatch_id: pair.swatch_id,
                    expected: pair.expected,
                    measured: pair.measured,
                    corrected,
                    original_error: pair.measured.distance(pair.expected),
                    corrected_error: corrected.distance(pair.expected),
                }
            })
            .collect();

        let n = swatches.len().max(1) as f64;
        let mean_original_error = swatches.iter().map(|s| s.original_error).sum::<f64>() / n;
        let mean_corrected_error = swatches.iter().map(|s| s.corrected_error).sum::<f64>() / n;
        let improvement_percent = if mean_original_error > 0.0 {
            (mean_original_error - mean_corrected_error) / mean_original_error * 100.0
        } else {
            0.0
        };

        Self {
            swatches,
            mean_original_error,
            mean_corrected_error,
            improvement_percent,
        }
    }

    /// Whether correction reduced the mean error
    pub fn is_improvement(&self) -> bool {
        self.mean_corrected_error < self.mean_original_error
    }
}

// CorrectionModel - the fitted linear color transform
//
// A model maps a measured color to its estimated true value:
//   corrected = clamp(round(matrix · measured + offset), 0, 255)
// Models are validated on construction and immutable afterwards; a new
// calibration always produces a new model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::color::{euclidean, Rgb};
use crate::error::CalibrationError;

/// One expected/measured observation of a reference swatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePair {
    pub swatch_id: u32,
    pub expected: Rgb,
    pub measured: Rgb,
}

impl SamplePair {
    pub fn new(swatch_id: u32, expected: Rgb, measured: Rgb) -> Self {
        Self {
            swatch_id,
            expected,
            measured,
        }
    }
}

/// How a model's coefficients were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitMethod {
    /// Full 3x3 matrix plus offset from least squares
    LeastSquares,
    /// Identity matrix plus mean offset, used when the fit was ill-conditioned
    MeanOffsetFallback,
}

/// Coarse quality rating of a model, based on mean reconstruction error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    /// Grade a mean deviation magnitude on the 0..255 scale
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude < 5.0 {
            QualityGrade::Excellent
        } else if magnitude < 10.0 {
            QualityGrade::Good
        } else if magnitude < 20.0 {
            QualityGrade::Fair
        } else {
            QualityGrade::Poor
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            QualityGrade::Excellent => "very low deviation from references",
            QualityGrade::Good => "acceptable deviation from references",
            QualityGrade::Fair => "moderate deviation, consider checking display settings",
            QualityGrade::Poor => "high deviation, check display settings or capture method",
        }
    }
}

/// Linear correction transform fitted from sample pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredModel")]
pub struct CorrectionModel {
    matrix: [[f64; 3]; 3],
    offset: [f64; 3],
    fitted_from: Vec<SamplePair>,
    residual_error: f64,
    created_at: DateTime<Utc>,
    method: FitMethod,
}

impl CorrectionModel {
    /// Build a model, computing the residual over `fitted_from`
    ///
    /// # Errors
    /// `InvalidModel` when any coefficient is not finite or the residual
    /// cannot be computed as a finite, non-negative number.
    pub fn new(
        matrix: [[f64; 3]; 3],
        offset: [f64; 3],
        fitted_from: Vec<SamplePair>,
        method: FitMethod,
    ) -> Result<Self, CalibrationError> {
        Self::check_coefficients(&matrix, &offset)?;
        let residual_error = mean_residual(&matrix, &offset, &fitted_from);
        Self::from_parts(
            matrix,
            offset,
            fitted_from,
            residual_error,
            Utc::now(),
            method,
        )
    }

    /// Reassemble a model from stored parts, re-checking every invariant
    pub fn from_parts(
        matrix: [[f64; 3]; 3],
        offset: [f64; 3],
        fitted_from: Vec<SamplePair>,
        residual_error: f64,
        created_at: DateTime<Utc>,
        method: FitMethod,
    ) -> Result<Self, CalibrationError> {
        Self::check_coefficients(&matrix, &offset)?;
        if !residual_error.is_finite() || residual_error < 0.0 {
            return Err(CalibrationError::InvalidModel {
                reason: format!("residual error {} is not finite and non-negative", residual_error),
            });
        }
        Ok(Self {
            matrix,
            offset,
            fitted_from,
            residual_error,
            created_at,
            method,
        })
    }

    /// The identity transform
    pub fn identity() -> Self {
        Self {
            matrix: IDENTITY,
            offset: [0.0; 3],
            fitted_from: Vec::new(),
            residual_error: 0.0,
            created_at: Utc::now(),
            method: FitMethod::LeastSquares,
        }
    }

    fn check_coefficients(
        matrix: &[[f64; 3]; 3],
        offset: &[f64; 3],
    ) -> Result<(), CalibrationError> {
        for (row_index, row) in matrix.iter().enumerate() {
            for (col_index, value) in row.iter().enumerate() {
                if !value.is_finite() {
                    return Err(CalibrationError::InvalidModel {
                        reason: format!("matrix[{}][{}] is {}", row_index, col_index, value),
                    });
                }
            }
        }
        for (index, value) in offset.iter().enumerate() {
            if !value.is_finite() {
                return Err(CalibrationError::InvalidModel {
                    reason: format!("offset[{}] is {}", index, value),
                });
            }
        }
        Ok(())
    }

    pub fn matrix(&self) -> &[[f64; 3]; 3] {
        &self.matrix
    }

    pub fn offset(&self) -> &[f64; 3] {
        &self.offset
    }

    pub fn fitted_from(&self) -> &[SamplePair] {
        &self.fitted_from
    }

    /// Mean Euclidean reconstruction error over `fitted_from` (0..255 scale)
    pub fn residual_error(&self) -> f64 {
        self.residual_error
    }

    /// Residual expressed per channel, comparable with the quality threshold
    pub fn per_channel_residual(&self) -> f64 {
        self.residual_error / 3f64.sqrt()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn method(&self) -> FitMethod {
        self.method
    }

    /// Whether the residual exceeds `threshold` (per channel, 0..255 scale)
    pub fn is_low_quality(&self, threshold: f64) -> bool {
        self.per_channel_residual() > threshold
    }

    /// Grade the model by the mean uncorrected-to-corrected error
    pub fn grade(&self) -> QualityGrade {
        QualityGrade::from_magnitude(self.residual_error)
    }

    pub fn determinant(&self) -> f64 {
        determinant(&self.matrix)
    }

    /// Apply the transform without rounding or clamping
    #[inline]
    pub fn transform(&self, input: [f64; 3]) -> [f64; 3] {
        transform(&self.matrix, &self.offset, input)
    }

    /// Apply the transform to an 8-bit color, rounding and clamping
    #[inline]
    pub fn apply(&self, measured: Rgb) -> Rgb {
        Rgb::from_f64_clamped(self.transform(measured.to_f64()))
    }
}

/// Unchecked wire form; deserialization goes through `from_parts`
#[derive(Deserialize)]
struct StoredModel {
    matrix: [[f64; 3]; 3],
    offset: [f64; 3],
    fitted_from: Vec<SamplePair>,
    residual_error: f64,
    created_at: DateTime<Utc>,
    method: FitMethod,
}

impl TryFrom<StoredModel> for CorrectionModel {
    type Error = CalibrationError;

    fn try_from(stored: StoredModel) -> Result<Self, Self::Error> {
        CorrectionModel::from_parts(
            stored.matrix,
            stored.offset,
            stored.fitted_from,
            stored.residual_error,
            stored.created_at,
            stored.method,
        )
    }
}

pub(crate) const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

#[inline]
pub(crate) fn transform(matrix: &[[f64; 3]; 3], offset: &[f64; 3], input: [f64; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (row, value) in out.iter_mut().enumerate() {
        *value = matrix[row][0] * input[0]
            + matrix[row][1] * input[1]
            + matrix[row][2] * input[2]
            + offset[row];
    }
    out
}

pub(crate) fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Mean Euclidean distance between transformed measurements and expectations.
/// An empty sample set has zero residual.
pub(crate) fn mean_residual(
    matrix: &[[f64; 3]; 3],
    offset: &[f64; 3],
    pairs: &[SamplePair],
) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let total: f64 = pairs
        .iter()
        .map(|pair| {
            euclidean(
                transform(matrix, offset, pair.measured.to_f64()),
                pair.expected.to_f64(),
            )
        })
        .sum();
    total / pairs.len() as f64
}

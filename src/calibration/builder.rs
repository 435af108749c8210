// CorrectionModelBuilder - least-squares fit of the correction transform
//
// Each output channel is fitted independently over design rows
// [m_r, m_g, m_b, 1], giving one row of the 3x3 matrix plus its offset.
// The systems are solved through SVD so rank-deficient designs are
// detected instead of producing garbage coefficients.

use nalgebra::{DMatrix, DVector};

use crate::calibration::model::{
    determinant, CorrectionModel, FitMethod, QualityGrade, SamplePair, IDENTITY,
};
use crate::calibration::validation::SampleValidator;
use crate::config::CalibrationConfig;
use crate::error::{log_calibration_error, CalibrationError};

/// Independent unknowns per output channel (three gains plus one offset)
pub const UNKNOWNS_PER_CHANNEL: usize = 4;

/// Fitting parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderConfig {
    pub min_swatches: usize,
    pub quality_threshold: f64,
    pub rank_tolerance: f64,
    pub max_condition_number: f64,
    pub min_determinant: f64,
    pub cross_talk_damping: f64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self::from(&CalibrationConfig::default())
    }
}

impl From<&CalibrationConfig> for BuilderConfig {
    fn from(config: &CalibrationConfig) -> Self {
        Self {
            min_swatches: config.min_swatches,
            quality_threshold: config.quality_threshold,
            rank_tolerance: config.rank_tolerance,
            max_condition_number: config.max_condition_number,
            min_determinant: config.min_determinant,
            cross_talk_damping: config.cross_talk_damping,
        }
    }
}

/// Result of a successful fit
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub model: CorrectionModel,
    /// Non-fatal `IllConditionedMatrix` when the fallback model was used
    pub warning: Option<CalibrationError>,
    /// Residual exceeded the quality threshold; the model must not be activated
    pub low_quality: bool,
    pub quality: QualityGrade,
}

/// Fits correction models from sample pairs
#[derive(Debug, Clone, Default)]
pub struct CorrectionModelBuilder {
    config: BuilderConfig,
}

impl CorrectionModelBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Fit a correction model
    ///
    /// # Errors
    /// * `InvalidSample` - duplicate swatch ids
    /// * `InsufficientSwatches` - too few pairs, or expected colors that are
    ///   collinear or coplanar
    /// * `InvalidModel` - the solved coefficients were not finite
    ///
    /// An ill-conditioned system is not an error: the outcome carries the
    /// mean-offset fallback model and an `IllConditionedMatrix` warning.
    pub fn fit(&self, pairs: &[SamplePair]) -> Result<FitOutcome, CalibrationError> {
        SampleValidator::validate_pairs(pairs)?;

        let collected = pairs.len();
        let independent = affine_rank(pairs, self.config.rank_tolerance);
        if collected < self.config.min_swatches.max(UNKNOWNS_PER_CHANNEL)
            || independent < UNKNOWNS_PER_CHANNEL
        {
            return Err(CalibrationError::InsufficientSwatches {
                required: self.config.min_swatches.max(UNKNOWNS_PER_CHANNEL),
                independent,
                collected,
            });
        }

        let (model, warning) = match self.solve_least_squares(pairs)? {
            Ok(model) => (model, None),
            Err(reason) => {
                let warning = CalibrationError::IllConditionedMatrix { reason };
                log_calibration_error(&warning, "CorrectionModelBuilder::fit");
                (mean_offset_model(pairs)?, Some(warning))
            }
        };

        let low_quality = model.is_low_quality(self.config.quality_threshold);
        let quality = model.grade();
        tracing::info!(
            "[CorrectionModelBuilder] Fitted {:?} model from {} swatches: residual={:.3}, quality={:?}, low_quality={}",
            model.method(),
            collected,
            model.residual_error(),
            quality,
            low_quality
        );

        Ok(FitOutcome {
            model,
            warning,
            low_quality,
            quality,
        })
    }

    /// Solve the per-channel systems.
    ///
    /// The outer `Result` carries hard errors; the inner `Err` is the reason
    /// the system was too ill-conditioned to trust.
    fn solve_least_squares(
        &self,
        pairs: &[SamplePair],
    ) -> Result<Result<CorrectionModel, String>, CalibrationError> {
        // Conditioning is judged on the normalized design so the constant
        // column and the color columns share a scale.
        let normalized = design_matrix(pairs.iter().map(|p| p.measured.to_normalized()));
        let singular = normalized.svd(false, false).singular_values;
        let (max, min) = (singular.max(), singular.min());
        let condition = if min > 0.0 { max / min } else { f64::INFINITY };
        if !condition.is_finite() || condition > self.config.max_condition_number {
            return Ok(Err(format!(
                "design condition number {:.3e} exceeds {:.3e}",
                condition, self.config.max_condition_number
            )));
        }

        let design = design_matrix(pairs.iter().map(|p| p.measured.to_f64()));
        let mut matrix = [[0.0f64; 3]; 3];
        let mut offset = [0.0f64; 3];

        for channel in 0..3 {
            let targets = pairs.iter().map(|p| p.expected.to_f64()[channel]);
            let coefficients = match self.solve_channel(&design, targets, channel) {
                Some(coefficients) => coefficients,
                None => {
                    return Ok(Err(format!(
                        "least-squares solve failed for channel {}",
                        channel
                    )))
                }
            };
            matrix[channel] = [coefficients[0], coefficients[1], coefficients[2]];
            offset[channel] = coefficients[3];
        }

        let det = determinant(&matrix);
        if !det.is_finite() || det.abs() < self.config.min_determinant {
            return Ok(Err(format!(
                "matrix determinant {:.3e} below {:.3e}",
                det, self.config.min_determinant
            )));
        }

        CorrectionModel::new(matrix, offset, pairs.to_vec(), FitMethod::LeastSquares).map(Ok)
    }

    fn solve_channel(
        &self,
        design: &DMatrix<f64>,
        targets: impl Iterator<Item = f64>,
        channel: usize,
    ) -> Option<DVector<f64>> {
        let mut rhs: Vec<f64> = targets.collect();
        let system = if self.config.cross_talk_damping > 0.0 {
            // Ridge rows pulling the two off-diagonal gains toward zero
            let weight = self.config.cross_talk_damping.sqrt();
            let rows = design.nrows();
            let mut augmented = design.clone().resize_vertically(rows + 2, 0.0);
            let mut extra = rows;
            for input in (0..3).filter(|&input| input != channel) {
                augmented[(extra, input)] = weight;
                rhs.push(0.0);
                extra += 1;
            }
            augmented
        } else {
            design.clone()
        };

        let b = DVector::from_vec(rhs);
        let svd = system.svd(true, true);
        let eps = svd.singular_values.max() * f64::EPSILON * UNKNOWNS_PER_CHANNEL as f64;
        let solution = svd.solve(&b, eps).ok()?;
        if solution.iter().all(|value| value.is_finite()) {
            Some(solution)
        } else {
            None
        }
    }
}

/// Identity matrix plus the mean of (expected - measured)
fn mean_offset_model(pairs: &[SamplePair]) -> Result<CorrectionModel, CalibrationError> {
    let mut offset = [0.0f64; 3];
    for pair in pairs {
        let expected = pair.expected.to_f64();
        let measured = pair.measured.to_f64();
        for channel in 0..3 {
            offset[channel] += expected[channel] - measured[channel];
        }
    }
    let n = pairs.len().max(1) as f64;
    for value in offset.iter_mut() {
        *value /= n;
    }
    CorrectionModel::new(IDENTITY, offset, pairs.to_vec(), FitMethod::MeanOffsetFallback)
}

/// Numerical rank of the expected colors augmented with a constant column
///
/// Singular values count when above `tolerance` times the largest one.
pub(crate) fn affine_rank(pairs: &[SamplePair], tolerance: f64) -> usize {
    if pairs.is_empty() {
        return 0;
    }
    let design = design_matrix(pairs.iter().map(|p| p.expected.to_normalized()));
    let singular = design.svd(false, false).singular_values;
    let max = singular.max();
    if max <= 0.0 {
        return 0;
    }
    singular
        .iter()
        .filter(|&&value| value > max * tolerance)
        .count()
}

fn design_matrix(rows: impl Iterator<Item = [f64; 3]>) -> DMatrix<f64> {
    let data: Vec<f64> = rows.flat_map(|[r, g, b]| [r, g, b, 1.0]).collect();
    let nrows = data.len() / UNKNOWNS_PER_CHANNEL;
    DMatrix::from_row_slice(nrows, UNKNOWNS_PER_CHANNEL, &data)
}

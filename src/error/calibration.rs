// Calibration error types and constants

use crate::calibration::wizard::WizardState;
use crate::error::{ErrorCode, StoreError};
use log::{error, warn};
use thiserror::Error;

/// Calibration error code constants
///
/// These constants provide a single source of truth for error codes
/// shared with the host application.
///
/// Error code range: 2001-2011
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// Too few swatches, or swatch colors that do not span color space
    pub const INSUFFICIENT_SWATCHES: i32 = 2001;

    /// Fitted transform was numerically unstable; fallback model used
    pub const ILL_CONDITIONED_MATRIX: i32 = 2002;

    /// Captured image is the reference chart itself
    pub const WRONG_IMAGE_SOURCE: i32 = 2003;

    /// Residual error above the configured quality threshold
    pub const LOW_QUALITY_MODEL: i32 = 2004;

    /// Profile storage failed
    pub const PERSISTENCE: i32 = 2005;

    /// Sample data malformed (duplicate ids, empty regions, bad charts)
    pub const INVALID_SAMPLE: i32 = 2006;

    /// Correction model violates its construction invariants
    pub const INVALID_MODEL: i32 = 2007;

    /// Wizard operation called in the wrong state
    pub const INVALID_TRANSITION: i32 = 2008;

    /// Offloaded analysis was cancelled
    pub const CANCELLED: i32 = 2009;

    /// A calibration session is already running
    pub const ALREADY_IN_PROGRESS: i32 = 2010;

    /// Calibration state lock was poisoned
    pub const STATE_POISONED: i32 = 2011;
}

/// Log a calibration error with structured context
///
/// Ill-conditioned fits are logged as warnings since the engine recovers
/// with a fallback model; everything else is logged as an error.
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    if err.is_warning() {
        warn!(
            "Calibration warning in {}: code={}, component=CalibrationEngine, message={}",
            context,
            err.code(),
            err.message()
        );
    } else {
        error!(
            "Calibration error in {}: code={}, component=CalibrationEngine, message={}",
            context,
            err.code(),
            err.message()
        );
    }
}

/// Calibration-related errors
///
/// These errors cover chart generation, sampling, fitting, activation
/// and wizard sequencing.
///
/// Error code ranges: 2001-2011
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    /// Fewer swatches than required, or the expected colors are affinely
    /// dependent (collinear or coplanar) so the fit is underdetermined
    #[error("Insufficient swatches: need {required} independent, got {independent} of {collected}")]
    InsufficientSwatches {
        required: usize,
        independent: usize,
        collected: usize,
    },

    /// Least-squares system or resulting matrix is near singular
    #[error("Ill-conditioned correction matrix: {reason}")]
    IllConditionedMatrix { reason: String },

    /// The image handed to the capture step is not a user capture
    #[error("Wrong image source: {reason}")]
    WrongImageSource { reason: String },

    /// Residual error above threshold; the model must not be activated
    #[error("Low quality model: residual {residual:.2} exceeds threshold {threshold:.2}")]
    LowQualityModel { residual: f64, threshold: f64 },

    /// Profile storage failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Sample data is malformed
    #[error("Invalid sample: {reason}")]
    InvalidSample { reason: String },

    /// Model construction invariant violated
    #[error("Invalid model: {reason}")]
    InvalidModel { reason: String },

    /// Wizard operation not allowed in the current state
    #[error("Cannot {action} while wizard is {state:?}")]
    InvalidTransition {
        state: WizardState,
        action: &'static str,
    },

    /// Offloaded analysis was cancelled
    #[error("Calibration cancelled")]
    Cancelled,

    /// A calibration session is already running
    #[error("Calibration already in progress")]
    AlreadyInProgress,

    /// Calibration state lock was poisoned
    #[error("Calibration state lock poisoned")]
    StatePoisoned,
}

impl CalibrationError {
    /// Whether the condition is surfaced as a warning rather than a failure
    pub fn is_warning(&self) -> bool {
        matches!(self, CalibrationError::IllConditionedMatrix { .. })
    }

    /// Whether the wizard can retry the failed step
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CalibrationError::InsufficientSwatches { .. }
                | CalibrationError::IllConditionedMatrix { .. }
                | CalibrationError::WrongImageSource { .. }
                | CalibrationError::LowQualityModel { .. }
                | CalibrationError::Persistence(_)
                | CalibrationError::InvalidSample { .. }
        )
    }
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::InsufficientSwatches { .. } => {
                CalibrationErrorCodes::INSUFFICIENT_SWATCHES
            }
            CalibrationError::IllConditionedMatrix { .. } => {
                CalibrationErrorCodes::ILL_CONDITIONED_MATRIX
            }
            CalibrationError::WrongImageSource { .. } => CalibrationErrorCodes::WRONG_IMAGE_SOURCE,
            CalibrationError::LowQualityModel { .. } => CalibrationErrorCodes::LOW_QUALITY_MODEL,
            CalibrationError::Persistence(_) => CalibrationErrorCodes::PERSISTENCE,
            CalibrationError::InvalidSample { .. } => CalibrationErrorCodes::INVALID_SAMPLE,
            CalibrationError::InvalidModel { .. } => CalibrationErrorCodes::INVALID_MODEL,
            CalibrationError::InvalidTransition { .. } => {
                CalibrationErrorCodes::INVALID_TRANSITION
            }
            CalibrationError::Cancelled => CalibrationErrorCodes::CANCELLED,
            CalibrationError::AlreadyInProgress => CalibrationErrorCodes::ALREADY_IN_PROGRESS,
            CalibrationError::StatePoisoned => CalibrationErrorCodes::STATE_POISONED,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

// Profile storage error types and constants

use crate::error::ErrorCode;
use log::error;
use std::path::PathBuf;
use thiserror::Error;

/// Store error code constants
///
/// Error code range: 3001-3008
pub struct StoreErrorCodes {}

impl StoreErrorCodes {
    /// Preferences file could not be read or written
    pub const IO: i32 = 3001;

    /// Stored data is not valid calibration data
    pub const CORRUPT: i32 = 3002;

    /// No profile with the requested name
    pub const UNKNOWN_PROFILE: i32 = 3003;

    /// Profile name is empty or unusable as a key
    pub const INVALID_PROFILE_NAME: i32 = 3004;

    /// In-memory state could not be serialized
    pub const ENCODE: i32 = 3005;

    /// Store write lock was poisoned
    pub const LOCK_POISONED: i32 = 3006;

    /// Profile is disabled and cannot be activated
    pub const PROFILE_DISABLED: i32 = 3007;

    /// Pending save would overwrite the active profile
    pub const PROFILE_IS_ACTIVE: i32 = 3008;
}

/// Log a store error with structured context
pub fn log_store_error(err: &StoreError, context: &str) {
    error!(
        "Store error in {}: code={}, component=CalibrationStore, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Profile persistence errors
///
/// Loading fails closed: a corrupt or missing profile is reported, never
/// replaced with a default.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Preferences file could not be read or written
    #[error("I/O error on {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// Stored data is not valid calibration data
    #[error("Corrupt calibration data: {reason}")]
    Corrupt { reason: String },

    /// No profile with the requested name
    #[error("Unknown calibration profile '{name}'")]
    UnknownProfile { name: String },

    /// Profile name is empty or unusable as a key
    #[error("Invalid profile name '{name}'")]
    InvalidProfileName { name: String },

    /// In-memory state could not be serialized
    #[error("Failed to encode calibration data: {reason}")]
    Encode { reason: String },

    /// Store write lock was poisoned
    #[error("Calibration store lock poisoned")]
    LockPoisoned,

    /// Profile is disabled and cannot be activated
    #[error("Calibration profile '{name}' is disabled")]
    ProfileDisabled { name: String },

    /// Pending save would overwrite the active profile
    #[error("Calibration profile '{name}' is active; save the pending calibration under another name")]
    ProfileIsActive { name: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        StoreError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl ErrorCode for StoreError {
    fn code(&self) -> i32 {
        match self {
            StoreError::Io { .. } => StoreErrorCodes::IO,
            StoreError::Corrupt { .. } => StoreErrorCodes::CORRUPT,
            StoreError::UnknownProfile { .. } => StoreErrorCodes::UNKNOWN_PROFILE,
            StoreError::InvalidProfileName { .. } => StoreErrorCodes::INVALID_PROFILE_NAME,
            StoreError::Encode { .. } => StoreErrorCodes::ENCODE,
            StoreError::LockPoisoned => StoreErrorCodes::LOCK_POISONED,
            StoreError::ProfileDisabled { .. } => StoreErrorCodes::PROFILE_DISABLED,
            StoreError::ProfileIsActive { .. } => StoreErrorCodes::PROFILE_IS_ACTIVE,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

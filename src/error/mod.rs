// Error types for the color calibration engine
//
// This module defines typed errors for the calibration workflow and for
// profile persistence, each carrying a stable numeric code so hosts can
// react to failures without string matching.

mod calibration;
mod store;

pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use store::{log_store_error, StoreError, StoreErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the host boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

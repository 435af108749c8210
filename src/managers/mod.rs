// Managers Module
//
// Focused manager classes that own shared calibration state.
//
// - CalibrationManager: live correction for the measurement pipeline and
//   the single wizard session slot

pub mod calibration_manager;

pub use calibration_manager::{ActiveCalibration, CalibrationManager};

// Color Calibration Core - display/capture color correction engine
// Fits, stores and applies linear color corrections for measured pixel colors

// Module declarations
pub mod calibration;
pub mod color;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod image;
pub mod managers;

// Re-exports for convenience
pub use calibration::{
    CalibrationProfile, CalibrationStore, CalibrationWizard, CorrectionApplier, CorrectionModel,
    CorrectionModelBuilder, SamplePair,
};
pub use color::Rgb;
pub use config::AppConfig;
pub use error::{CalibrationError, ErrorCode, StoreError};
pub use managers::CalibrationManager;

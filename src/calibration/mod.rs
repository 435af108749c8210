// Calibration module - color correction models and the session that builds them
//
// Components, leaf first:
// 1. ReferenceChartGenerator: renders the swatch chart shown to the user
// 2. ScreenshotSampler: measures swatch colors in the user's capture
// 3. DeviationAnalyzer / CorrectionModelBuilder: quantify and fit the shift
// 4. CalibrationStore: persists profiles next to unrelated preferences
// 5. CorrectionApplier: applies the active model to measured colors
//
// The calibration workflow:
// 1. Generate the chart and display it
// 2. Submit a capture of the displayed chart
// 3. Analyze, review, then accept (or save as pending, or reject)

pub mod applier;
pub mod builder;
pub mod chart;
pub mod deviation;
mod document;
pub mod model;
pub mod profile;
pub mod sampler;
pub mod store;
pub mod validation;
pub mod wizard;

pub use applier::CorrectionApplier;
pub use builder::{BuilderConfig, CorrectionModelBuilder, FitOutcome};
pub use chart::{NormalizedRect, ReferenceChart, ReferenceChartGenerator, Swatch};
pub use deviation::{DeviationAnalyzer, DeviationReport, SwatchDeviation};
pub use model::{CorrectionModel, FitMethod, QualityGrade, SamplePair};
pub use profile::{CalibrationProfile, DEFAULT_PROFILE_NAME, SCHEMA_VERSION};
pub use sampler::{CenterRegionSampler, ScreenshotSampler};
pub use store::{
    CalibrationStore, FileBackend, MemoryBackend, PreferencesBackend, ProfileSummary,
};
pub use validation::{SampleValidator, ValidationReport};
pub use wizard::{
    CalibrationWizard, CancelToken, ReviewSummary, WizardEvent, WizardOutcome, WizardState,
};

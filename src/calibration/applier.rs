// CorrectionApplier - applies the active correction model to measured colors
//
// Appliers are immutable and cheap to clone; the measurement pipeline can
// hold one per worker without synchronization.

use std::sync::Arc;

use crate::calibration::model::CorrectionModel;
use crate::color::Rgb;

#[derive(Debug, Clone, Default)]
pub struct CorrectionApplier {
    model: Option<Arc<CorrectionModel>>,
}

impl CorrectionApplier {
    /// Applier that passes colors through unchanged
    pub fn identity() -> Self {
        Self { model: None }
    }

    pub fn new(model: Arc<CorrectionModel>) -> Self {
        Self { model: Some(model) }
    }

    pub fn model(&self) -> Option<&Arc<CorrectionModel>> {
        self.model.as_ref()
    }

    pub fn is_identity(&self) -> bool {
        self.model.is_none()
    }

    /// Correct an 8-bit color (rounded, clamped to 0..255)
    #[inline]
    pub fn correct(&self, measured: Rgb) -> Rgb {
        match &self.model {
            Some(model) => model.apply(measured),
            None => measured,
        }
    }

    /// Correct a color given in normalized 0..1 units
    ///
    /// The model is fitted on the 0..255 scale; input is scaled up, corrected
    /// and scaled back. The output is clamped to 0..1 but not rounded.
    pub fn correct_normalized(&self, measured: [f64; 3]) -> [f64; 3] {
        let Some(model) = &self.model else {
            return measured;
        };
        let corrected = model.transform(measured.map(|v| v * 255.0));
        corrected.map(|v| {
            if v.is_nan() {
                0.0
            } else {
                (v / 255.0).clamp(0.0, 1.0)
            }
        })
    }
}

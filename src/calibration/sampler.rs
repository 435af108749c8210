// ScreenshotSampler - turns a captured chart into sample pairs
//
// Sampling is a boundary concern: hosts with their own region detection
// implement the trait, CenterRegionSampler covers captures that keep the
// chart's framing.

use crate::calibration::chart::Swatch;
use crate::calibration::model::SamplePair;
use crate::color::Rgb;
use crate::error::CalibrationError;
use crate::image::{ImageSource, TaggedImage};

/// Measures the color of each swatch in a captured image
pub trait ScreenshotSampler: Send + Sync {
    /// Produce one sample pair per swatch, in swatch order
    fn sample(
        &self,
        image: &TaggedImage,
        swatches: &[Swatch],
    ) -> Result<Vec<SamplePair>, CalibrationError>;
}

/// Averages the central part of every swatch region
///
/// Regions are scaled to the capture's own dimensions, so a capture taken
/// at a different resolution than the chart samples the same areas.
#[derive(Debug, Clone, Copy)]
pub struct CenterRegionSampler {
    fraction: f64,
}

impl Default for CenterRegionSampler {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl CenterRegionSampler {
    /// `fraction` of each swatch dimension is averaged (clamped to 0..1)
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }
}

impl ScreenshotSampler for CenterRegionSampler {
    fn sample(
        &self,
        image: &TaggedImage,
        swatches: &[Swatch],
    ) -> Result<Vec<SamplePair>, CalibrationError> {
        if image.source == ImageSource::ReferenceChart {
            return Err(CalibrationError::WrongImageSource {
                reason: "sampler was given the generated reference chart".to_string(),
            });
        }
        let pixels = &image.image;
        if pixels.is_empty() {
            return Err(CalibrationError::InvalidSample {
                reason: "captured image is empty".to_string(),
            });
        }

        swatches
            .iter()
            .map(|swatch| {
                let (x, y, w, h) = swatch
                    .region
                    .centered(self.fraction)
                    .to_pixels(pixels.width(), pixels.height());
                let (mean, count) = pixels.mean_in_rect(x, y, w, h);
                if count == 0 {
                    return Err(CalibrationError::InvalidSample {
                        reason: format!(
                            "swatch {} ('{}') covers no pixels in a {}x{} capture",
                            swatch.id,
                            swatch.label,
                            pixels.width(),
                            pixels.height()
                        ),
                    });
                }
                Ok(SamplePair::new(
                    swatch.id,
                    swatch.expected,
                    Rgb::from_f64_clamped(mean),
                ))
            })
            .collect()
    }
}

//! Built-in calibration data for the self-test harness.
//!
//! The field observations are the color shifts recorded on a real display
//! and capture pipeline; `self-test` fits them and checks the result. The
//! distortion helpers synthesize captures of the reference chart so the
//! whole wizard can run without a screen.

use crate::calibration::model::SamplePair;
use crate::color::Rgb;
use crate::image::{RgbImage, TaggedImage};

/// Observed (expected, measured) pairs from the field.
///
/// Green picked up blue, blue picked up red and green, red lost a step.
/// Gray was captured unchanged.
pub const FIELD_OBSERVATIONS: [(Rgb, Rgb); 4] = [
    (Rgb::new(255, 0, 0), Rgb::new(254, 0, 0)),
    (Rgb::new(0, 255, 0), Rgb::new(0, 255, 57)),
    (Rgb::new(0, 0, 255), Rgb::new(24, 17, 247)),
    (Rgb::gray(128), Rgb::gray(128)),
];

/// Field observations as sample pairs, ids in table order.
pub fn field_sample_pairs() -> Vec<SamplePair> {
    FIELD_OBSERVATIONS
        .iter()
        .enumerate()
        .map(|(id, (expected, measured))| SamplePair::new(id as u32, *expected, *measured))
        .collect()
}

/// A synthetic display/capture distortion: `out = matrix · in + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distortion {
    pub matrix: [[f64; 3]; 3],
    pub offset: [f64; 3],
}

impl Distortion {
    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            offset: [0.0; 3],
        }
    }

    /// Cross-talk resembling the field observations: blue bleeds into the
    /// other channels of saturated blues and green into blue.
    pub fn field_like() -> Self {
        Self {
            matrix: [
                [0.996, 0.0, 0.094],
                [0.0, 1.0, 0.067],
                [0.0, 0.224, 0.969],
            ],
            offset: [0.0; 3],
        }
    }

    /// A moderate shift with cross-talk and a black lift that keeps every
    /// chart color inside 0..255, so a fitted inverse is exact up to rounding.
    pub fn display_shift() -> Self {
        Self {
            matrix: [
                [0.92, 0.0, 0.06],
                [0.0, 0.93, 0.05],
                [0.0, 0.12, 0.85],
            ],
            offset: [4.0, 3.0, 6.0],
        }
    }

    pub fn apply(&self, color: Rgb) -> Rgb {
        let input = color.to_f64();
        let mut out = [0.0; 3];
        for (row, value) in out.iter_mut().enumerate() {
            *value = self.matrix[row][0] * input[0]
                + self.matrix[row][1] * input[1]
                + self.matrix[row][2] * input[2]
                + self.offset[row];
        }
        Rgb::from_f64_clamped(out)
    }

    /// Pass every pixel of `image` through the distortion, tagged as a
    /// user capture.
    pub fn capture(&self, image: &RgbImage) -> TaggedImage {
        TaggedImage::capture(image.map_pixels(|px| self.apply(px)))
    }
}

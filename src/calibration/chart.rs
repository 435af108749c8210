// ReferenceChartGenerator - deterministic reference swatch chart
//
// The chart is a grid of flat color swatches separated by a mid-gray frame.
// Swatch regions are recorded in normalized coordinates so a capture at any
// resolution can be sampled against them.

use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::config::ChartConfig;
use crate::error::CalibrationError;
use crate::image::{ImageSource, RgbImage, TaggedImage};

/// Frame color between swatches
pub const FRAME_COLOR: Rgb = Rgb::gray(96);

const MIN_SWATCHES: usize = 4;

/// Rectangle in normalized (0..1) chart coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    /// Shrink around the center, keeping `fraction` of each dimension
    pub fn centered(&self, fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let width = self.width * fraction;
        let height = self.height * fraction;
        Self {
            x: self.x + (self.width - width) / 2.0,
            y: self.y + (self.height - height) / 2.0,
            width,
            height,
        }
    }

    /// Map onto a `width` x `height` pixel grid as (x, y, w, h)
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = (self.x * width as f64).round().max(0.0) as u32;
        let y0 = (self.y * height as f64).round().max(0.0) as u32;
        let x1 = ((self.x + self.width) * width as f64).round().max(0.0) as u32;
        let y1 = ((self.y + self.height) * height as f64).round().max(0.0) as u32;
        (
            x0,
            y0,
            x1.min(width).saturating_sub(x0),
            y1.min(height).saturating_sub(y0),
        )
    }
}

/// A reference color patch on the chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swatch {
    pub id: u32,
    pub label: String,
    pub expected: Rgb,
    pub region: NormalizedRect,
}

/// A generated chart ready for display
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceChart {
    pub image: TaggedImage,
    pub swatches: Vec<Swatch>,
    /// SHA-256 hex over the chart's dimensions and pixels
    pub fingerprint: String,
}

/// Default swatch set: primaries on top, neutrals below
pub fn default_swatch_colors() -> Vec<(String, Rgb)> {
    vec![
        ("Red".to_string(), Rgb::new(255, 0, 0)),
        ("Green".to_string(), Rgb::new(0, 255, 0)),
        ("Blue".to_string(), Rgb::new(0, 0, 255)),
        ("White".to_string(), Rgb::WHITE),
        ("Gray 50%".to_string(), Rgb::gray(128)),
        ("Black".to_string(), Rgb::BLACK),
    ]
}

/// Lays out and renders reference charts
#[derive(Debug, Clone)]
pub struct ReferenceChartGenerator {
    config: ChartConfig,
    swatches: Vec<Swatch>,
}

impl ReferenceChartGenerator {
    /// Generator for the default six-swatch chart
    pub fn new(config: ChartConfig) -> Result<Self, CalibrationError> {
        Self::with_swatches(config, default_swatch_colors())
    }

    /// Generator for a custom swatch set, laid out row-major
    ///
    /// # Errors
    /// `InvalidSample` when fewer than four swatches are given, when the set
    /// has no primary or no neutral swatch, or when the geometry leaves no
    /// room for a swatch inside its frame.
    pub fn with_swatches(
        config: ChartConfig,
        colors: Vec<(String, Rgb)>,
    ) -> Result<Self, CalibrationError> {
        if colors.len() < MIN_SWATCHES {
            return Err(invalid(format!(
                "chart needs at least {} swatches, got {}",
                MIN_SWATCHES,
                colors.len()
            )));
        }
        if !colors.iter().any(|(_, c)| c.is_primary()) {
            return Err(invalid("chart needs at least one primary swatch".to_string()));
        }
        if !colors.iter().any(|(_, c)| c.is_neutral()) {
            return Err(invalid("chart needs at least one neutral swatch".to_string()));
        }
        if config.columns == 0 {
            return Err(invalid("chart needs at least one column".to_string()));
        }

        let columns = config.columns;
        let rows = (colors.len() as u32).div_ceil(columns);
        let cell_w = config.width / columns;
        let cell_h = config.height / rows;
        if cell_w <= 2 * config.border || cell_h <= 2 * config.border {
            return Err(invalid(format!(
                "{}x{} cells leave no room inside a {} px border",
                cell_w, cell_h, config.border
            )));
        }

        let width = config.width as f64;
        let height = config.height as f64;
        let swatches = colors
            .into_iter()
            .enumerate()
            .map(|(index, (label, expected))| {
                let col = index as u32 % columns;
                let row = index as u32 / columns;
                Swatch {
                    id: index as u32,
                    label,
                    expected,
                    region: NormalizedRect {
                        x: (col * cell_w + config.border) as f64 / width,
                        y: (row * cell_h + config.border) as f64 / height,
                        width: (cell_w - 2 * config.border) as f64 / width,
                        height: (cell_h - 2 * config.border) as f64 / height,
                    },
                }
            })
            .collect();

        Ok(Self { config, swatches })
    }

    pub fn swatches(&self) -> &[Swatch] {
        &self.swatches
    }

    /// Render the chart. Output depends only on the configuration.
    pub fn generate(&self) -> ReferenceChart {
        let mut image = RgbImage::filled(self.config.width, self.config.height, FRAME_COLOR);
        for swatch in &self.swatches {
            let (x, y, w, h) = swatch
                .region
                .to_pixels(self.config.width, self.config.height);
            image.fill_rect(x, y, w, h, swatch.expected);
        }
        let fingerprint = image.fingerprint();
        tracing::debug!(
            "[ReferenceChartGenerator] Generated {}x{} chart with {} swatches ({})",
            self.config.width,
            self.config.height,
            self.swatches.len(),
            &fingerprint[..12]
        );
        ReferenceChart {
            image: TaggedImage::new(ImageSource::ReferenceChart, image),
            swatches: self.swatches.clone(),
            fingerprint,
        }
    }
}

fn invalid(reason: String) -> CalibrationError {
    CalibrationError::InvalidSample { reason }
}

//! In-memory RGB8 images with provenance tags
//!
//! Decoding captured screenshots is the host's job; the engine only sees
//! already-decoded pixels. Every image that enters the wizard carries an
//! [`ImageSource`] so a generated chart can never be analyzed as if it were
//! a capture of itself.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::color::Rgb;
use crate::error::CalibrationError;

/// Where an image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// Generated by the reference chart generator
    ReferenceChart,
    /// Captured by the user from the displayed chart (screenshot, scan)
    UserCapture,
}

/// Packed RGB8 pixel buffer, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbImage {
    /// Create an image filled with a single color.
    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 3);
        for _ in 0..count {
            pixels.extend_from_slice(&color.to_bytes());
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Wrap a raw RGB8 buffer, checking its length against the dimensions.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, CalibrationError> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(CalibrationError::InvalidSample {
                reason: format!(
                    "pixel buffer holds {} bytes, {}x{} RGB8 needs {}",
                    pixels.len(),
                    width,
                    height,
                    expected
                ),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at (x, y), or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some(Rgb::new(
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ))
    }

    /// Fill a rectangle, clipped to the image bounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: Rgb) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        let bytes = color.to_bytes();
        for row in y..y_end {
            for col in x..x_end {
                let offset = (row as usize * self.width as usize + col as usize) * 3;
                self.pixels[offset..offset + 3].copy_from_slice(&bytes);
            }
        }
    }

    /// Apply `f` to every pixel, producing a new image.
    pub fn map_pixels(&self, mut f: impl FnMut(Rgb) -> Rgb) -> Self {
        let pixels = self
            .pixels
            .chunks_exact(3)
            .flat_map(|px| f(Rgb::new(px[0], px[1], px[2])).to_bytes())
            .collect();
        Self {
            width: self.width,
            height: self.height,
            pixels,
        }
    }

    /// Mean color over a pixel rectangle (clipped), with the pixel count.
    pub fn mean_in_rect(&self, x: u32, y: u32, width: u32, height: u32) -> ([f64; 3], usize) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        let mut sum = [0.0f64; 3];
        let mut count = 0usize;
        for row in y..y_end {
            for col in x..x_end {
                let offset = (row as usize * self.width as usize + col as usize) * 3;
                sum[0] += self.pixels[offset] as f64;
                sum[1] += self.pixels[offset + 1] as f64;
                sum[2] += self.pixels[offset + 2] as f64;
                count += 1;
            }
        }
        if count == 0 {
            return ([0.0; 3], 0);
        }
        let n = count as f64;
        ([sum[0] / n, sum[1] / n, sum[2] / n], count)
    }

    /// SHA-256 over the dimensions and pixel data, hex encoded.
    ///
    /// Two images share a fingerprint exactly when they are byte-identical.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_be_bytes());
        hasher.update(self.height.to_be_bytes());
        hasher.update(&self.pixels);
        hex::encode(hasher.finalize())
    }

    /// Encode as an 8-bit RGB PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, png::EncodingError> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = png::Encoder::new(&mut buf, self.width, self.height);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
        }
        Ok(buf.into_inner())
    }
}

/// An image together with its provenance tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedImage {
    pub source: ImageSource,
    pub image: RgbImage,
}

impl TaggedImage {
    pub fn new(source: ImageSource, image: RgbImage) -> Self {
        Self { source, image }
    }

    /// Tag an image as captured by the user.
    pub fn capture(image: RgbImage) -> Self {
        Self::new(ImageSource::UserCapture, image)
    }

    pub fn fingerprint(&self) -> String {
        self.image.fingerprint()
    }
}

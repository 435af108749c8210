//! 8-bit RGB color values
//!
//! Measured and expected swatch colors are exchanged as [`Rgb`]. Fitting
//! happens in floating point on the 0..255 scale; the normalized 0..1 form
//! is what downstream Lab conversion consumes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A color with 8-bit red, green and blue channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create a neutral gray with all channels set to `level`.
    #[inline]
    pub const fn gray(level: u8) -> Self {
        Self::new(level, level, level)
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2])
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Channels as floats on the 0..255 scale.
    #[inline]
    pub fn to_f64(self) -> [f64; 3] {
        [self.r as f64, self.g as f64, self.b as f64]
    }

    /// Round and clamp floating-point channels on the 0..255 scale.
    ///
    /// NaN channels map to 0.
    #[inline]
    pub fn from_f64_clamped(channels: [f64; 3]) -> Self {
        Self::new(
            clamp_channel(channels[0]),
            clamp_channel(channels[1]),
            clamp_channel(channels[2]),
        )
    }

    /// Channels normalized to 0..1.
    #[inline]
    pub fn to_normalized(self) -> [f64; 3] {
        let [r, g, b] = self.to_f64();
        [r / 255.0, g / 255.0, b / 255.0]
    }

    /// Whether all three channels are equal.
    pub fn is_neutral(self) -> bool {
        self.r == self.g && self.g == self.b
    }

    /// Whether exactly one channel is at full intensity and the others are zero.
    pub fn is_primary(self) -> bool {
        matches!(
            self.to_bytes(),
            [255, 0, 0] | [0, 255, 0] | [0, 0, 255]
        )
    }

    /// Euclidean distance to `other` on the 0..255 scale.
    pub fn distance(self, other: Rgb) -> f64 {
        euclidean(self.to_f64(), other.to_f64())
    }

    /// Uppercase `#RRGGBB` representation.
    pub fn hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(bytes: [u8; 3]) -> Self {
        Self::from_bytes(bytes)
    }
}

/// Color channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Red => "red",
            Channel::Green => "green",
            Channel::Blue => "blue",
        }
    }
}

pub(crate) fn euclidean(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn clamp_channel(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

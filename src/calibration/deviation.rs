// DeviationAnalyzer - per-swatch color shift statistics
//
// Pure computation over sample pairs. The report is what the review step
// shows the user before a model is accepted.

use serde::Serialize;

use crate::calibration::builder::affine_rank;
use crate::calibration::model::SamplePair;
use crate::color::{Channel, Rgb};
use crate::config::CalibrationConfig;
use crate::error::CalibrationError;

/// Mean shift (0..255) above which a green or blue channel is reported
const CHANNEL_BIAS_LIMIT: f64 = 5.0;
/// Mean shift above which the red channel is reported
const RED_BIAS_LIMIT: f64 = 3.0;

/// Deviation of one measured swatch from its expected color
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwatchDeviation {
    pub swatch_id: u32,
    pub expected: Rgb,
    pub measured: Rgb,
    /// measured - expected per channel
    pub delta: [i16; 3],
    /// Euclidean length of `delta`
    pub magnitude: f64,
    /// Sum of absolute channel deltas
    pub total_deviation: u32,
    /// Channels expected at zero that read above the tolerance
    pub contaminated_channels: Vec<Channel>,
}

impl SwatchDeviation {
    pub fn is_contaminated(&self) -> bool {
        !self.contaminated_channels.is_empty()
    }
}

/// Aggregate deviation statistics over all swatches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviationReport {
    pub swatches: Vec<SwatchDeviation>,
    pub mean_delta: [f64; 3],
    pub std_delta: [f64; 3],
    pub max_magnitude: f64,
    pub mean_magnitude: f64,
    pub recommendations: Vec<String>,
}

impl DeviationReport {
    pub fn contaminated(&self) -> impl Iterator<Item = &SwatchDeviation> {
        self.swatches.iter().filter(|s| s.is_contaminated())
    }
}

/// Computes deviation reports
#[derive(Debug, Clone, Copy)]
pub struct DeviationAnalyzer {
    contamination_tolerance: u8,
    min_swatches: usize,
    rank_tolerance: f64,
}

impl Default for DeviationAnalyzer {
    fn default() -> Self {
        Self::from(&CalibrationConfig::default())
    }
}

impl From<&CalibrationConfig> for DeviationAnalyzer {
    fn from(config: &CalibrationConfig) -> Self {
        Self {
            contamination_tolerance: config.contamination_tolerance,
            min_swatches: config.min_swatches,
            rank_tolerance: config.rank_tolerance,
        }
    }
}

impl DeviationAnalyzer {
    /// Analyzer with the default swatch minimum
    pub fn new(contamination_tolerance: u8) -> Self {
        Self {
            contamination_tolerance,
            ..Self::default()
        }
    }

    pub fn with_min_swatches(mut self, min_swatches: usize) -> Self {
        self.min_swatches = min_swatches;
        self
    }

    pub fn min_swatches(&self) -> usize {
        self.min_swatches
    }

    /// Per-swatch deviations and aggregate statistics
    ///
    /// # Errors
    /// `InsufficientSwatches` when fewer than the configured minimum of
    /// pairs (at least one) were collected.
    pub fn analyze(&self, pairs: &[SamplePair]) -> Result<DeviationReport, CalibrationError> {
        let required = self.min_swatches.max(1);
        if pairs.len() < required {
            return Err(CalibrationError::InsufficientSwatches {
                required,
                independent: affine_rank(pairs, self.rank_tolerance),
                collected: pairs.len(),
            });
        }

        let swatches: Vec<SwatchDeviation> = pairs.iter().map(|p| self.deviation(p)).collect();

        let n = swatches.len() as f64;
        let mut mean_delta = [0.0f64; 3];
        for swatch in &swatches {
            for (mean, delta) in mean_delta.iter_mut().zip(swatch.delta.iter()) {
                *mean += *delta as f64 / n;
            }
        }
        let mut std_delta = [0.0f64; 3];
        for swatch in &swatches {
            for channel in 0..3 {
                let diff = swatch.delta[channel] as f64 - mean_delta[channel];
                std_delta[channel] += diff * diff / n;
            }
        }
        for value in std_delta.iter_mut() {
            *value = value.sqrt();
        }

        let max_magnitude = swatches.iter().map(|s| s.magnitude).fold(0.0, f64::max);
        let mean_magnitude = swatches.iter().map(|s| s.magnitude).sum::<f64>() / n;
        let recommendations = recommendations(&swatches, &mean_delta);

        Ok(DeviationReport {
            swatches,
            mean_delta,
            std_delta,
            max_magnitude,
            mean_magnitude,
            recommendations,
        })
    }

    fn deviation(&self, pair: &SamplePair) -> SwatchDeviation {
        let expected = pair.expected.to_bytes();
        let measured = pair.measured.to_bytes();

        let mut delta = [0i16; 3];
        for channel in 0..3 {
            delta[channel] = measured[channel] as i16 - expected[channel] as i16;
        }
        let contaminated_channels = Channel::ALL
            .iter()
            .copied()
            .filter(|c| {
                expected[c.index()] == 0 && measured[c.index()] > self.contamination_tolerance
            })
            .collect();

        SwatchDeviation {
            swatch_id: pair.swatch_id,
            expected: pair.expected,
            measured: pair.measured,
            delta,
            magnitude: pair.measured.distance(pair.expected),
            total_deviation: delta.iter().map(|d| d.unsigned_abs() as u32).sum(),
            contaminated_channels,
        }
    }
}

fn recommendations(swatches: &[SwatchDeviation], mean_delta: &[f64; 3]) -> Vec<String> {
    let mut out = Vec::new();
    for channel in Channel::ALL {
        let limit = match channel {
            Channel::Red => RED_BIAS_LIMIT,
            _ => CHANNEL_BIAS_LIMIT,
        };
        let mean = mean_delta[channel.index()];
        if mean.abs() > limit {
            out.push(format!(
                "{} channel reads consistently {} by {:.1} on average",
                channel.name(),
                if mean > 0.0 { "high" } else { "low" },
                mean.abs()
            ));
        }
    }
    for swatch in swatches.iter().filter(|s| s.is_contaminated()) {
        let names: Vec<&str> = swatch.contaminated_channels.iter().map(|c| c.name()).collect();
        out.push(format!(
            "swatch {} expected {} picked up {} contamination ({})",
            swatch.swatch_id,
            swatch.expected,
            names.join("/"),
            swatch.measured
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_pairs() -> Vec<SamplePair> {
        vec![
            SamplePair::new(0, Rgb::new(255, 0, 0), Rgb::new(254, 0, 0)),
            SamplePair::new(1, Rgb::new(0, 255, 0), Rgb::new(0, 255, 57)),
            SamplePair::new(2, Rgb::new(0, 0, 255), Rgb::new(24, 17, 247)),
            SamplePair::new(3, Rgb::gray(128), Rgb::gray(128)),
        ]
    }

    #[test]
    fn test_requires_four_pairs() {
        let pairs: Vec<SamplePair> = field_pairs().into_iter().take(3).collect();
        assert!(matches!(
            DeviationAnalyzer::default().analyze(&pairs).unwrap_err(),
            CalibrationError::InsufficientSwatches { collected: 3, .. }
        ));
    }

    #[test]
    fn test_configured_minimum() {
        let strict = DeviationAnalyzer::default().with_min_swatches(5);
        match strict.analyze(&field_pairs()).unwrap_err() {
            CalibrationError::InsufficientSwatches {
                required,
                independent,
                collected,
            } => {
                assert_eq!(required, 5);
                assert_eq!(independent, 4);
                assert_eq!(collected, 4);
            }
            other => panic!("Expected InsufficientSwatches, got {:?}", other),
        }

        let mut config = CalibrationConfig::default();
        config.min_swatches = 2;
        let lenient = DeviationAnalyzer::from(&config);
        assert_eq!(lenient.min_swatches(), 2);
        let pairs: Vec<SamplePair> = field_pairs().into_iter().take(3).collect();
        assert_eq!(lenient.analyze(&pairs).unwrap().swatches.len(), 3);
    }

    #[test]
    fn test_independence_counts_distinct_directions() {
        // Grays all lie on one line: rank 2 however many are collected
        let grays: Vec<SamplePair> = [0u8, 60, 120]
            .iter()
            .enumerate()
            .map(|(id, &v)| SamplePair::new(id as u32, Rgb::gray(v), Rgb::gray(v)))
            .collect();
        match DeviationAnalyzer::default().analyze(&grays).unwrap_err() {
            CalibrationError::InsufficientSwatches {
                independent,
                collected,
                ..
            } => {
                assert_eq!(independent, 2);
                assert_eq!(collected, 3);
            }
            other => panic!("Expected InsufficientSwatches, got {:?}", other),
        }
    }

    #[test]
    fn test_per_swatch_deltas() {
        let report = DeviationAnalyzer::default().analyze(&field_pairs()).unwrap();
        let blue = &report.swatches[2];
        assert_eq!(blue.delta, [24, 17, -8]);
        assert_eq!(blue.total_deviation, 49);
        assert!((blue.magnitude - (24f64.powi(2) + 17f64.powi(2) + 64.0).sqrt()).abs() < 1e-9);

        let red = &report.swatches[0];
        assert_eq!(red.delta, [-1, 0, 0]);
        assert!(!red.is_contaminated());
    }

    #[test]
    fn test_contamination_detection() {
        let report = DeviationAnalyzer::default().analyze(&field_pairs()).unwrap();
        assert_eq!(report.swatches[1].contaminated_channels, vec![Channel::Blue]);
        assert_eq!(
            report.swatches[2].contaminated_channels,
            vec![Channel::Red, Channel::Green]
        );
        assert_eq!(report.contaminated().count(), 2);

        // A looser tolerance ignores small bleed
        let lenient = DeviationAnalyzer::new(60).analyze(&field_pairs()).unwrap();
        assert_eq!(lenient.contaminated().count(), 0);
    }

    #[test]
    fn test_statistics_and_recommendations() {
        let report = DeviationAnalyzer::default().analyze(&field_pairs()).unwrap();
        // red: (-1 + 0 + 24 + 0) / 4
        assert!((report.mean_delta[0] - 5.75).abs() < 1e-9);
        // blue: (0 + 57 - 8 + 0) / 4
        assert!((report.mean_delta[2] - 12.25).abs() < 1e-9);
        assert!(report.std_delta.iter().all(|s| *s >= 0.0));
        assert!((report.max_magnitude - 57.0).abs() < 1e-9);

        assert!(report
            .recommendations
            .iter()
            .any(|r| r.starts_with("red channel reads consistently high")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.starts_with("blue channel reads consistently high")));
        assert!(report.recommendations.iter().any(|r| r.contains("swatch 1")));
    }
}

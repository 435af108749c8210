//! Configuration management for the calibration engine
//!
//! This module provides runtime configuration loading from JSON files so
//! fitting thresholds, chart geometry and the preferences location can be
//! adjusted without recompilation. Missing or malformed files fall back to
//! the documented defaults.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Fitting and analysis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Minimum number of swatches required to fit a model
    pub min_swatches: usize,
    /// Per-channel residual (0..255 scale) above which a model is low quality
    pub quality_threshold: f64,
    /// Reading above which a channel expected to be zero counts as contaminated
    pub contamination_tolerance: u8,
    /// Relative singular-value cutoff for the swatch rank check
    pub rank_tolerance: f64,
    /// Design condition number above which the fit falls back to mean offset
    pub max_condition_number: f64,
    /// Smallest acceptable |det| of the fitted matrix
    pub min_determinant: f64,
    /// Ridge weight pulling off-diagonal terms toward zero (0 disables)
    pub cross_talk_damping: f64,
    /// Fraction of each swatch's width/height averaged by the sampler
    pub sample_fraction: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_swatches: 4,
            // 8/255 per channel
            quality_threshold: 8.0,
            // 3/255
            contamination_tolerance: 3,
            rank_tolerance: 1e-3,
            max_condition_number: 1e6,
            min_determinant: 1e-3,
            cross_talk_damping: 0.0,
            sample_fraction: 0.5,
        }
    }
}

/// Reference chart geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub width: u32,
    pub height: u32,
    /// Swatches per row
    pub columns: u32,
    /// Frame width around every swatch, in pixels
    pub border: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 600,
            height: 400,
            columns: 3,
            border: 12,
        }
    }
}

/// Profile storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Preferences file; `None` uses the platform config directory
    pub preferences_path: Option<PathBuf>,
    /// Top-level key holding the calibration record
    pub section_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            preferences_path: None,
            section_key: "color_calibration".to_string(),
        }
    }
}

impl StoreConfig {
    /// Resolve the preferences file path.
    ///
    /// Falls back to `preferences.json` in the working directory when the
    /// platform has no home directory.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.preferences_path {
            return path.clone();
        }
        match ProjectDirs::from("org", "ColorCalibration", "color-calibration") {
            Some(dirs) => dirs.config_dir().join("preferences.json"),
            None => PathBuf::from("preferences.json"),
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    tracing::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

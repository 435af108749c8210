// CalibrationProfile - a named, persisted correction model

use serde::{Deserialize, Serialize};

use crate::calibration::model::CorrectionModel;
use crate::error::StoreError;

/// Version of the stored profile layout
pub const SCHEMA_VERSION: u32 = 1;

/// Profile name used when the wizard is started without a preset
pub const DEFAULT_PROFILE_NAME: &str = "default";

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub name: String,
    pub model: CorrectionModel,
    pub enabled: bool,
    pub schema_version: u32,
}

impl CalibrationProfile {
    /// Create an enabled profile at the current schema version
    pub fn new(name: impl Into<String>, model: CorrectionModel) -> Result<Self, StoreError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            model,
            enabled: true,
            schema_version: SCHEMA_VERSION,
        })
    }

    /// Whether the profile may become the active one
    pub fn is_activatable(&self, quality_threshold: f64) -> bool {
        self.enabled && !self.model.is_low_quality(quality_threshold)
    }
}

/// Profile names are trimmed, non-empty, short, and free of control characters
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.trim() == name
        && name.chars().count() <= MAX_NAME_LEN
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidProfileName {
            name: name.to_string(),
        })
    }
}

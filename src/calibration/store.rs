//! Calibration profile persistence
//!
//! Profiles live in a JSON preferences document shared with unrelated
//! application settings. The calibration record sits under one top-level key:
//!
//! ```json
//! {
//!   "window": { "width": 1280 },
//!   "color_calibration": {
//!     "schema_version": 1,
//!     "profiles": { "default": { "name": "default", "model": { ... } } },
//!     "active_profile_name": "default"
//!   }
//! }
//! ```
//!
//! Every write re-reads the document, replaces only the targeted entry and
//! commits the whole document atomically. Everything else, including other
//! profiles and fields this version does not know about, is copied through
//! byte for byte and keeps its position. A document that fails to parse is
//! reported and never rewritten.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::calibration::document::{to_raw_at, RawObject};
use crate::calibration::profile::{validate_name, CalibrationProfile, SCHEMA_VERSION};
use crate::config::AppConfig;
use crate::error::{log_store_error, CalibrationError, StoreError};

const SCHEMA_KEY: &str = "schema_version";
const PROFILES_KEY: &str = "profiles";
const ACTIVE_KEY: &str = "active_profile_name";

/// Nesting depth of the calibration record and of each stored profile
const SECTION_DEPTH: usize = 1;
const PROFILE_DEPTH: usize = SECTION_DEPTH + 2;

/// Storage for the raw preferences document.
///
/// Implementations only move whole documents; merging happens in
/// [CalibrationStore].
pub trait PreferencesBackend: Send + Sync {
    /// Current document text, or `None` when nothing has been stored yet.
    fn read(&self) -> Result<Option<String>, StoreError>;

    /// Replace the document. Readers observe either the old or the new
    /// document, never a mix.
    fn commit(&self, contents: &str) -> Result<(), StoreError>;
}

impl<T: PreferencesBackend + ?Sized> PreferencesBackend for Arc<T> {
    fn read(&self) -> Result<Option<String>, StoreError> {
        (**self).read()
    }

    fn commit(&self, contents: &str) -> Result<(), StoreError> {
        (**self).commit(contents)
    }
}

/// Preferences file on disk, replaced through temp-file-and-rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferencesBackend for FileBackend {
    fn read(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(&self.path, err)),
        }
    }

    fn commit(&self, contents: &str) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;

        // Same directory as the target so the rename stays on one filesystem
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|err| StoreError::io(&dir, err))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|err| StoreError::io(tmp.path(), err))?;
        tmp.flush().map_err(|err| StoreError::io(tmp.path(), err))?;
        tmp.as_file()
            .sync_all()
            .map_err(|err| StoreError::io(tmp.path(), err))?;
        tmp.persist(&self.path)
            .map_err(|err| StoreError::io(&self.path, err.error))?;
        Ok(())
    }
}

/// In-memory document, for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    contents: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
        }
    }

    /// Snapshot of the stored document
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().ok().and_then(|guard| guard.clone())
    }
}

impl PreferencesBackend for MemoryBackend {
    fn read(&self) -> Result<Option<String>, StoreError> {
        let guard = self.contents.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.clone())
    }

    fn commit(&self, contents: &str) -> Result<(), StoreError> {
        let mut guard = self.contents.lock().map_err(|_| StoreError::LockPoisoned)?;
        *guard = Some(contents.to_string());
        Ok(())
    }
}

/// The calibration record inside the preferences document
///
/// `members` is the record as stored. The known fields are decoded beside it
/// and written back into their original slots, so unknown fields keep both
/// their bytes and their position.
#[derive(Debug)]
struct CalibrationSection {
    members: RawObject,
    schema_version: u32,
    /// Profiles stay raw so untouched entries are written back verbatim
    profiles: RawObject,
    active_profile_name: Option<String>,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            members: RawObject::default(),
            schema_version: SCHEMA_VERSION,
            profiles: RawObject::default(),
            active_profile_name: None,
        }
    }
}

impl CalibrationSection {
    fn decode(members: RawObject) -> Result<Self, serde_json::Error> {
        let schema_version = match members.get(SCHEMA_KEY) {
            Some(raw) => serde_json::from_str(raw.get())?,
            None => SCHEMA_VERSION,
        };
        let profiles = match members.get(PROFILES_KEY) {
            Some(raw) => RawObject::parse(raw.get())?,
            None => RawObject::default(),
        };
        let active_profile_name = match members.get(ACTIVE_KEY) {
            Some(raw) => serde_json::from_str(raw.get())?,
            None => None,
        };
        Ok(Self {
            members,
            schema_version,
            profiles,
            active_profile_name,
        })
    }

    fn encode(self) -> Result<Box<RawValue>, serde_json::Error> {
        let mut members = self.members;
        members.insert(SCHEMA_KEY, to_raw_at(&self.schema_version, SECTION_DEPTH + 1)?);
        members.insert(PROFILES_KEY, self.profiles.into_raw(SECTION_DEPTH + 1)?);
        members.insert(
            ACTIVE_KEY,
            to_raw_at(&self.active_profile_name, SECTION_DEPTH + 1)?,
        );
        members.into_raw(SECTION_DEPTH)
    }
}

/// Listing entry for one stored profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub name: String,
    pub enabled: bool,
    pub active: bool,
    pub low_quality: bool,
    pub residual_error: f64,
    pub created_at: DateTime<Utc>,
}

/// Persists calibration profiles and the active-profile pointer
pub struct CalibrationStore {
    backend: Box<dyn PreferencesBackend>,
    section_key: String,
    quality_threshold: f64,
    write_lock: Mutex<()>,
}

impl CalibrationStore {
    pub fn new(backend: impl PreferencesBackend + 'static) -> Self {
        let defaults = AppConfig::default();
        Self {
            backend: Box::new(backend),
            section_key: defaults.store.section_key,
            quality_threshold: defaults.calibration.quality_threshold,
            write_lock: Mutex::new(()),
        }
    }

    /// File-backed store at the configured preferences path
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(FileBackend::new(config.store.resolved_path()))
            .with_section_key(config.store.section_key.clone())
            .with_quality_threshold(config.calibration.quality_threshold)
    }

    pub fn with_section_key(mut self, key: impl Into<String>) -> Self {
        self.section_key = key.into();
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn quality_threshold(&self) -> f64 {
        self.quality_threshold
    }

    /// Insert or replace a profile. Does not change the active profile.
    pub fn save(&self, profile: &CalibrationProfile) -> Result<(), CalibrationError> {
        validate_name(&profile.name)?;
        let raw = to_raw_at(profile, PROFILE_DEPTH).map_err(encode_error)?;
        self.update(|section| {
            section.profiles.insert(&profile.name, raw);
            Ok(())
        })?;
        tracing::info!(
            "[CalibrationStore] Saved profile '{}' (residual={:.3}, enabled={})",
            profile.name,
            profile.model.residual_error(),
            profile.enabled
        );
        Ok(())
    }

    /// Save a profile without touching the one in use
    ///
    /// # Errors
    /// `Persistence(ProfileIsActive)` when `profile.name` is the active
    /// profile; nothing is written.
    pub fn save_pending(&self, profile: &CalibrationProfile) -> Result<(), CalibrationError> {
        validate_name(&profile.name)?;
        let raw = to_raw_at(profile, PROFILE_DEPTH).map_err(encode_error)?;
        self.update(|section| {
            if section.active_profile_name.as_deref() == Some(profile.name.as_str()) {
                return Err(StoreError::ProfileIsActive {
                    name: profile.name.clone(),
                }
                .into());
            }
            section.profiles.insert(&profile.name, raw);
            Ok(())
        })?;
        tracing::info!(
            "[CalibrationStore] Saved pending profile '{}' (residual={:.3})",
            profile.name,
            profile.model.residual_error()
        );
        Ok(())
    }

    /// Insert or replace a profile and make it active in a single commit
    ///
    /// # Errors
    /// Same as [`CalibrationStore::set_active`]; on any error nothing is
    /// written.
    pub fn save_and_activate(&self, profile: &CalibrationProfile) -> Result<(), CalibrationError> {
        validate_name(&profile.name)?;
        let raw = to_raw_at(profile, PROFILE_DEPTH).map_err(encode_error)?;
        self.update(|section| {
            self.check_activatable(profile)?;
            section.profiles.insert(&profile.name, raw);
            section.active_profile_name = Some(profile.name.clone());
            Ok(())
        })?;
        tracing::info!(
            "[CalibrationStore] Saved and activated profile '{}' (residual={:.3})",
            profile.name,
            profile.model.residual_error()
        );
        Ok(())
    }

    /// Load a profile by name
    pub fn load(&self, name: &str) -> Result<CalibrationProfile, CalibrationError> {
        let section = self.read_section()?;
        Ok(parse_profile(&section, name)?)
    }

    /// The active profile, if one is set and still usable
    ///
    /// A dangling pointer, a disabled profile or a low-quality model all
    /// yield `None`; they never leak into the measurement pipeline.
    pub fn active(&self) -> Result<Option<CalibrationProfile>, CalibrationError> {
        let section = self.read_section()?;
        let Some(name) = section.active_profile_name.as_deref() else {
            return Ok(None);
        };
        let profile = match parse_profile(&section, name) {
            Ok(profile) => profile,
            Err(StoreError::UnknownProfile { .. }) => {
                tracing::warn!(
                    "[CalibrationStore] Active profile '{}' does not exist, ignoring",
                    name
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        if !profile.enabled {
            tracing::warn!("[CalibrationStore] Active profile '{}' is disabled, ignoring", name);
            return Ok(None);
        }
        if profile.model.is_low_quality(self.quality_threshold) {
            tracing::warn!(
                "[CalibrationStore] Active profile '{}' is below quality threshold, ignoring",
                name
            );
            return Ok(None);
        }
        Ok(Some(profile))
    }

    /// Name stored as active, without checking the profile itself
    pub fn active_profile_name(&self) -> Result<Option<String>, CalibrationError> {
        Ok(self.read_section()?.active_profile_name)
    }

    /// Make `name` the active profile
    ///
    /// # Errors
    /// * `Persistence(UnknownProfile | Corrupt)` - profile missing or unreadable
    /// * `Persistence(ProfileDisabled)` - profile disabled
    /// * `LowQualityModel` - residual above the store's quality threshold
    pub fn set_active(&self, name: &str) -> Result<(), CalibrationError> {
        self.update(|section| {
            let profile = parse_profile(section, name)?;
            self.check_activatable(&profile)?;
            section.active_profile_name = Some(name.to_string());
            Ok(())
        })?;
        tracing::info!("[CalibrationStore] Activated profile '{}'", name);
        Ok(())
    }

    /// Unset the active profile; subsequent corrections are identity
    pub fn clear_active(&self) -> Result<(), CalibrationError> {
        self.update(|section| {
            section.active_profile_name = None;
            Ok(())
        })
    }

    /// Enable or disable a profile. Disabling the active profile also
    /// clears the active pointer.
    ///
    /// Only the stored `enabled` flag changes; every other field of the
    /// profile, known or not, is kept.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), CalibrationError> {
        self.update(|section| {
            parse_profile(section, name)?;
            let mut value: Value = serde_json::from_str(raw_profile(section, name)?.get())
                .map_err(|err| corrupt_profile(name, err))?;
            let Some(fields) = value.as_object_mut() else {
                return Err(corrupt_profile(name, "not a JSON object").into());
            };
            fields.insert("enabled".to_string(), Value::Bool(enabled));

            let raw = to_raw_at(&value, PROFILE_DEPTH).map_err(encode_error)?;
            section.profiles.insert(name, raw);
            if !enabled && section.active_profile_name.as_deref() == Some(name) {
                section.active_profile_name = None;
            }
            Ok(())
        })?;
        tracing::info!(
            "[CalibrationStore] Profile '{}' {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Delete a profile. Removing the active profile clears the pointer.
    pub fn remove(&self, name: &str) -> Result<(), CalibrationError> {
        self.update(|section| {
            if !section.profiles.remove(name) {
                return Err(StoreError::UnknownProfile {
                    name: name.to_string(),
                }
                .into());
            }
            if section.active_profile_name.as_deref() == Some(name) {
                section.active_profile_name = None;
            }
            Ok(())
        })
    }

    /// Summaries of all readable profiles, in stored order
    ///
    /// Entries that fail to parse are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ProfileSummary>, CalibrationError> {
        let section = self.read_section()?;
        let mut summaries = Vec::with_capacity(section.profiles.len());
        for name in section.profiles.keys() {
            match parse_profile(&section, name) {
                Ok(profile) => summaries.push(ProfileSummary {
                    active: section.active_profile_name.as_deref() == Some(name),
                    low_quality: profile.model.is_low_quality(self.quality_threshold),
                    residual_error: profile.model.residual_error(),
                    created_at: profile.model.created_at(),
                    enabled: profile.enabled,
                    name: profile.name,
                }),
                Err(err) => log_store_error(&err, "CalibrationStore::list"),
            }
        }
        Ok(summaries)
    }

    /// Enabled and within this store's quality threshold
    fn check_activatable(&self, profile: &CalibrationProfile) -> Result<(), CalibrationError> {
        if !profile.enabled {
            return Err(StoreError::ProfileDisabled {
                name: profile.name.clone(),
            }
            .into());
        }
        if profile.model.is_low_quality(self.quality_threshold) {
            return Err(CalibrationError::LowQualityModel {
                residual: profile.model.per_channel_residual(),
                threshold: self.quality_threshold,
            });
        }
        Ok(())
    }

    fn read_document(&self) -> Result<RawObject, StoreError> {
        let Some(text) = self.backend.read()? else {
            return Ok(RawObject::default());
        };
        RawObject::parse(&text).map_err(|err| {
            let err = StoreError::Corrupt {
                reason: format!("preferences document is not a valid JSON object: {}", err),
            };
            log_store_error(&err, "CalibrationStore::read_document");
            err
        })
    }

    fn section_of(&self, document: &RawObject) -> Result<CalibrationSection, StoreError> {
        match document.get(&self.section_key) {
            None => Ok(CalibrationSection::default()),
            Some(raw) => RawObject::parse(raw.get())
                .and_then(CalibrationSection::decode)
                .map_err(|err| {
                    let err = StoreError::Corrupt {
                        reason: format!("'{}' record: {}", self.section_key, err),
                    };
                    log_store_error(&err, "CalibrationStore::section_of");
                    err
                }),
        }
    }

    fn read_section(&self) -> Result<CalibrationSection, StoreError> {
        let document = self.read_document()?;
        self.section_of(&document)
    }

    /// Read-modify-write of the calibration record under the write lock.
    ///
    /// Nothing is committed when reading fails or `f` returns an error.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut CalibrationSection) -> Result<T, CalibrationError>,
    ) -> Result<T, CalibrationError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;

        let mut document = self.read_document()?;
        let mut section = self.section_of(&document)?;
        let out = f(&mut section)?;

        let encoded = section.encode().map_err(encode_error)?;
        document.insert(&self.section_key, encoded);
        let text = document.render(0).map_err(encode_error)?;
        self.backend.commit(&text)?;
        Ok(out)
    }
}

fn raw_profile<'a>(
    section: &'a CalibrationSection,
    name: &str,
) -> Result<&'a RawValue, StoreError> {
    section
        .profiles
        .get(name)
        .ok_or_else(|| StoreError::UnknownProfile {
            name: name.to_string(),
        })
}

fn parse_profile(
    section: &CalibrationSection,
    name: &str,
) -> Result<CalibrationProfile, StoreError> {
    let profile: CalibrationProfile = serde_json::from_str(raw_profile(section, name)?.get())
        .map_err(|err| corrupt_profile(name, err))?;
    if profile.name != name {
        return Err(StoreError::Corrupt {
            reason: format!("profile stored as '{}' is named '{}'", name, profile.name),
        });
    }
    if profile.schema_version > SCHEMA_VERSION {
        return Err(StoreError::Corrupt {
            reason: format!(
                "profile '{}' has schema version {}, newest supported is {}",
                name, profile.schema_version, SCHEMA_VERSION
            ),
        });
    }
    Ok(profile)
}

fn corrupt_profile(name: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        reason: format!("profile '{}': {}", name, err),
    }
}

fn encode_error(err: serde_json::Error) -> StoreError {
    StoreError::Encode {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::model::{CorrectionModel, FitMethod, SamplePair};
    use crate::color::Rgb;

    fn good_model() -> CorrectionModel {
        CorrectionModel::new(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [1.0, -2.0, 0.5],
            Vec::new(),
            FitMethod::LeastSquares,
        )
        .unwrap()
    }

    fn poor_model() -> CorrectionModel {
        let pairs = vec![SamplePair::new(0, Rgb::WHITE, Rgb::gray(100))];
        CorrectionModel::new(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [0.0; 3],
            pairs,
            FitMethod::MeanOffsetFallback,
        )
        .unwrap()
    }

    fn memory_store() -> CalibrationStore {
        CalibrationStore::new(MemoryBackend::new())
    }

    #[test]
    fn test_save_and_load() {
        let store = memory_store();
        let profile = CalibrationProfile::new("laptop", good_model()).unwrap();
        store.save(&profile).unwrap();

        let loaded = store.load("laptop").unwrap();
        assert_eq!(loaded, profile);
        assert!(store.active().unwrap().is_none());
    }

    #[test]
    fn test_load_unknown_profile() {
        match memory_store().load("missing").unwrap_err() {
            CalibrationError::Persistence(StoreError::UnknownProfile { name }) => {
                assert_eq!(name, "missing");
            }
            other => panic!("Expected UnknownProfile, got {:?}", other),
        }
    }

    #[test]
    fn test_set_active_and_active() {
        let store = memory_store();
        store
            .save(&CalibrationProfile::new("laptop", good_model()).unwrap())
            .unwrap();
        store.set_active("laptop").unwrap();

        let active = store.active().unwrap().unwrap();
        assert_eq!(active.name, "laptop");
        assert_eq!(store.active_profile_name().unwrap().as_deref(), Some("laptop"));

        store.clear_active().unwrap();
        assert!(store.active().unwrap().is_none());
    }

    #[test]
    fn test_set_active_refuses_low_quality() {
        let store = memory_store();
        store
            .save(&CalibrationProfile::new("bad", poor_model()).unwrap())
            .unwrap();
        match store.set_active("bad").unwrap_err() {
            CalibrationError::LowQualityModel { threshold, .. } => assert_eq!(threshold, 8.0),
            other => panic!("Expected LowQualityModel, got {:?}", other),
        }
        assert!(store.active_profile_name().unwrap().is_none());
    }

    #[test]
    fn test_set_active_refuses_disabled() {
        let store = memory_store();
        store
            .save(&CalibrationProfile::new("desk", good_model()).unwrap())
            .unwrap();
        store.set_enabled("desk", false).unwrap();
        assert!(matches!(
            store.set_active("desk").unwrap_err(),
            CalibrationError::Persistence(StoreError::ProfileDisabled { .. })
        ));
    }

    #[test]
    fn test_disabling_active_profile_clears_pointer() {
        let store = memory_store();
        store
            .save(&CalibrationProfile::new("desk", good_model()).unwrap())
            .unwrap();
        store.set_active("desk").unwrap();
        store.set_enabled("desk", false).unwrap();

        assert!(store.active().unwrap().is_none());
        assert!(store.active_profile_name().unwrap().is_none());
        assert!(!store.load("desk").unwrap().enabled);
    }

    #[test]
    fn test_active_ignores_low_quality_pointer() {
        // Pointer written by hand to a profile that fails the quality gate
        let store = memory_store();
        store
            .save(&CalibrationProfile::new("bad", poor_model()).unwrap())
            .unwrap();
        store
            .update(|section| {
                section.active_profile_name = Some("bad".to_string());
                Ok(())
            })
            .unwrap();
        assert!(store.active().unwrap().is_none());

        // A stricter store rejects a profile a lenient one accepted
        let strict = memory_store().with_quality_threshold(0.1);
        let pairs = vec![SamplePair::new(0, Rgb::WHITE, Rgb::gray(254))];
        let model = CorrectionModel::new(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [0.0; 3],
            pairs,
            FitMethod::LeastSquares,
        )
        .unwrap();
        strict
            .save(&CalibrationProfile::new("slight", model).unwrap())
            .unwrap();
        assert!(strict.set_active("slight").is_err());
    }

    #[test]
    fn test_remove_profile() {
        let store = memory_store();
        store
            .save(&CalibrationProfile::new("a", good_model()).unwrap())
            .unwrap();
        store
            .save(&CalibrationProfile::new("b", good_model()).unwrap())
            .unwrap();
        store.set_active("a").unwrap();
        store.remove("a").unwrap();

        assert!(store.active_profile_name().unwrap().is_none());
        let names: Vec<String> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b".to_string()]);
        assert!(store.remove("a").is_err());
    }

    #[test]
    fn test_list_reports_flags() {
        let store = memory_store();
        store
            .save(&CalibrationProfile::new("good", good_model()).unwrap())
            .unwrap();
        store
            .save(&CalibrationProfile::new("poor", poor_model()).unwrap())
            .unwrap();
        store.set_active("good").unwrap();

        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].active && !list[0].low_quality);
        assert!(!list[1].active && list[1].low_quality);
    }

    #[test]
    fn test_unrelated_keys_preserved() {
        let backend = Arc::new(MemoryBackend::with_contents(
            r#"{"theme":"dark","window":{"width":1280,"scale":1.25},"color_calibration":{"schema_version":1,"future_field":[1,2]}}"#,
        ));
        let store = CalibrationStore::new(backend.clone());
        store
            .save(&CalibrationProfile::new("laptop", good_model()).unwrap())
            .unwrap();

        let text = backend.contents().unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["theme", "window", "color_calibration"]);
        assert_eq!(doc["window"]["scale"], serde_json::json!(1.25));
        assert_eq!(
            doc["color_calibration"]["future_field"],
            serde_json::json!([1, 2])
        );
    }

    #[test]
    fn test_corrupt_document_not_overwritten() {
        let backend = Arc::new(MemoryBackend::with_contents("{ not json"));
        let store = CalibrationStore::new(backend.clone());

        let err = store
            .save(&CalibrationProfile::new("laptop", good_model()).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::Persistence(StoreError::Corrupt { .. })
        ));
        assert_eq!(backend.contents().as_deref(), Some("{ not json"));
    }

    #[test]
    fn test_corrupt_profile_entry() {
        let backend = MemoryBackend::with_contents(
            r#"{"color_calibration":{"profiles":{"broken":{"name":"broken","model":42}}}}"#,
        );
        let store = CalibrationStore::new(backend);
        assert!(matches!(
            store.load("broken").unwrap_err(),
            CalibrationError::Persistence(StoreError::Corrupt { .. })
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_profile_name_rejected() {
        let mut profile = CalibrationProfile::new("ok", good_model()).unwrap();
        profile.name = String::new();
        assert!(matches!(
            memory_store().save(&profile).unwrap_err(),
            CalibrationError::Persistence(StoreError::InvalidProfileName { .. })
        ));
    }

    #[test]
    fn test_set_enabled_keeps_unknown_profile_fields() {
        let mut stored = serde_json::to_value(CalibrationProfile::new("desk", good_model()).unwrap())
            .unwrap();
        stored["notes"] = serde_json::json!("from newer version");
        let document = serde_json::json!({
            "color_calibration": { "schema_version": 1, "profiles": { "desk": stored } }
        });
        let backend = Arc::new(MemoryBackend::with_contents(document.to_string()));
        let store = CalibrationStore::new(backend.clone());

        store.set_enabled("desk", false).unwrap();

        let doc: Value = serde_json::from_str(&backend.contents().unwrap()).unwrap();
        let desk = &doc["color_calibration"]["profiles"]["desk"];
        assert_eq!(desk["notes"], serde_json::json!("from newer version"));
        assert_eq!(desk["enabled"], serde_json::json!(false));
        assert_eq!(desk["model"], stored["model"]);
        assert!(!store.load("desk").unwrap().enabled);
    }

    #[test]
    fn test_save_pending_refuses_active_name() {
        let backend = Arc::new(MemoryBackend::new());
        let store = CalibrationStore::new(backend.clone());
        let active = CalibrationProfile::new("desk", good_model()).unwrap();
        store.save(&active).unwrap();
        store.set_active("desk").unwrap();
        let before = backend.contents();

        let pending = CalibrationProfile::new("desk", poor_model()).unwrap();
        match store.save_pending(&pending).unwrap_err() {
            CalibrationError::Persistence(StoreError::ProfileIsActive { name }) => {
                assert_eq!(name, "desk");
            }
            other => panic!("Expected ProfileIsActive, got {:?}", other),
        }
        assert_eq!(backend.contents(), before);
        assert_eq!(store.active().unwrap(), Some(active));

        // Any other name is fine
        let pending = CalibrationProfile::new("desk-pending", poor_model()).unwrap();
        store.save_pending(&pending).unwrap();
        assert_eq!(store.load("desk-pending").unwrap(), pending);
        assert_eq!(store.active_profile_name().unwrap().as_deref(), Some("desk"));
    }

    #[test]
    fn test_save_and_activate_commits_once() {
        let backend = Arc::new(MemoryBackend::new());
        let store = CalibrationStore::new(backend.clone());
        store
            .save_and_activate(&CalibrationProfile::new("desk", good_model()).unwrap())
            .unwrap();
        assert_eq!(store.active().unwrap().unwrap().name, "desk");

        // Refused profiles leave no trace, not even the profile entry
        let noisy = CorrectionModel::from_parts(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [0.0; 3],
            Vec::new(),
            5.0,
            Utc::now(),
            FitMethod::LeastSquares,
        )
        .unwrap();
        let strict = CalibrationStore::new(backend.clone()).with_quality_threshold(1.0);
        let before = backend.contents();
        match strict
            .save_and_activate(&CalibrationProfile::new("noisy", noisy).unwrap())
            .unwrap_err()
        {
            CalibrationError::LowQualityModel { threshold, .. } => assert_eq!(threshold, 1.0),
            other => panic!("Expected LowQualityModel, got {:?}", other),
        }
        assert_eq!(backend.contents(), before);

        let mut disabled = CalibrationProfile::new("off", good_model()).unwrap();
        disabled.enabled = false;
        assert!(matches!(
            store.save_and_activate(&disabled).unwrap_err(),
            CalibrationError::Persistence(StoreError::ProfileDisabled { .. })
        ));
        assert_eq!(backend.contents(), before);
        assert!(matches!(
            store.load("off").unwrap_err(),
            CalibrationError::Persistence(StoreError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn test_untouched_text_is_kept_verbatim() {
        let original = r#"{"theme":"dark","window":{"scale":1.50,  "width":1280},"color_calibration":{"sync":{"enabled":false},"schema_version":1,"profiles":{}}}"#;
        let backend = Arc::new(MemoryBackend::with_contents(original));
        let store = CalibrationStore::new(backend.clone());
        store
            .save(&CalibrationProfile::new("laptop", good_model()).unwrap())
            .unwrap();
        store.set_enabled("laptop", false).unwrap();

        let text = backend.contents().unwrap();
        assert!(text.contains(r#""window": {"scale":1.50,  "width":1280}"#));
        assert!(text.contains(r#""sync": {"enabled":false}"#));

        let doc: Value = serde_json::from_str(&text).unwrap();
        let keys: Vec<&String> = doc["color_calibration"].as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            vec!["sync", "schema_version", "profiles", "active_profile_name"]
        );
    }

    #[test]
    fn test_other_profiles_keep_their_bytes() {
        let backend = Arc::new(MemoryBackend::new());
        let store = CalibrationStore::new(backend.clone());
        store
            .save(&CalibrationProfile::new("a", good_model()).unwrap())
            .unwrap();
        let text = backend.contents().unwrap();
        let start = text.find("\"a\": {").unwrap();
        let stored_a = text[start..].to_string();

        store
            .save(&CalibrationProfile::new("b", good_model()).unwrap())
            .unwrap();
        store.set_active("b").unwrap();

        let after = backend.contents().unwrap();
        let stored_a = &stored_a[..stored_a.find("\n      }").unwrap()];
        assert!(after.contains(stored_a));
    }
}

// CalibrationManager: calibration entry point for the measurement pipeline
//
// Single Responsibility: own the live correction and the wizard slot
//
// The measurement pipeline only ever sees a CorrectionApplier snapshot.
// Storage or lock failures degrade to identity correction; they never
// surface as errors on the hot path.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use crate::calibration::wizard::SessionSlot;
use crate::calibration::{
    CalibrationProfile, CalibrationStore, CalibrationWizard, CenterRegionSampler,
    CorrectionApplier, ScreenshotSampler,
};
use crate::color::Rgb;
use crate::config::AppConfig;
use crate::error::{log_calibration_error, CalibrationError};

/// The profile currently applied to measurements
#[derive(Debug, Clone)]
pub struct ActiveCalibration {
    pub profile_name: String,
    pub applier: CorrectionApplier,
}

impl ActiveCalibration {
    fn from_profile(profile: &CalibrationProfile) -> Self {
        Self {
            profile_name: profile.name.clone(),
            applier: CorrectionApplier::new(Arc::new(profile.model.clone())),
        }
    }
}

type LiveCalibration = Arc<RwLock<Option<Arc<ActiveCalibration>>>>;

/// Manages the active calibration and calibration sessions
///
/// This manager handles:
/// - Loading the active profile from the store
/// - Correcting measured colors with the active profile
/// - Starting wizard sessions, one at a time
/// - Swapping in a newly accepted profile without blocking readers
///
/// # Example
/// ```ignore
/// let manager = CalibrationManager::new(config, store);
/// let corrected = manager.correct(Rgb::new(24, 17, 247));
/// let mut wizard = manager.start_wizard(None)?;
/// ```
pub struct CalibrationManager {
    config: AppConfig,
    store: Arc<CalibrationStore>,
    sampler: Arc<dyn ScreenshotSampler>,
    live: LiveCalibration,
    wizard_busy: Arc<AtomicBool>,
}

impl CalibrationManager {
    /// Create a manager and load the active profile from `store`
    pub fn new(config: AppConfig, store: Arc<CalibrationStore>) -> Self {
        let sampler = Arc::new(CenterRegionSampler::new(config.calibration.sample_fraction));
        Self::with_sampler(config, store, sampler)
    }

    /// Create a manager that samples captures with a custom sampler
    pub fn with_sampler(
        config: AppConfig,
        store: Arc<CalibrationStore>,
        sampler: Arc<dyn ScreenshotSampler>,
    ) -> Self {
        let manager = Self {
            config,
            store,
            sampler,
            live: Arc::new(RwLock::new(None)),
            wizard_busy: Arc::new(AtomicBool::new(false)),
        };
        manager.reload();
        manager
    }

    /// Whether measurements are currently corrected
    pub fn is_calibrated(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Name of the profile currently applied, if any
    pub fn active_profile_name(&self) -> Option<String> {
        self.snapshot().map(|active| active.profile_name.clone())
    }

    /// Applier for the current profile (identity when uncalibrated)
    pub fn applier(&self) -> CorrectionApplier {
        self.snapshot()
            .map(|active| active.applier.clone())
            .unwrap_or_default()
    }

    /// Correct a measured 8-bit color
    pub fn correct(&self, measured: Rgb) -> Rgb {
        match self.snapshot() {
            Some(active) => active.applier.correct(measured),
            None => measured,
        }
    }

    /// Correct a measured color in normalized 0..1 units
    pub fn correct_normalized(&self, measured: [f64; 3]) -> [f64; 3] {
        match self.snapshot() {
            Some(active) => active.applier.correct_normalized(measured),
            None => measured,
        }
    }

    /// Re-read the active profile from the store
    ///
    /// Returns whether a profile is now active. Store errors are logged and
    /// leave the pipeline uncalibrated.
    pub fn reload(&self) -> bool {
        let next = match self.store.active() {
            Ok(profile) => profile.map(|p| Arc::new(ActiveCalibration::from_profile(&p))),
            Err(err) => {
                log_calibration_error(&err, "CalibrationManager::reload");
                None
            }
        };
        let calibrated = next.is_some();
        match &next {
            Some(active) => tracing::info!(
                "[CalibrationManager] Applying profile '{}'",
                active.profile_name
            ),
            None => tracing::info!("[CalibrationManager] No usable profile, corrections are identity"),
        }
        if let Err(err) = replace_live(&self.live, next) {
            log_calibration_error(&err, "CalibrationManager::reload");
            return false;
        }
        calibrated
    }

    /// Start a calibration wizard session
    ///
    /// # Arguments
    /// * `preset` - Profile name to save under (`default` when `None`)
    ///
    /// # Errors
    /// - `AlreadyInProgress` while another wizard from this manager is open
    /// - `Persistence(InvalidProfileName)` for an unusable preset name
    pub fn start_wizard(
        &self,
        preset: Option<String>,
    ) -> Result<CalibrationWizard, CalibrationError> {
        let slot = self.claim_wizard_slot()?;

        let live = Arc::clone(&self.live);
        let wizard = CalibrationWizard::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.sampler),
            preset,
        )
        .inspect_err(|err| log_calibration_error(err, "start_wizard"))?
        .with_activation_hook(Box::new(move |profile| {
            let next = Some(Arc::new(ActiveCalibration::from_profile(profile)));
            if let Err(err) = replace_live(&live, next) {
                log_calibration_error(&err, "CalibrationWizard activation");
            }
        }))
        .with_session_slot(slot);

        tracing::info!(
            "[CalibrationManager] Started calibration wizard for profile '{}'",
            wizard.profile_name()
        );
        Ok(wizard)
    }

    pub fn store(&self) -> &Arc<CalibrationStore> {
        &self.store
    }

    // ========================================================================
    // HELPER METHODS - Lock management
    // ========================================================================

    /// Clone the live snapshot; the lock is released before any computation.
    /// A poisoned lock reads as uncalibrated.
    fn snapshot(&self) -> Option<Arc<ActiveCalibration>> {
        match self.live.read() {
            Ok(guard) => guard.clone(),
            Err(_) => {
                log_calibration_error(&CalibrationError::StatePoisoned, "CalibrationManager::snapshot");
                None
            }
        }
    }

    /// Check that no wizard session is open and claim the slot
    fn claim_wizard_slot(&self) -> Result<SessionSlot, CalibrationError> {
        SessionSlot::claim(&self.wizard_busy).ok_or_else(|| {
            let err = CalibrationError::AlreadyInProgress;
            log_calibration_error(&err, "start_wizard");
            err
        })
    }
}

fn replace_live(
    live: &LiveCalibration,
    next: Option<Arc<ActiveCalibration>>,
) -> Result<(), CalibrationError> {
    let mut guard = live.write().map_err(|_| CalibrationError::StatePoisoned)?;
    *guard = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CorrectionModel, FitMethod, MemoryBackend};
    use crate::image::TaggedImage;

    fn memory_manager() -> CalibrationManager {
        CalibrationManager::new(
            AppConfig::default(),
            Arc::new(CalibrationStore::new(MemoryBackend::new())),
        )
    }

    fn offset_profile(name: &str) -> CalibrationProfile {
        let model = CorrectionModel::new(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [-4.0, 0.0, 4.0],
            Vec::new(),
            FitMethod::LeastSquares,
        )
        .unwrap();
        CalibrationProfile::new(name, model).unwrap()
    }

    #[test]
    fn test_new_is_uncalibrated() {
        let manager = memory_manager();
        assert!(!manager.is_calibrated());
        assert!(manager.active_profile_name().is_none());
        assert_eq!(manager.correct(Rgb::new(1, 2, 3)), Rgb::new(1, 2, 3));
        assert_eq!(manager.correct_normalized([0.2, 0.4, 0.6]), [0.2, 0.4, 0.6]);
        assert!(manager.applier().is_identity());
    }

    #[test]
    fn test_reload_picks_up_active_profile() {
        let manager = memory_manager();
        manager.store().save(&offset_profile("desk")).unwrap();
        manager.store().set_active("desk").unwrap();
        assert!(!manager.is_calibrated());

        assert!(manager.reload());
        assert_eq!(manager.active_profile_name().as_deref(), Some("desk"));
        assert_eq!(manager.correct(Rgb::new(10, 10, 10)), Rgb::new(6, 10, 14));
    }

    #[test]
    fn test_reload_with_corrupt_store_degrades_to_identity() {
        let store = Arc::new(CalibrationStore::new(MemoryBackend::with_contents("[1, 2")));
        let manager = CalibrationManager::new(AppConfig::default(), store);
        assert!(!manager.reload());
        assert_eq!(manager.correct(Rgb::new(9, 9, 9)), Rgb::new(9, 9, 9));
    }

    #[test]
    fn test_start_wizard_already_in_progress() {
        let manager = memory_manager();

        // First start succeeds
        let wizard = manager.start_wizard(None).unwrap();

        // Second start fails with AlreadyInProgress
        let result = manager.start_wizard(Some("other".to_string()));
        assert!(matches!(result, Err(CalibrationError::AlreadyInProgress)));

        // Dropping the wizard frees the slot
        drop(wizard);
        assert!(manager.start_wizard(None).is_ok());
    }

    #[test]
    fn test_accepted_wizard_updates_live_profile() {
        let manager = memory_manager();
        let mut wizard = manager.start_wizard(Some("studio".to_string())).unwrap();

        let chart = wizard.generate_chart().unwrap().clone();
        let capture = chart
            .image
            .image
            .map_pixels(|px| Rgb::from_f64_clamped([px.r as f64 * 0.9, px.g as f64, px.b as f64]));
        wizard.submit_capture(TaggedImage::capture(capture)).unwrap();
        wizard.analyze().unwrap();
        wizard.review().unwrap();
        wizard.accept().unwrap();

        assert_eq!(manager.active_profile_name().as_deref(), Some("studio"));
        let corrected = manager.correct(Rgb::new(90, 50, 50));
        assert!(
            corrected.distance(Rgb::new(100, 50, 50)) <= 2.0,
            "corrected to {}",
            corrected
        );

        // Applied wizard no longer holds the slot
        assert!(manager.start_wizard(None).is_ok());
    }
}

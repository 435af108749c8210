// CalibrationWizard - guided calibration session
//
// Drives one calibration from chart generation to an applied profile:
//
//   Idle -> ChartGenerated -> Captured -> Analyzed -> Reviewed -> Applied
//
// Any non-terminal state can move to Aborted. Operations called out of
// order fail with InvalidTransition and leave the state untouched. Each
// transition is published on a broadcast channel for UI progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::calibration::builder::{BuilderConfig, CorrectionModelBuilder, FitOutcome};
use crate::calibration::chart::{ReferenceChart, ReferenceChartGenerator, Swatch};
use crate::calibration::deviation::{DeviationAnalyzer, DeviationReport, SwatchDeviation};
use crate::calibration::model::{FitMethod, QualityGrade};
use crate::calibration::profile::{validate_name, CalibrationProfile, DEFAULT_PROFILE_NAME};
use crate::calibration::sampler::ScreenshotSampler;
use crate::calibration::store::CalibrationStore;
use crate::calibration::validation::{SwatchValidation, ValidationReport};
use crate::config::AppConfig;
use crate::error::{log_calibration_error, CalibrationError, ErrorCode};
use crate::image::{ImageSource, TaggedImage};

const EVENT_CAPACITY: usize = 32;

/// Wizard lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WizardState {
    Idle,
    ChartGenerated,
    Captured,
    Analyzed,
    Reviewed,
    Applied,
    Aborted,
}

impl WizardState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WizardState::Applied | WizardState::Aborted)
    }
}

/// Progress notifications published by the wizard
#[derive(Debug, Clone, PartialEq)]
pub enum WizardEvent {
    StateChanged {
        from: WizardState,
        to: WizardState,
    },
    CaptureRejected {
        reason: String,
    },
    AnalysisFailed {
        code: i32,
        message: String,
    },
    ProfileSaved {
        name: String,
        activated: bool,
    },
}

/// How a session ended after review
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardOutcome {
    /// Saved and made the active profile
    Activated { profile_name: String },
    /// Saved without activation
    SavedPending { profile_name: String },
}

/// What the user sees before accepting a calibration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSummary {
    pub profile_name: String,
    pub residual_error: f64,
    pub per_channel_residual: f64,
    pub quality: QualityGrade,
    pub low_quality: bool,
    pub method: FitMethod,
    /// Fallback notice when the full fit was ill-conditioned
    pub warning: Option<String>,
    pub deviations: Vec<SwatchDeviation>,
    /// Measured and corrected color for every reference swatch
    pub before_after: Vec<SwatchValidation>,
    pub improvement_percent: f64,
    pub recommendations: Vec<String>,
}

/// Cooperative cancellation for offloaded analysis
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called on any clone
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling: never resolves
                std::future::pending::<()>().await;
            }
        }
    }

    fn check(&self) -> Result<(), CalibrationError> {
        if self.is_cancelled() {
            Err(CalibrationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Exclusive claim on a manager's wizard slot, released on drop
#[derive(Debug)]
pub(crate) struct SessionSlot {
    busy: Arc<AtomicBool>,
}

impl SessionSlot {
    pub(crate) fn claim(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { busy: busy.clone() })
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Called with the profile that was just activated
pub type ActivationHook = Box<dyn Fn(&CalibrationProfile) + Send + Sync>;

/// Analysis result waiting for review
#[derive(Debug, Clone)]
struct Candidate {
    outcome: FitOutcome,
    deviations: DeviationReport,
    validation: ValidationReport,
}

/// Everything the analysis stage needs, detached from the wizard
struct AnalysisJob {
    sampler: Arc<dyn ScreenshotSampler>,
    analyzer: DeviationAnalyzer,
    builder: CorrectionModelBuilder,
    capture: TaggedImage,
    swatches: Vec<Swatch>,
}

impl AnalysisJob {
    fn run(self, cancel: Option<&CancelToken>) -> Result<Candidate, CalibrationError> {
        let check = || cancel.map_or(Ok(()), CancelToken::check);

        check()?;
        let pairs = self.sampler.sample(&self.capture, &self.swatches)?;
        check()?;
        let deviations = self.analyzer.analyze(&pairs)?;
        check()?;
        let outcome = self.builder.fit(&pairs)?;
        check()?;
        let validation = ValidationReport::evaluate(&outcome.model, &pairs);

        Ok(Candidate {
            outcome,
            deviations,
            validation,
        })
    }
}

pub struct CalibrationWizard {
    state: WizardState,
    profile_name: String,
    chart_generator: ReferenceChartGenerator,
    sampler: Arc<dyn ScreenshotSampler>,
    analyzer: DeviationAnalyzer,
    builder: CorrectionModelBuilder,
    store: Arc<CalibrationStore>,
    chart: Option<ReferenceChart>,
    capture: Option<TaggedImage>,
    candidate: Option<Candidate>,
    events: broadcast::Sender<WizardEvent>,
    on_activated: Option<ActivationHook>,
    slot: Option<SessionSlot>,
}

impl CalibrationWizard {
    /// Create a wizard in the Idle state
    ///
    /// # Arguments
    /// * `config` - Fitting and chart parameters
    /// * `store` - Where accepted profiles are saved
    /// * `sampler` - Measures swatch colors in captures
    /// * `preset` - Profile name to save under (`default` when `None`)
    ///
    /// # Errors
    /// `Persistence(InvalidProfileName)` for an unusable preset name and
    /// `InvalidSample` for an unusable chart configuration.
    pub fn new(
        config: &AppConfig,
        store: Arc<CalibrationStore>,
        sampler: Arc<dyn ScreenshotSampler>,
        preset: Option<String>,
    ) -> Result<Self, CalibrationError> {
        let profile_name = preset.unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string());
        validate_name(&profile_name)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            state: WizardState::Idle,
            profile_name,
            chart_generator: ReferenceChartGenerator::new(config.chart.clone())?,
            sampler,
            analyzer: DeviationAnalyzer::from(&config.calibration),
            builder: CorrectionModelBuilder::new(BuilderConfig::from(&config.calibration)),
            store,
            chart: None,
            capture: None,
            candidate: None,
            events,
            on_activated: None,
            slot: None,
        })
    }

    /// Run `hook` whenever this wizard activates a profile
    pub fn with_activation_hook(mut self, hook: ActivationHook) -> Self {
        self.on_activated = Some(hook);
        self
    }

    pub(crate) fn with_session_slot(mut self, slot: SessionSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn chart(&self) -> Option<&ReferenceChart> {
        self.chart.as_ref()
    }

    /// Fit result awaiting review or acceptance
    pub fn candidate(&self) -> Option<&FitOutcome> {
        self.candidate.as_ref().map(|c| &c.outcome)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WizardEvent> {
        self.events.subscribe()
    }

    /// Idle -> ChartGenerated
    pub fn generate_chart(&mut self) -> Result<&ReferenceChart, CalibrationError> {
        self.expect_state(&[WizardState::Idle], "generate chart")?;
        let chart = self.chart_generator.generate();
        self.transition(WizardState::ChartGenerated);
        let chart = self.chart.insert(chart);
        Ok(&*chart)
    }

    /// ChartGenerated | Captured -> Captured
    ///
    /// A rejected image leaves the state and any earlier capture unchanged.
    pub fn submit_capture(&mut self, image: TaggedImage) -> Result<(), CalibrationError> {
        self.expect_state(
            &[WizardState::ChartGenerated, WizardState::Captured],
            "submit capture",
        )?;
        let chart_fingerprint = self
            .chart
            .as_ref()
            .map(|c| c.fingerprint.as_str())
            .unwrap_or_default();

        let rejection = if image.source == ImageSource::ReferenceChart {
            Some("image is tagged as the generated reference chart")
        } else if image.fingerprint() == chart_fingerprint {
            Some("image is identical to the generated reference chart")
        } else {
            None
        };
        if let Some(reason) = rejection {
            let err = CalibrationError::WrongImageSource {
                reason: reason.to_string(),
            };
            log_calibration_error(&err, "CalibrationWizard::submit_capture");
            self.publish(WizardEvent::CaptureRejected {
                reason: reason.to_string(),
            });
            return Err(err);
        }

        self.capture = Some(image);
        self.candidate = None;
        if self.state != WizardState::Captured {
            self.transition(WizardState::Captured);
        }
        Ok(())
    }

    /// Captured -> Analyzed
    ///
    /// On failure the wizard stays Captured so a new capture can be
    /// submitted.
    pub fn analyze(&mut self) -> Result<&FitOutcome, CalibrationError> {
        let job = self.analysis_job()?;
        let result = job.run(None);
        self.finish_analysis(result)
    }

    /// Captured -> Analyzed on a blocking worker
    ///
    /// Cancelling `cancel` at any point aborts the wizard and discards
    /// whatever the worker produced.
    pub async fn analyze_offloaded(
        &mut self,
        cancel: CancelToken,
    ) -> Result<&FitOutcome, CalibrationError> {
        let job = self.analysis_job()?;
        if cancel.is_cancelled() {
            return self.cancel_analysis();
        }

        let worker_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || job.run(Some(&worker_cancel)));

        let joined = tokio::select! {
            _ = cancel.cancelled() => return self.cancel_analysis(),
            joined = handle => joined,
        };
        if cancel.is_cancelled() {
            return self.cancel_analysis();
        }

        match joined {
            Ok(Err(CalibrationError::Cancelled)) => self.cancel_analysis(),
            Ok(result) => self.finish_analysis(result),
            Err(join_err) => {
                tracing::error!("[CalibrationWizard] Analysis worker failed: {}", join_err);
                let err = CalibrationError::StatePoisoned;
                log_calibration_error(&err, "CalibrationWizard::analyze_offloaded");
                Err(err)
            }
        }
    }

    /// Analyzed -> Reviewed
    pub fn review(&mut self) -> Result<ReviewSummary, CalibrationError> {
        self.expect_state(&[WizardState::Analyzed, WizardState::Reviewed], "review")?;
        let Some(candidate) = self.candidate.as_ref() else {
            return Err(self.invalid_transition("review"));
        };

        let model = &candidate.outcome.model;
        let summary = ReviewSummary {
            profile_name: self.profile_name.clone(),
            residual_error: model.residual_error(),
            per_channel_residual: model.per_channel_residual(),
            quality: candidate.outcome.quality,
            low_quality: candidate.outcome.low_quality,
            method: model.method(),
            warning: candidate.outcome.warning.as_ref().map(|w| w.to_string()),
            deviations: candidate.deviations.swatches.clone(),
            before_after: candidate.validation.swatches.clone(),
            improvement_percent: candidate.validation.improvement_percent,
            recommendations: candidate.deviations.recommendations.clone(),
        };

        if self.state == WizardState::Analyzed {
            self.transition(WizardState::Reviewed);
        }
        Ok(summary)
    }

    /// Reviewed -> Applied: save the profile and make it active
    ///
    /// # Errors
    /// * `LowQualityModel` - nothing saved; use `save_pending` or `reject`
    /// * `Persistence` - storage failed; the wizard stays Reviewed
    pub fn accept(&mut self) -> Result<WizardOutcome, CalibrationError> {
        self.expect_state(&[WizardState::Reviewed], "accept")?;
        let profile = self.candidate_profile()?;

        if let Some(candidate) = &self.candidate {
            if candidate.outcome.low_quality {
                let err = CalibrationError::LowQualityModel {
                    residual: candidate.outcome.model.per_channel_residual(),
                    threshold: self.builder.config().quality_threshold,
                };
                log_calibration_error(&err, "CalibrationWizard::accept");
                return Err(err);
            }
        }

        if let Err(err) = self.store.save_and_activate(&profile) {
            log_calibration_error(&err, "CalibrationWizard::accept");
            return Err(err);
        }

        if let Some(hook) = &self.on_activated {
            hook(&profile);
        }
        self.publish(WizardEvent::ProfileSaved {
            name: profile.name.clone(),
            activated: true,
        });
        self.transition(WizardState::Applied);
        Ok(WizardOutcome::Activated {
            profile_name: profile.name,
        })
    }

    /// Reviewed -> Applied: save the profile without activating it
    ///
    /// # Errors
    /// `Persistence(ProfileIsActive)` when the profile name is the active
    /// profile; the wizard stays Reviewed and can be retried under another
    /// preset name.
    pub fn save_pending(&mut self) -> Result<WizardOutcome, CalibrationError> {
        self.expect_state(&[WizardState::Reviewed], "save pending profile")?;
        let profile = self.candidate_profile()?;

        if let Err(err) = self.store.save_pending(&profile) {
            log_calibration_error(&err, "CalibrationWizard::save_pending");
            return Err(err);
        }

        self.publish(WizardEvent::ProfileSaved {
            name: profile.name.clone(),
            activated: false,
        });
        self.transition(WizardState::Applied);
        Ok(WizardOutcome::SavedPending {
            profile_name: profile.name,
        })
    }

    /// Reviewed -> Aborted, nothing persisted
    pub fn reject(&mut self) -> Result<(), CalibrationError> {
        self.expect_state(&[WizardState::Reviewed], "reject")?;
        self.candidate = None;
        self.transition(WizardState::Aborted);
        Ok(())
    }

    /// Any non-terminal state -> Aborted
    pub fn abort(&mut self) -> Result<(), CalibrationError> {
        if self.state.is_terminal() {
            return Err(self.invalid_transition("abort"));
        }
        self.capture = None;
        self.candidate = None;
        self.transition(WizardState::Aborted);
        Ok(())
    }

    fn analysis_job(&self) -> Result<AnalysisJob, CalibrationError> {
        self.expect_state(&[WizardState::Captured], "analyze")?;
        let (Some(capture), Some(chart)) = (self.capture.as_ref(), self.chart.as_ref()) else {
            return Err(self.invalid_transition("analyze"));
        };
        Ok(AnalysisJob {
            sampler: self.sampler.clone(),
            analyzer: self.analyzer,
            builder: self.builder.clone(),
            capture: capture.clone(),
            swatches: chart.swatches.clone(),
        })
    }

    fn finish_analysis(
        &mut self,
        result: Result<Candidate, CalibrationError>,
    ) -> Result<&FitOutcome, CalibrationError> {
        match result {
            Ok(candidate) => {
                self.transition(WizardState::Analyzed);
                Ok(&self.candidate.insert(candidate).outcome)
            }
            Err(err) => {
                log_calibration_error(&err, "CalibrationWizard::analyze");
                self.publish(WizardEvent::AnalysisFailed {
                    code: err.code(),
                    message: err.message(),
                });
                Err(err)
            }
        }
    }

    fn cancel_analysis<T>(&mut self) -> Result<T, CalibrationError> {
        tracing::info!("[CalibrationWizard] Analysis cancelled, aborting session");
        self.capture = None;
        self.candidate = None;
        self.transition(WizardState::Aborted);
        Err(CalibrationError::Cancelled)
    }

    fn candidate_profile(&self) -> Result<CalibrationProfile, CalibrationError> {
        let candidate = self
            .candidate
            .as_ref()
            .ok_or_else(|| self.invalid_transition("save profile"))?;
        Ok(CalibrationProfile::new(
            self.profile_name.clone(),
            candidate.outcome.model.clone(),
        )?)
    }

    fn expect_state(
        &self,
        allowed: &[WizardState],
        action: &'static str,
    ) -> Result<(), CalibrationError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid_transition(action))
        }
    }

    fn invalid_transition(&self, action: &'static str) -> CalibrationError {
        CalibrationError::InvalidTransition {
            state: self.state,
            action,
        }
    }

    fn transition(&mut self, to: WizardState) {
        let from = self.state;
        self.state = to;
        tracing::info!("[CalibrationWizard] {:?} -> {:?}", from, to);
        self.publish(WizardEvent::StateChanged { from, to });
        if to.is_terminal() {
            self.slot = None;
        }
    }

    fn publish(&self, event: WizardEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

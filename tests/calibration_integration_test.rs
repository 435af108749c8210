//! Integration tests for the calibration workflow
//!
//! These tests drive the public API end to end:
//! - Manager-owned wizard sessions from chart to active profile
//! - Rejection of the reference chart submitted as a capture
//! - Low-quality fits that must never become active
//! - Correction of the recorded field observations
//! - Applier output bounds for arbitrary models

use std::sync::Arc;

use color_calibration::calibration::{
    CalibrationStore, CorrectionApplier, CorrectionModel, CorrectionModelBuilder, FitMethod,
    MemoryBackend, WizardEvent, WizardOutcome, WizardState,
};
use color_calibration::fixtures::{field_sample_pairs, Distortion};
use color_calibration::image::{ImageSource, RgbImage, TaggedImage};
use color_calibration::{AppConfig, CalibrationError, CalibrationManager, Rgb, StoreError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn memory_manager() -> (CalibrationManager, Arc<CalibrationStore>) {
    let store = Arc::new(CalibrationStore::new(MemoryBackend::new()));
    let manager = CalibrationManager::new(AppConfig::default(), Arc::clone(&store));
    (manager, store)
}

/// Full session through the manager against a distorted capture
#[test]
fn test_wizard_session_corrects_distorted_display() {
    let (manager, store) = memory_manager();
    let distortion = Distortion::display_shift();

    let mut wizard = manager.start_wizard(Some("office".to_string())).unwrap();
    let chart = wizard.generate_chart().unwrap().clone();
    wizard
        .submit_capture(distortion.capture(&chart.image.image))
        .unwrap();
    wizard.analyze().unwrap();

    let summary = wizard.review().unwrap();
    assert!(!summary.low_quality);
    assert!(summary.warning.is_none());
    assert_eq!(summary.before_after.len(), chart.swatches.len());
    assert!(summary.improvement_percent > 50.0);

    let outcome = wizard.accept().unwrap();
    assert_eq!(
        outcome,
        WizardOutcome::Activated {
            profile_name: "office".to_string()
        }
    );
    assert_eq!(wizard.state(), WizardState::Applied);

    // Persisted and live
    assert_eq!(store.active().unwrap().unwrap().name, "office");
    assert_eq!(manager.active_profile_name().as_deref(), Some("office"));

    for color in [
        Rgb::new(0, 0, 255),
        Rgb::new(200, 40, 90),
        Rgb::gray(60),
        Rgb::new(10, 240, 10),
    ] {
        let corrected = manager.correct(distortion.apply(color));
        assert!(
            corrected.distance(color) <= 3.5,
            "{} corrected to {}",
            color,
            corrected
        );
    }
}

#[test]
fn test_wizard_events_follow_transitions() {
    let (manager, _store) = memory_manager();
    let mut wizard = manager.start_wizard(None).unwrap();
    let mut events = wizard.subscribe();

    let chart = wizard.generate_chart().unwrap().clone();
    wizard
        .submit_capture(Distortion::display_shift().capture(&chart.image.image))
        .unwrap();
    wizard.analyze().unwrap();
    wizard.review().unwrap();
    wizard.accept().unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    let changed = |from, to| WizardEvent::StateChanged { from, to };
    assert_eq!(
        received,
        vec![
            changed(WizardState::Idle, WizardState::ChartGenerated),
            changed(WizardState::ChartGenerated, WizardState::Captured),
            changed(WizardState::Captured, WizardState::Analyzed),
            changed(WizardState::Analyzed, WizardState::Reviewed),
            WizardEvent::ProfileSaved {
                name: "default".to_string(),
                activated: true,
            },
            changed(WizardState::Reviewed, WizardState::Applied),
        ]
    );
}

#[test]
fn test_reference_chart_submitted_as_capture_is_rejected() {
    let (manager, store) = memory_manager();
    let mut wizard = manager.start_wizard(None).unwrap();
    let chart = wizard.generate_chart().unwrap().clone();

    // Tagged as the chart
    let result = wizard.submit_capture(chart.image.clone());
    match result.unwrap_err() {
        CalibrationError::WrongImageSource { .. } => {}
        other => panic!("Expected WrongImageSource, got {:?}", other),
    }

    // Identical pixels, tagged as a capture
    let result = wizard.submit_capture(TaggedImage::new(
        ImageSource::UserCapture,
        chart.image.image.clone(),
    ));
    match result.unwrap_err() {
        CalibrationError::WrongImageSource { .. } => {}
        other => panic!("Expected WrongImageSource, got {:?}", other),
    }

    assert_eq!(wizard.state(), WizardState::ChartGenerated);
    assert!(store.list().unwrap().is_empty());
    assert!(!manager.is_calibrated());
}

#[test]
fn test_low_quality_fit_is_never_activated() {
    let (manager, store) = memory_manager();
    let mut wizard = manager.start_wizard(Some("washed".to_string())).unwrap();
    let chart = wizard.generate_chart().unwrap().clone();

    // Every swatch measures the same gray: nothing can be recovered
    let flat = RgbImage::filled(chart.image.image.width(), chart.image.image.height(), Rgb::gray(128));
    wizard.submit_capture(TaggedImage::capture(flat)).unwrap();
    let outcome = wizard.analyze().unwrap();
    assert!(outcome.low_quality);
    assert_eq!(outcome.model.method(), FitMethod::MeanOffsetFallback);

    let summary = wizard.review().unwrap();
    assert!(summary.low_quality);
    assert!(summary.warning.is_some());

    match wizard.accept().unwrap_err() {
        CalibrationError::LowQualityModel { residual, threshold } => {
            assert!(residual > threshold);
        }
        other => panic!("Expected LowQualityModel, got {:?}", other),
    }
    assert_eq!(wizard.state(), WizardState::Reviewed);
    assert!(store.list().unwrap().is_empty());

    // Saved for inspection, but activation is refused
    wizard.save_pending().unwrap();
    let summaries = store.list().unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].low_quality);
    assert!(!summaries[0].active);

    match store.set_active("washed").unwrap_err() {
        CalibrationError::LowQualityModel { .. } => {}
        other => panic!("Expected LowQualityModel, got {:?}", other),
    }
    assert!(store.active().unwrap().is_none());
    assert!(!manager.reload());
}

/// A poor recalibration under the active name must not displace the good one
#[test]
fn test_pending_save_keeps_active_profile() {
    let (manager, store) = memory_manager();
    let distortion = Distortion::display_shift();

    let mut first = manager.start_wizard(Some("office".to_string())).unwrap();
    let chart = first.generate_chart().unwrap().clone();
    first
        .submit_capture(distortion.capture(&chart.image.image))
        .unwrap();
    first.analyze().unwrap();
    first.review().unwrap();
    first.accept().unwrap();
    let good = store.active().unwrap().unwrap();

    let mut second = manager.start_wizard(Some("office".to_string())).unwrap();
    let chart = second.generate_chart().unwrap().clone();
    let flat = RgbImage::filled(chart.image.image.width(), chart.image.image.height(), Rgb::gray(128));
    second.submit_capture(TaggedImage::capture(flat)).unwrap();
    assert!(second.analyze().unwrap().low_quality);
    second.review().unwrap();

    match second.save_pending().unwrap_err() {
        CalibrationError::Persistence(StoreError::ProfileIsActive { name }) => {
            assert_eq!(name, "office");
        }
        other => panic!("Expected ProfileIsActive, got {:?}", other),
    }
    assert_eq!(second.state(), WizardState::Reviewed);

    // The stored profile and the live correction are the good ones
    assert!(manager.reload());
    assert_eq!(store.active().unwrap(), Some(good));
    assert_eq!(manager.active_profile_name().as_deref(), Some("office"));
    let color = Rgb::new(200, 40, 90);
    assert!(manager.correct(distortion.apply(color)).distance(color) <= 3.5);
}

#[test]
fn test_rejected_session_persists_nothing() {
    let (manager, store) = memory_manager();
    let mut wizard = manager.start_wizard(None).unwrap();
    let chart = wizard.generate_chart().unwrap().clone();
    wizard
        .submit_capture(Distortion::display_shift().capture(&chart.image.image))
        .unwrap();
    wizard.analyze().unwrap();
    wizard.review().unwrap();
    wizard.reject().unwrap();

    assert_eq!(wizard.state(), WizardState::Aborted);
    assert!(store.list().unwrap().is_empty());

    // Terminal states release the slot even while the wizard is alive
    assert!(manager.start_wizard(None).is_ok());
}

#[test]
fn test_out_of_order_operation_keeps_state() {
    let (manager, _store) = memory_manager();
    let mut wizard = manager.start_wizard(None).unwrap();

    match wizard.analyze().unwrap_err() {
        CalibrationError::InvalidTransition { state, .. } => {
            assert_eq!(state, WizardState::Idle);
        }
        other => panic!("Expected InvalidTransition, got {:?}", other),
    }
    assert_eq!(wizard.state(), WizardState::Idle);

    wizard.abort().unwrap();
    assert!(wizard.abort().is_err());
}

#[test]
fn test_invalid_preset_name_rejected() {
    let (manager, _store) = memory_manager();
    match manager.start_wizard(Some("  ".to_string())) {
        Err(CalibrationError::Persistence(StoreError::InvalidProfileName { .. })) => {}
        Err(other) => panic!("Expected InvalidProfileName, got {:?}", other),
        Ok(_) => panic!("Expected InvalidProfileName, got a wizard"),
    }
    // A failed start does not hold the slot
    assert!(manager.start_wizard(None).is_ok());
}

/// The recorded field shifts are corrected to within 2/255 per channel
#[test]
fn test_field_observations_corrected() {
    let pairs = field_sample_pairs();
    let outcome = CorrectionModelBuilder::default().fit(&pairs).unwrap();
    assert!(outcome.warning.is_none());
    assert!(!outcome.low_quality);

    for pair in &pairs {
        let corrected = outcome.model.apply(pair.measured).to_bytes();
        let expected = pair.expected.to_bytes();
        for channel in 0..3 {
            let diff = (corrected[channel] as i16 - expected[channel] as i16).abs();
            assert!(
                diff <= 2,
                "swatch {} channel {}: corrected {:?}, expected {:?}",
                pair.swatch_id,
                channel,
                corrected,
                expected
            );
        }
    }
}

#[test]
fn test_field_observations_need_four_independent_swatches() {
    let pairs = field_sample_pairs();
    match CorrectionModelBuilder::default().fit(&pairs[..3]).unwrap_err() {
        CalibrationError::InsufficientSwatches {
            required,
            collected,
            ..
        } => {
            assert_eq!(required, 4);
            assert_eq!(collected, 3);
        }
        other => panic!("Expected InsufficientSwatches, got {:?}", other),
    }
}

#[test]
fn test_applier_output_always_in_range() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..200 {
        let mut matrix = [[0.0; 3]; 3];
        for row in matrix.iter_mut() {
            for value in row.iter_mut() {
                *value = rng.gen_range(-3.0..3.0);
            }
        }
        let offset = [
            rng.gen_range(-300.0..300.0),
            rng.gen_range(-300.0..300.0),
            rng.gen_range(-300.0..300.0),
        ];
        let model = CorrectionModel::new(matrix, offset, Vec::new(), FitMethod::LeastSquares)
            .unwrap();
        let applier = CorrectionApplier::new(Arc::new(model));

        for _ in 0..20 {
            let measured = Rgb::new(rng.gen(), rng.gen(), rng.gen());
            // u8 channels are in range by construction; the call must not panic
            let _ = applier.correct(measured);

            let normalized = applier.correct_normalized(measured.to_normalized());
            assert!(
                normalized.iter().all(|v| (0.0..=1.0).contains(v)),
                "{:?} out of range",
                normalized
            );
        }
    }
}

#[test]
fn test_identity_applier_is_noop() {
    let mut rng = StdRng::seed_from_u64(7);
    let identity = CorrectionApplier::identity();
    let fitted_identity = CorrectionApplier::new(Arc::new(CorrectionModel::identity()));

    for _ in 0..500 {
        let color = Rgb::new(rng.gen(), rng.gen(), rng.gen());
        assert_eq!(identity.correct(color), color);
        assert_eq!(fitted_identity.correct(color), color);
    }
}

//! E2E tests for persistent session configuration
//!
//! Tests config round-trip, defaults, validation on load and the engine's
//! handling of config edits.

use approx::assert_relative_eq;
use phase_control::analysis::corrector::Sign;
use phase_control::analysis::params::ConfigError;
use phase_control::config::{ConfigFileError, SessionConfig};
use phase_control::control::actuator::DryRunActuator;
use phase_control::stream::protocol::StreamMeta;
use phase_control::{AnalysisEngine, ChirpedFringeModel, FrameBuffer};
use std::sync::Arc;

fn meta() -> StreamMeta {
    StreamMeta {
        device_index: 0,
        num_pixels: 16,
        wavelengths: None,
        exposure_ms: 1.0,
        average: 1,
        dark_subtraction: false,
    }
}

#[test]
fn test_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phase-control").join("config.json");

    let mut config = SessionConfig::default();
    config.analysis.set_avg_spectra(6).unwrap();
    config.analysis.set_wavelength_range_nm(801.0, 804.5).unwrap();
    config.analysis.set_residuals_threshold(2.5).unwrap();
    config.corrector.sign = Sign::Negative;
    config.corrector.gain = 0.8;
    config.actuator.device_id = "ell14-3".to_string();
    config.actuator.travel_limit_rad = Some(3.0);
    config.control.step_interval_ms = 30;

    config.save(&path).unwrap();
    let loaded = SessionConfig::load(&path).unwrap();

    assert_eq!(loaded.analysis.avg_spectra(), 6);
    assert_relative_eq!(loaded.analysis.wavelength_range().start().nanometers(), 801.0);
    assert_relative_eq!(loaded.analysis.wavelength_range().end().nanometers(), 804.5);
    assert_relative_eq!(loaded.analysis.residuals_threshold(), 2.5);
    assert_relative_eq!(
        loaded.analysis.params.acceleration,
        config.analysis.params.acceleration,
        max_relative = 1e-12
    );
    assert_eq!(loaded.corrector.sign, Sign::Negative);
    assert_relative_eq!(loaded.corrector.gain, 0.8);
    assert_eq!(loaded.actuator.device_id, "ell14-3");
    assert_eq!(loaded.actuator.travel_limit_rad, Some(3.0));
    assert_eq!(loaded.control.step_interval_ms, 30);
}

#[test]
fn test_saved_file_uses_operator_units() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    SessionConfig::default().save(&path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_relative_eq!(json["analysis"]["carrier_wavelength"].as_f64().unwrap(), 802.38, epsilon = 1e-9);
    assert_relative_eq!(
        json["analysis"]["wavelength_range"]["start"].as_f64().unwrap(),
        800.0,
        epsilon = 1e-9
    );
    assert_eq!(json["corrector"]["sign"], "positive");
    assert_eq!(json["actuator"]["dry_run"], true);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"analysis": {"phase": 1.5, "avg_spectra": 3}}"#).unwrap();

    let loaded = SessionConfig::load(&path).unwrap();
    assert_relative_eq!(loaded.analysis.params.phase.radians(), 1.5);
    assert_eq!(loaded.analysis.avg_spectra(), 3);
    assert_relative_eq!(loaded.analysis.params.bandwidth.nanometers(), 7.4728, epsilon = 1e-9);
    assert_eq!(loaded.control.idle_interval_ms, 50);
}

#[test]
fn test_invalid_deadband_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"corrector": {"deadband_rad": -0.5}}"#).unwrap();

    let err = SessionConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigFileError::Invalid(ConfigError::Deadband(_))));
}

#[test]
fn test_garbage_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "not json at all").unwrap();

    assert!(matches!(SessionConfig::load(&path), Err(ConfigFileError::Parse { .. })));
    assert_eq!(SessionConfig::load_or_default(&path), SessionConfig::default());
}

#[test]
fn test_engine_rejects_invalid_edit_and_keeps_config() {
    let session = SessionConfig::default();
    let mut engine = AnalysisEngine::new(
        Arc::new(FrameBuffer::new(meta())),
        ChirpedFringeModel,
        DryRunActuator::new("dry"),
        session.analysis.clone(),
        session.corrector,
    )
    .unwrap();

    let mut edited = engine.config();
    assert!(edited.set_avg_spectra(0).is_err());
    edited.set_avg_spectra(4).unwrap();
    edited.params.baseline = 0.2;

    engine.reset_with(edited.clone()).unwrap();
    assert_eq!(engine.config(), edited);
}

#[test]
fn test_engine_rejects_invalid_corrector() {
    let mut session = SessionConfig::default();
    session.corrector.gain = f64::NAN;

    let result = AnalysisEngine::new(
        Arc::new(FrameBuffer::new(meta())),
        ChirpedFringeModel,
        DryRunActuator::new("dry"),
        session.analysis.clone(),
        session.corrector,
    );
    assert!(matches!(result, Err(ConfigError::Gain(_))));
}

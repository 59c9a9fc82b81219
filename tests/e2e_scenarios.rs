//! E2E tests for the reference scenarios of the loop components
//!
//! Covers spectrum decoding and normalization, window acceptance,
//! deadband correction, latest-value buffering and the averaging and
//! wrapping properties the loop relies on.

use approx::assert_abs_diff_eq;
use phase_control::analysis::corrector::{CorrectorConfig, PhaseCorrector};
use phase_control::analysis::params::{Field, FitParameters, FIELDS};
use phase_control::analysis::tracker::{PhaseTracker, TrackerState, WindowOutcome};
use phase_control::stream::buffer::FrameBuffer;
use phase_control::stream::protocol::{polynomial_axis, StreamFrame, StreamMeta, StreamReader};
use phase_control::units::{wrap_angle, Angle};
use phase_control::{AnalysisConfig, ChirpedFringeModel};
use std::f64::consts::{PI, TAU};
use std::io::Cursor;

fn fit(phase: f64, residual: f64) -> FitParameters {
    FitParameters {
        phase: Angle::from_radians(phase),
        residual,
        ..Default::default()
    }
}

#[test]
fn test_scenario_a_linear_calibration_and_normalization() {
    let meta = StreamMeta {
        device_index: 0,
        num_pixels: 4,
        wavelengths: Some(polynomial_axis(&[0.0, 1.0], 4)),
        exposure_ms: 20.0,
        average: 1,
        dark_subtraction: false,
    };
    let text = format!(
        "{}\n{}\n",
        serde_json::to_string(&serde_json::json!({
            "type": "meta",
            "device_index": meta.device_index,
            "num_pixels": meta.num_pixels,
            "wavelengths": meta.wavelengths,
            "exposure_ms": 20,
            "average": 1,
            "dark_subtraction": 0,
        }))
        .unwrap(),
        r#"{"type":"frame","timestamp":"2024-05-01T12:00:00.500000","device_index":0,"counts":[10,20,15,5]}"#
    );

    let mut reader = StreamReader::open(Cursor::new(text.into_bytes())).unwrap();
    assert_eq!(reader.meta(), &meta);

    let frame = reader.next().unwrap();
    let spectrum = reader.meta().spectrum(&frame).unwrap();

    assert_eq!(spectrum.wavelengths_nm(), &[0.0, 1.0, 2.0, 3.0]);
    let expected = [0.333, 1.0, 0.667, 0.0];
    for (got, want) in spectrum.intensity().iter().zip(expected) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-3);
    }
}

#[test]
fn test_scenario_b_window_commits() {
    let mut tracker = PhaseTracker::new(ChirpedFringeModel);
    let mut config = AnalysisConfig::default();
    config.set_avg_spectra(3).unwrap();
    config.set_residuals_threshold(5.0).unwrap();

    assert!(tracker.estimate().is_none());
    tracker.push_fit(fit(0.1, 2.0), &mut config);
    tracker.push_fit(fit(0.2, 3.0), &mut config);
    let outcome = tracker.push_fit(fit(0.3, 4.0), &mut config);

    let WindowOutcome::Committed(estimate) = outcome else {
        panic!("window should commit, got {outcome:?}");
    };
    assert_abs_diff_eq!(estimate.mean_residual, 3.0, epsilon = 1e-12);
    assert_eq!(tracker.window_len(), 0);
    assert_eq!(tracker.state(), TrackerState::Converged);
    assert_eq!(tracker.estimate(), Some(&estimate));
}

#[test]
fn test_window_above_threshold_keeps_estimate_and_empties() {
    let mut tracker = PhaseTracker::new(ChirpedFringeModel);
    let mut config = AnalysisConfig::default();
    config.set_avg_spectra(2).unwrap();
    config.set_residuals_threshold(5.0).unwrap();

    tracker.push_fit(fit(1.0, 1.0), &mut config);
    tracker.push_fit(fit(1.0, 1.0), &mut config);
    let held = *tracker.estimate().unwrap();

    tracker.push_fit(fit(-1.0, 6.0), &mut config);
    let outcome = tracker.push_fit(fit(-1.0, 7.0), &mut config);

    assert!(matches!(outcome, WindowOutcome::Rejected { .. }));
    assert_eq!(tracker.estimate(), Some(&held));
    assert_eq!(tracker.window_len(), 0);
}

#[test]
fn test_scenario_c_deadband_hysteresis() {
    let config = CorrectorConfig {
        deadband_rad: 10f64.to_radians(),
        gain: 1.0,
        ..Default::default()
    };
    let mut corrector = PhaseCorrector::new(config, TAU)
        .unwrap()
        .with_reference(Angle::ZERO);

    let commands: Vec<_> = [2.0, 8.0, 15.0]
        .into_iter()
        .map(|deg| corrector.update(Angle::from_degrees(deg)))
        .collect();

    assert!(commands[0].is_zero());
    assert!(commands[1].is_zero());
    assert!(!commands[2].is_zero());
    assert_abs_diff_eq!(corrector.reference().unwrap().degrees(), 15.0, epsilon = 1e-9);
}

#[test]
fn test_deadband_sequence_never_moves_reference() {
    let config = CorrectorConfig {
        deadband_rad: 0.2,
        ..Default::default()
    };
    let mut corrector = PhaseCorrector::new(config, TAU)
        .unwrap()
        .with_reference(Angle::from_radians(1.0));

    for i in 0..50 {
        let jitter = 0.19 * ((i as f64) * 0.7).sin();
        let command = corrector.update(Angle::from_radians(1.0 + jitter));
        assert!(command.is_zero());
    }
    assert_eq!(corrector.reference(), Some(Angle::from_radians(1.0)));
}

#[test]
fn test_buffer_returns_nth_update() {
    let meta = StreamMeta {
        device_index: 0,
        num_pixels: 1,
        wavelengths: None,
        exposure_ms: 1.0,
        average: 1,
        dark_subtraction: false,
    };
    let buffer = FrameBuffer::new(meta);
    assert!(buffer.get_latest().is_none());

    for n in 1..=25u32 {
        buffer.update(StreamFrame {
            timestamp: Default::default(),
            device_index: 0,
            counts: vec![n],
        });
        let latest = buffer.get_latest().unwrap();
        assert_eq!(latest.frame.counts, vec![n]);
        assert_eq!(buffer.get_latest().unwrap(), latest);
    }
}

#[test]
fn test_mean_properties() {
    let a = fit(0.1, 1.0);
    let b = FitParameters {
        baseline: 0.2,
        ..fit(0.5, 2.0)
    };
    let c = FitParameters {
        acceleration: 0.4,
        ..fit(-0.3, 3.0)
    };

    let single = FitParameters::mean(&[b]).unwrap();
    let abc = FitParameters::mean(&[a, b, c]).unwrap();
    let cba = FitParameters::mean(&[c, b, a]).unwrap();
    let same = FitParameters::mean(&[c, c, c]).unwrap();

    for spec in FIELDS.iter() {
        assert_abs_diff_eq!(single.get(spec.field), b.get(spec.field), epsilon = 1e-9);
        assert_abs_diff_eq!(abc.get(spec.field), cba.get(spec.field), epsilon = 1e-9);
        assert_abs_diff_eq!(same.get(spec.field), c.get(spec.field), epsilon = 1e-9);
    }
    assert_abs_diff_eq!(abc.get(Field::Residual), 2.0, epsilon = 1e-12);
}

#[test]
fn test_wrap_properties() {
    for period in [TAU, PI] {
        for i in -20..=20 {
            let v = i as f64 * 0.37;
            let once = wrap_angle(v, period);
            assert_abs_diff_eq!(wrap_angle(once, period), once, epsilon = 1e-12);
            assert_abs_diff_eq!(wrap_angle(v + 3.0 * period, period), once, epsilon = 1e-9);
            assert!(once >= -period / 2.0 && once < period / 2.0);
        }
    }
}

//! Hysteretic phase corrector
//!
//! Turns committed phase estimates into actuator commands. A reference phase
//! marks the last centered value; only excursions beyond the deadband move
//! the actuator, and each such excursion re-centers the reference.

use super::params::ConfigError;
use crate::units::Angle;
use serde::{Deserialize, Serialize};

/// Direction of the phase-to-actuator transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    #[default]
    Positive,
    Negative,
}

impl Sign {
    fn factor(self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }
}

/// Corrector calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    /// Half-width of the tolerance band around the reference, radians
    pub deadband_rad: f64,
    /// Actuator radians per phase radian
    pub gain: f64,
    /// Transfer direction
    pub sign: Sign,
    /// Initial reference; `None` latches the first estimate
    pub reference_rad: Option<f64>,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            deadband_rad: 0.1,
            gain: 0.5,
            sign: Sign::Positive,
            reference_rad: None,
        }
    }
}

impl CorrectorConfig {
    /// Check the calibration against a model phase period
    pub fn validate(&self, period: f64) -> Result<(), ConfigError> {
        if !(self.deadband_rad.is_finite() && self.deadband_rad >= 0.0 && self.deadband_rad < period / 2.0) {
            return Err(ConfigError::Deadband(self.deadband_rad));
        }
        if !(self.gain.is_finite() && self.gain != 0.0) {
            return Err(ConfigError::Gain(self.gain));
        }
        Ok(())
    }
}

/// Actuator command for one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionCommand {
    /// Angle to move the actuator by; zero inside the deadband
    pub angle: Angle,
    /// Wrapped phase error that produced the command
    pub error: Angle,
    /// Reference after this update
    pub reference: Angle,
}

impl CorrectionCommand {
    /// Zero command holding `reference`
    pub fn hold(reference: Angle) -> Self {
        Self {
            angle: Angle::ZERO,
            error: Angle::ZERO,
            reference,
        }
    }

    /// Whether the command moves the actuator
    pub fn is_zero(&self) -> bool {
        self.angle.radians() == 0.0
    }
}

/// Deadband corrector with a moving reference
///
/// # Example
/// ```
/// use phase_control_core::analysis::corrector::{CorrectorConfig, PhaseCorrector};
/// use phase_control_core::units::Angle;
/// use std::f64::consts::TAU;
///
/// let config = CorrectorConfig { deadband_rad: 0.2, ..Default::default() };
/// let mut corrector = PhaseCorrector::new(config, TAU).unwrap();
///
/// corrector.update(Angle::from_radians(1.0)); // latches the reference
/// assert!(corrector.update(Angle::from_radians(1.1)).is_zero());
/// assert!(!corrector.update(Angle::from_radians(1.5)).is_zero());
/// ```
#[derive(Debug, Clone)]
pub struct PhaseCorrector {
    config: CorrectorConfig,
    period: f64,
    reference: Option<Angle>,
}

impl PhaseCorrector {
    /// Create a corrector
    ///
    /// # Arguments
    /// * `config` - Deadband, gain and sign
    /// * `period` - Phase period of the spectral model in radians
    pub fn new(config: CorrectorConfig, period: f64) -> Result<Self, ConfigError> {
        config.validate(period)?;
        Ok(Self {
            config,
            period,
            reference: config.reference_rad.map(Angle::from_radians),
        })
    }

    /// Override the reference phase
    pub fn with_reference(mut self, reference: Angle) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Current reference, `None` before the first estimate
    pub fn reference(&self) -> Option<Angle> {
        self.reference
    }

    /// Calibration in use
    pub fn config(&self) -> &CorrectorConfig {
        &self.config
    }

    /// Compute the command for a new phase estimate
    ///
    /// Outside the deadband the command is `sign * gain * error` and the
    /// reference moves to `phase`. Inside it the command is zero and the
    /// reference is kept.
    pub fn update(&mut self, phase: Angle) -> CorrectionCommand {
        let Some(reference) = self.reference else {
            tracing::info!("Corrector reference set to {:.4} rad", phase.radians());
            self.reference = Some(phase);
            return CorrectionCommand::hold(phase);
        };

        let error = (phase - reference).wrapped(self.period);
        if error.abs().radians() <= self.config.deadband_rad {
            return CorrectionCommand {
                angle: Angle::ZERO,
                error,
                reference,
            };
        }

        let angle = Angle::from_radians(self.config.sign.factor() * self.config.gain * error.radians());
        self.reference = Some(phase);
        tracing::debug!(
            "Phase error {:.4} rad outside deadband, correcting by {:.4} rad",
            error.radians(),
            angle.radians()
        );
        CorrectionCommand {
            angle,
            error,
            reference: phase,
        }
    }

    /// Forget the reference; the next estimate latches a new one
    pub fn reset(&mut self) {
        self.reference = self.config.reference_rad.map(Angle::from_radians);
    }
}

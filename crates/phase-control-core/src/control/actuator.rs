//! Actuator collaborators
//!
//! The control loop hands every cycle's [`CorrectionCommand`] to an
//! [`Actuator`]. Range checking and failure reporting belong to the actuator;
//! a refused command is reported back to the loop but never rolls back the
//! corrector.

use crate::analysis::corrector::CorrectionCommand;
use crate::units::Angle;
use thiserror::Error;

/// Errors reported by an actuator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("Move to {requested:.4} rad exceeds travel limit of {limit:.4} rad on {device}")]
    OutOfTravel {
        device: String,
        requested: f64,
        limit: f64,
    },

    #[error("Actuator {device} failed: {message}")]
    Device { device: String, message: String },
}

/// A device that turns correction angles into motion
pub trait Actuator: Send {
    /// Device identifier
    fn device_id(&self) -> &str;

    /// Apply one command; zero commands are valid and expected every cycle
    fn apply(&mut self, command: &CorrectionCommand) -> Result<(), ActuatorError>;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn device_id(&self) -> &str {
        (**self).device_id()
    }

    fn apply(&mut self, command: &CorrectionCommand) -> Result<(), ActuatorError> {
        (**self).apply(command)
    }
}

/// Actuator that only logs what it would do
#[derive(Debug, Clone)]
pub struct DryRunActuator {
    device_id: String,
    total: Angle,
    moves: u64,
    commands: u64,
}

impl DryRunActuator {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            total: Angle::ZERO,
            moves: 0,
            commands: 0,
        }
    }

    /// Sum of all requested angles
    pub fn total(&self) -> Angle {
        self.total
    }

    /// Number of non-zero commands received
    pub fn moves(&self) -> u64 {
        self.moves
    }

    /// Number of commands received, zero commands included
    pub fn commands(&self) -> u64 {
        self.commands
    }
}

impl Actuator for DryRunActuator {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn apply(&mut self, command: &CorrectionCommand) -> Result<(), ActuatorError> {
        self.commands += 1;
        if !command.is_zero() {
            self.moves += 1;
            self.total = Angle::from_radians(self.total.radians() + command.angle.radians());
            tracing::info!(
                "[dry run] {} would move by {:.4} rad ({:.2} deg)",
                self.device_id,
                command.angle.radians(),
                command.angle.degrees()
            );
        }
        Ok(())
    }
}

/// In-memory rotation stage
///
/// Integrates commands into an absolute position and refuses moves past an
/// optional symmetric travel limit. A refused move leaves the position
/// unchanged.
#[derive(Debug, Clone)]
pub struct SimulatedRotator {
    device_id: String,
    position: Angle,
    travel_limit: Option<f64>,
    history: Vec<Angle>,
}

impl SimulatedRotator {
    /// Create a rotator at position zero
    ///
    /// # Arguments
    /// * `device_id` - Identifier reported in errors
    /// * `travel_limit` - Maximum absolute position in radians, `None` for unlimited
    pub fn new(device_id: impl Into<String>, travel_limit: Option<f64>) -> Self {
        Self {
            device_id: device_id.into(),
            position: Angle::ZERO,
            travel_limit,
            history: Vec::new(),
        }
    }

    /// Current absolute position
    pub fn position(&self) -> Angle {
        self.position
    }

    /// Every non-zero move accepted so far
    pub fn history(&self) -> &[Angle] {
        &self.history
    }
}

impl Actuator for SimulatedRotator {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn apply(&mut self, command: &CorrectionCommand) -> Result<(), ActuatorError> {
        if command.is_zero() {
            return Ok(());
        }
        let target = self.position.radians() + command.angle.radians();
        if let Some(limit) = self.travel_limit {
            if target.abs() > limit {
                return Err(ActuatorError::OutOfTravel {
                    device: self.device_id.clone(),
                    requested: target,
                    limit,
                });
            }
        }
        self.position = Angle::from_radians(target);
        self.history.push(command.angle);
        tracing::debug!("{} moved to {:.4} rad", self.device_id, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn command(rad: f64) -> CorrectionCommand {
        CorrectionCommand {
            angle: Angle::from_radians(rad),
            error: Angle::from_radians(rad),
            reference: Angle::ZERO,
        }
    }

    #[test]
    fn test_dry_run_accepts_everything() {
        let mut a = DryRunActuator::new("ell14-0");
        a.apply(&command(0.0)).unwrap();
        a.apply(&command(0.3)).unwrap();
        a.apply(&command(-0.1)).unwrap();
        assert_eq!(a.moves(), 2);
        assert_eq!(a.commands(), 3);
        assert_abs_diff_eq!(a.total().radians(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_rotator_integrates_moves() {
        let mut r = SimulatedRotator::new("sim", None);
        r.apply(&command(0.5)).unwrap();
        r.apply(&command(0.0)).unwrap();
        r.apply(&command(-0.2)).unwrap();
        assert_abs_diff_eq!(r.position().radians(), 0.3, epsilon = 1e-12);
        assert_eq!(r.history().len(), 2);
    }

    #[test]
    fn test_rotator_refuses_out_of_travel() {
        let mut r = SimulatedRotator::new("sim", Some(1.0));
        r.apply(&command(0.8)).unwrap();
        let err = r.apply(&command(0.5)).unwrap_err();

        assert!(matches!(err, ActuatorError::OutOfTravel { limit, .. } if limit == 1.0));
        assert_abs_diff_eq!(r.position().radians(), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_boxed_actuator_delegates() {
        let mut a: Box<dyn Actuator> = Box::new(SimulatedRotator::new("boxed", None));
        a.apply(&command(0.1)).unwrap();
        assert_eq!(a.device_id(), "boxed");
    }
}

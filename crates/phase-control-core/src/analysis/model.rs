//! Parametric spectral models
//!
//! The model is supplied by the caller through [`SpectralModel`]. The crate
//! ships [`ChirpedFringeModel`] as a reference implementation for the
//! binaries and tests.

use super::params::FitParameters;
use std::f64::consts::TAU;

/// A spectral model parameterized by [`FitParameters`]
pub trait SpectralModel: Send {
    /// Short model name for logging
    fn name(&self) -> &str;

    /// Normalized intensity at `wavelength_nm`
    fn evaluate(&self, wavelength_nm: f64, params: &FitParameters) -> f64;

    /// Period of the phase parameter in radians
    ///
    /// Phase differences are wrapped to half this period on either side.
    fn phase_period(&self) -> f64 {
        TAU
    }

    /// Evaluate across a wavelength axis
    fn curve(&self, wavelengths_nm: &[f64], params: &FitParameters) -> Vec<f64> {
        wavelengths_nm
            .iter()
            .map(|&w| self.evaluate(w, params))
            .collect()
    }
}

impl<M: SpectralModel + ?Sized> SpectralModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn evaluate(&self, wavelength_nm: f64, params: &FitParameters) -> f64 {
        (**self).evaluate(wavelength_nm, params)
    }

    fn phase_period(&self) -> f64 {
        (**self).phase_period()
    }
}

/// Gaussian-enveloped, quadratically chirped two-beam fringe pattern
///
/// ```text
/// x        = lambda - starting_wavelength
/// envelope = exp(-((lambda - carrier_wavelength) / bandwidth)^2)
/// I        = baseline + (1 - baseline) * envelope * (1 + cos(phase + acceleration * x^2)) / 2
/// ```
///
/// # Example
/// ```
/// use phase_control_core::analysis::model::{ChirpedFringeModel, SpectralModel};
/// use phase_control_core::analysis::params::FitParameters;
///
/// let model = ChirpedFringeModel;
/// let y = model.evaluate(802.0, &FitParameters::default());
/// assert!((0.0..=1.0).contains(&y));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ChirpedFringeModel;

impl SpectralModel for ChirpedFringeModel {
    fn name(&self) -> &str {
        "chirped-fringe"
    }

    fn evaluate(&self, wavelength_nm: f64, p: &FitParameters) -> f64 {
        let bandwidth = p.bandwidth.nanometers();
        let x = wavelength_nm - p.starting_wavelength.nanometers();
        let u = (wavelength_nm - p.carrier_wavelength.nanometers()) / bandwidth;
        let envelope = (-u * u).exp();
        let fringe = 0.5 * (1.0 + (p.phase.radians() + p.acceleration * x * x).cos());
        p.baseline + (1.0 - p.baseline) * envelope * fringe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Angle;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_phase_is_periodic() {
        let model = ChirpedFringeModel;
        let mut p = FitParameters::default();
        let a = model.evaluate(801.5, &p);
        p.phase = Angle::from_radians(p.phase.radians() + TAU);
        let b = model.evaluate(801.5, &p);
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }

    #[test]
    fn test_baseline_far_from_carrier() {
        let model = ChirpedFringeModel;
        let p = FitParameters::default();
        let y = model.evaluate(900.0, &p);
        assert_abs_diff_eq!(y, p.baseline, epsilon = 1e-9);
    }

    #[test]
    fn test_peak_at_carrier_in_phase() {
        let model = ChirpedFringeModel;
        let mut p = FitParameters::default();
        // make the fringe argument zero at the carrier
        let x = p.carrier_wavelength.nanometers() - p.starting_wavelength.nanometers();
        p.phase = Angle::from_radians(-p.acceleration * x * x);
        let y = model.evaluate(p.carrier_wavelength.nanometers(), &p);
        assert_abs_diff_eq!(y, 1.0, epsilon = 1e-9);

        p.phase = Angle::from_radians(p.phase.radians() + PI);
        let y = model.evaluate(p.carrier_wavelength.nanometers(), &p);
        assert_abs_diff_eq!(y, p.baseline, epsilon = 1e-9);
    }

    #[test]
    fn test_curve_length() {
        let model = ChirpedFringeModel;
        let axis = [800.0, 801.0, 802.0];
        assert_eq!(model.curve(&axis, &FitParameters::default()).len(), 3);
    }

    #[test]
    fn test_boxed_model_delegates() {
        let model: Box<dyn SpectralModel> = Box::new(ChirpedFringeModel);
        assert_eq!(model.name(), "chirped-fringe");
        assert_abs_diff_eq!(model.phase_period(), TAU);
    }
}

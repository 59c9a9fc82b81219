//! Phase analysis module
//!
//! This module contains the numerical side of the loop:
//! - Calibrated, normalized spectra ([`spectrum`])
//! - Fit parameters, field registry and session settings ([`params`])
//! - Parametric spectral models ([`model`])
//! - Levenberg-Marquardt least-squares solver ([`solver`])
//! - Windowed two-stage phase estimation ([`tracker`])
//! - Hysteretic phase correction ([`corrector`])

pub mod corrector;
pub mod model;
pub mod params;
pub mod solver;
pub mod spectrum;
pub mod tracker;

pub use params::ConfigError;
pub use solver::FitError;
pub use spectrum::SpectrumError;

//! Fit parameters, their static field registry, and the session analysis config
//!
//! Every physical field of [`FitParameters`] is declared once in [`FIELDS`]
//! with the conversion pair between its typed value and the plain `f64` the
//! solver works on, whether the model fits it, and how it is averaged.

use crate::units::{Angle, Length, RangeError, WavelengthRange};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use thiserror::Error;

/// Errors raised when changing the analysis configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Averaging window size must be at least 1, got {0}")]
    WindowSize(usize),

    #[error("Invalid wavelength range: {0}")]
    Range(#[from] RangeError),

    #[error("Residual threshold must be positive and finite, got {0}")]
    ResidualThreshold(f64),

    #[error("Deadband must be non-negative and below half the phase period, got {0} rad")]
    Deadband(f64),

    #[error("Correction gain must be finite and non-zero, got {0}")]
    Gain(f64),
}

/// Identifier of a fit parameter field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CarrierWavelength,
    StartingWavelength,
    Bandwidth,
    Baseline,
    Phase,
    Acceleration,
    Residual,
}

/// How a field is combined across an averaging window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Averaging {
    /// Arithmetic mean of the converted values
    Mean,
    /// Value of the first window entry
    First,
}

/// Static description of one fit parameter field
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Field identifier
    pub field: Field,
    /// Model parameter name
    pub name: &'static str,
    /// Unit of the numeric value handed to the solver
    pub unit: &'static str,
    /// Typed value to solver number
    pub to_value: fn(&FitParameters) -> f64,
    /// Solver number back into the typed field
    pub from_value: fn(&mut FitParameters, f64),
    /// Whether the field is a model parameter (residual is derived, not fitted)
    pub fitted: bool,
    /// Averaging policy
    pub averaging: Averaging,
}

/// Field registry in solver order
pub static FIELDS: [FieldSpec; 7] = [
    FieldSpec {
        field: Field::CarrierWavelength,
        name: "carrier_wavelength",
        unit: "nm",
        to_value: |p| p.carrier_wavelength.nanometers(),
        from_value: |p, v| p.carrier_wavelength = Length::from_nanometers(v),
        fitted: true,
        averaging: Averaging::Mean,
    },
    FieldSpec {
        field: Field::StartingWavelength,
        name: "starting_wavelength",
        unit: "nm",
        to_value: |p| p.starting_wavelength.nanometers(),
        from_value: |p, v| p.starting_wavelength = Length::from_nanometers(v),
        fitted: true,
        averaging: Averaging::Mean,
    },
    FieldSpec {
        field: Field::Bandwidth,
        name: "bandwidth",
        unit: "nm",
        to_value: |p| p.bandwidth.nanometers(),
        from_value: |p, v| p.bandwidth = Length::from_nanometers(v),
        fitted: true,
        averaging: Averaging::Mean,
    },
    FieldSpec {
        field: Field::Baseline,
        name: "baseline",
        unit: "",
        to_value: |p| p.baseline,
        from_value: |p, v| p.baseline = v,
        fitted: true,
        averaging: Averaging::Mean,
    },
    FieldSpec {
        field: Field::Phase,
        name: "phase",
        unit: "rad",
        to_value: |p| p.phase.radians(),
        from_value: |p, v| p.phase = Angle::from_radians(v),
        fitted: true,
        averaging: Averaging::Mean,
    },
    FieldSpec {
        field: Field::Acceleration,
        name: "acceleration",
        unit: "rad/nm^2",
        to_value: |p| p.acceleration,
        from_value: |p, v| p.acceleration = v,
        fitted: true,
        averaging: Averaging::Mean,
    },
    FieldSpec {
        field: Field::Residual,
        name: "residual",
        unit: "",
        to_value: |p| p.residual,
        from_value: |p, v| p.residual = v,
        fitted: false,
        averaging: Averaging::Mean,
    },
];

/// Number of model parameters the solver can vary
pub const FITTED_FIELD_COUNT: usize = 6;

/// Look up the registry entry of a field
pub fn spec(field: Field) -> &'static FieldSpec {
    // FIELDS is indexed by declaration order of `Field`
    &FIELDS[field as usize]
}

/// Physical parameters of the spectral model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParameters {
    /// Carrier (envelope center) wavelength
    pub carrier_wavelength: Length,
    /// Wavelength at which the chirp term vanishes
    pub starting_wavelength: Length,
    /// Envelope width
    pub bandwidth: Length,
    /// Constant offset of the normalized intensity
    pub baseline: f64,
    /// Interference phase offset
    pub phase: Angle,
    /// Quadratic chirp coefficient
    pub acceleration: f64,
    /// Sum of squared residuals of the fit that produced these values
    pub residual: f64,
}

impl Default for FitParameters {
    fn default() -> Self {
        Self {
            carrier_wavelength: Length::from_nanometers(802.38),
            starting_wavelength: Length::from_nanometers(808.352),
            bandwidth: Length::from_nanometers(7.4728),
            baseline: 0.3338,
            phase: Angle::from_radians(-3.34),
            acceleration: 0.0979 * TAU,
            residual: 0.0,
        }
    }
}

impl FitParameters {
    /// Numeric value of a field in solver units
    pub fn get(&self, field: Field) -> f64 {
        (spec(field).to_value)(self)
    }

    /// Set a field from a value in solver units
    pub fn set(&mut self, field: Field, value: f64) {
        (spec(field).from_value)(self, value)
    }

    /// Model parameters as the plain vector the solver consumes, in registry order
    pub fn to_fit_vector(&self) -> Vec<f64> {
        FIELDS
            .iter()
            .filter(|s| s.fitted)
            .map(|s| (s.to_value)(self))
            .collect()
    }

    /// Rebuild parameters from a solver vector, taking non-fitted fields from `self`
    ///
    /// Extra trailing values are ignored; missing ones leave the field unchanged.
    pub fn with_fit_vector(&self, values: &[f64]) -> FitParameters {
        let mut out = *self;
        for (s, &v) in FIELDS.iter().filter(|s| s.fitted).zip(values) {
            (s.from_value)(&mut out, v);
        }
        out
    }

    /// Field-wise mean across a window of fits
    ///
    /// Fields with [`Averaging::Mean`] are averaged in solver units; fields
    /// with [`Averaging::First`] take the first entry's value. Returns `None`
    /// for an empty slice.
    pub fn mean(items: &[FitParameters]) -> Option<FitParameters> {
        Self::mean_by(items, &FIELDS)
    }

    /// Field-wise mean following the averaging policy of `fields`
    ///
    /// Fields missing from `fields` keep the first entry's value, like
    /// [`Averaging::First`].
    pub fn mean_by(items: &[FitParameters], fields: &[FieldSpec]) -> Option<FitParameters> {
        let first = items.first()?;
        let n = items.len() as f64;
        let mut out = *first;

        for s in fields {
            if s.averaging == Averaging::Mean {
                let sum: f64 = items.iter().map(|p| (s.to_value)(p)).sum();
                (s.from_value)(&mut out, sum / n);
            }
        }
        Some(out)
    }

    /// Population standard deviation of one field across a window
    pub fn std_dev(items: &[FitParameters], field: Field) -> Option<f64> {
        let mean = Self::mean(items)?.get(field);
        let n = items.len() as f64;
        let var = items
            .iter()
            .map(|p| (p.get(field) - mean).powi(2))
            .sum::<f64>()
            / n;
        Some(var.sqrt())
    }

    /// Whether every field is a finite number
    pub fn is_finite(&self) -> bool {
        FIELDS.iter().all(|s| (s.to_value)(self).is_finite())
    }
}

/// Fit parameters plus the loop settings of one analysis session
///
/// The engine owns the authoritative instance; it is read for initial
/// guesses and overwritten with each accepted window mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Current best model parameters
    #[serde(flatten)]
    pub params: FitParameters,
    wavelength_range: WavelengthRange,
    residuals_threshold: f64,
    avg_spectra: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            params: FitParameters::default(),
            wavelength_range: WavelengthRange::default(),
            residuals_threshold: crate::DEFAULT_RESIDUALS_THRESHOLD,
            avg_spectra: crate::DEFAULT_AVG_SPECTRA,
        }
    }
}

impl AnalysisConfig {
    /// Wavelength sub-range used for fitting
    pub fn wavelength_range(&self) -> WavelengthRange {
        self.wavelength_range
    }

    /// Residual threshold for accepting an averaged window
    pub fn residuals_threshold(&self) -> f64 {
        self.residuals_threshold
    }

    /// Averaging window size
    pub fn avg_spectra(&self) -> usize {
        self.avg_spectra
    }

    /// Set the fit wavelength range
    pub fn set_wavelength_range(&mut self, range: WavelengthRange) {
        self.wavelength_range = range;
    }

    /// Set the fit wavelength range from nanometer bounds
    ///
    /// An inverted range is rejected and the previous range kept.
    pub fn set_wavelength_range_nm(&mut self, start: f64, end: f64) -> Result<(), ConfigError> {
        self.wavelength_range = WavelengthRange::from_nanometers(start, end)?;
        Ok(())
    }

    /// Set the residual acceptance threshold
    pub fn set_residuals_threshold(&mut self, threshold: f64) -> Result<(), ConfigError> {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(ConfigError::ResidualThreshold(threshold));
        }
        self.residuals_threshold = threshold;
        Ok(())
    }

    /// Set the averaging window size
    pub fn set_avg_spectra(&mut self, avg_spectra: usize) -> Result<(), ConfigError> {
        if avg_spectra < 1 {
            return Err(ConfigError::WindowSize(avg_spectra));
        }
        self.avg_spectra = avg_spectra;
        Ok(())
    }

    /// Copy every fit field from `fit`, leaving the loop settings untouched
    pub fn absorb_fit(&mut self, fit: &FitParameters) {
        for s in FIELDS.iter() {
            (s.from_value)(&mut self.params, (s.to_value)(fit));
        }
    }

    /// Check the loop settings of a config built without the setters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.avg_spectra < 1 {
            return Err(ConfigError::WindowSize(self.avg_spectra));
        }
        if !(self.residuals_threshold.is_finite() && self.residuals_threshold > 0.0) {
            return Err(ConfigError::ResidualThreshold(self.residuals_threshold));
        }
        Ok(())
    }
}

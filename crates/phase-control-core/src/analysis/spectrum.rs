//! Calibrated, normalized spectra
//!
//! A [`Spectrum`] pairs a wavelength axis (nanometers) with a normalized
//! intensity curve. Both sequences always have the same length and are
//! never mutated after construction.

use crate::units::WavelengthRange;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised when assembling a spectrum
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpectrumError {
    #[error("Wavelength/intensity length mismatch: {wavelengths} wavelengths, {intensity} intensities")]
    LengthMismatch { wavelengths: usize, intensity: usize },
}

/// Intensity-vs-wavelength curve from one acquisition
///
/// Cloning is cheap: the sample data is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    wavelengths_nm: Arc<[f64]>,
    intensity: Arc<[f64]>,
}

impl Spectrum {
    /// Create a spectrum from matching wavelength and intensity sequences
    ///
    /// # Arguments
    /// * `wavelengths_nm` - Wavelength axis in nanometers
    /// * `intensity` - Intensity per wavelength
    pub fn new(wavelengths_nm: Vec<f64>, intensity: Vec<f64>) -> Result<Self, SpectrumError> {
        if wavelengths_nm.len() != intensity.len() {
            return Err(SpectrumError::LengthMismatch {
                wavelengths: wavelengths_nm.len(),
                intensity: intensity.len(),
            });
        }
        Ok(Self {
            wavelengths_nm: wavelengths_nm.into(),
            intensity: intensity.into(),
        })
    }

    /// Build a spectrum from raw detector counts, min-max normalized to `[0, 1]`
    ///
    /// The smallest count maps to 0 and the largest to 1. A flat frame (all
    /// counts equal) normalizes to all zeros.
    ///
    /// # Example
    /// ```
    /// use phase_control_core::analysis::spectrum::Spectrum;
    ///
    /// let s = Spectrum::from_counts(&[0.0, 1.0, 2.0], &[10, 30, 20]).unwrap();
    /// assert_eq!(s.intensity(), &[0.0, 1.0, 0.5]);
    /// ```
    pub fn from_counts(wavelengths_nm: &[f64], counts: &[u32]) -> Result<Self, SpectrumError> {
        let min = counts.iter().copied().min().unwrap_or(0) as f64;
        let max = counts.iter().copied().max().unwrap_or(0) as f64;
        let span = max - min;

        let intensity = counts
            .iter()
            .map(|&c| {
                if span > 0.0 {
                    (c as f64 - min) / span
                } else {
                    0.0
                }
            })
            .collect();

        Self::new(wavelengths_nm.to_vec(), intensity)
    }

    /// Restrict to a wavelength range, keeping both sequences in step
    pub fn cut(&self, range: &WavelengthRange) -> Spectrum {
        let (wavelengths_nm, intensity): (Vec<f64>, Vec<f64>) = self
            .points()
            .filter(|(w, _)| range.contains_nm(*w))
            .unzip();

        Spectrum {
            wavelengths_nm: wavelengths_nm.into(),
            intensity: intensity.into(),
        }
    }

    /// Wavelength axis in nanometers
    pub fn wavelengths_nm(&self) -> &[f64] {
        &self.wavelengths_nm
    }

    /// Normalized intensity
    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    /// Iterate `(wavelength_nm, intensity)` pairs in order
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.wavelengths_nm
            .iter()
            .copied()
            .zip(self.intensity.iter().copied())
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    /// Whether the spectrum has no samples
    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }
}

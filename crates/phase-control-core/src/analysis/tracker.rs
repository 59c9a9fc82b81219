//! Windowed phase estimation
//!
//! The [`PhaseTracker`] fits the spectral model to each spectrum and collects
//! the results in an averaging window:
//! - **Bootstrap**: every model field is fitted freely, seeded from the
//!   current [`AnalysisConfig`].
//! - **Locked**: once a window has been accepted, only the phase varies and
//!   every other field is held at the accepted mean.
//!
//! When the window is full its field-wise mean is tested against the residual
//! threshold. An accepted mean becomes the new [`PhaseEstimate`] and is
//! written back into the config; a rejected one is dropped and the tracker
//! re-bootstraps while keeping the previous estimate.

use super::model::SpectralModel;
use super::params::{AnalysisConfig, Field, FieldSpec, FitParameters, FIELDS};
use super::solver::{FitError, LevenbergMarquardt};
use super::spectrum::Spectrum;
use crate::units::Angle;

/// Tracker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Fitting every field, no accepted window yet
    Bootstrap,
    /// Fitting phase only, no estimate committed yet
    Locked,
    /// At least one window accepted; estimate available
    Converged,
}

/// Which fields a fit was allowed to vary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// All model fields free
    Free,
    /// Phase only
    PhaseOnly,
}

/// Committed phase with its quality indicators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseEstimate {
    /// Averaged phase of the accepted window
    pub phase: Angle,
    /// Standard deviation of the phase across the window
    pub phase_std: Angle,
    /// Mean residual of the window
    pub mean_residual: f64,
    /// Number of spectra averaged
    pub window_len: usize,
    /// 1-based count of accepted windows in this session
    pub sequence: u64,
}

/// What happened to the averaging window on one update
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// Window still filling
    Collecting { len: usize, capacity: usize },
    /// Window mean accepted and committed
    Committed(PhaseEstimate),
    /// Window mean rejected, window dropped
    Rejected { mean_residual: f64, threshold: f64 },
}

/// Result of fitting one spectrum
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerUpdate {
    /// Parameters fitted to this spectrum
    pub fit: FitParameters,
    /// Fields the fit was allowed to vary
    pub mode: FitMode,
    /// Window bookkeeping after adding the fit
    pub window: WindowOutcome,
}

/// Windowed, two-stage phase estimator
///
/// # Example
/// ```
/// use phase_control_core::analysis::model::ChirpedFringeModel;
/// use phase_control_core::analysis::tracker::{PhaseTracker, TrackerState};
///
/// let tracker = PhaseTracker::new(ChirpedFringeModel);
/// assert_eq!(tracker.state(), TrackerState::Bootstrap);
/// assert!(tracker.estimate().is_none());
/// ```
pub struct PhaseTracker<M> {
    model: M,
    solver: LevenbergMarquardt,
    /// Fits waiting to be averaged
    window: Vec<FitParameters>,
    /// Accepted mean that locked fits hold fixed
    locked: Option<FitParameters>,
    /// Last committed estimate
    estimate: Option<PhaseEstimate>,
    /// Accepted windows this session
    commits: u64,
}

impl<M: SpectralModel> PhaseTracker<M> {
    /// Create a tracker in the bootstrap state
    pub fn new(model: M) -> Self {
        Self::with_solver(model, LevenbergMarquardt::default())
    }

    /// Create a tracker with custom solver settings
    pub fn with_solver(model: M, solver: LevenbergMarquardt) -> Self {
        Self {
            model,
            solver,
            window: Vec::new(),
            locked: None,
            estimate: None,
            commits: 0,
        }
    }

    /// The spectral model
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Current lifecycle state
    pub fn state(&self) -> TrackerState {
        if self.estimate.is_some() {
            TrackerState::Converged
        } else if self.locked.is_some() {
            TrackerState::Locked
        } else {
            TrackerState::Bootstrap
        }
    }

    /// Last committed estimate, `None` until a window is accepted
    pub fn estimate(&self) -> Option<&PhaseEstimate> {
        self.estimate.as_ref()
    }

    /// Number of fits waiting in the window
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Mode the next fit will use
    pub fn next_mode(&self) -> FitMode {
        if self.locked.is_some() {
            FitMode::PhaseOnly
        } else {
            FitMode::Free
        }
    }

    /// Fit one spectrum and advance the window
    ///
    /// A failed fit drops the pending window and leaves the estimate and
    /// the config untouched.
    ///
    /// # Arguments
    /// * `spectrum` - Spectrum already restricted to the fit range
    /// * `config` - Session config; read for seeds, written on commit
    pub fn update(
        &mut self,
        spectrum: &Spectrum,
        config: &mut AnalysisConfig,
    ) -> Result<TrackerUpdate, FitError> {
        let mode = self.next_mode();
        let fitted = match mode {
            FitMode::Free => self.fit(spectrum, &config.params, FitMode::Free),
            FitMode::PhaseOnly => {
                let seed = self.locked.unwrap_or(config.params);
                self.fit(spectrum, &seed, FitMode::PhaseOnly)
            }
        };

        let fit = match fitted {
            Ok(fit) => fit,
            Err(e) => {
                if !self.window.is_empty() {
                    tracing::warn!(
                        "Fit failed, dropping {} pending spectra: {}",
                        self.window.len(),
                        e
                    );
                }
                self.window.clear();
                return Err(e);
            }
        };

        tracing::debug!(
            "Fitted spectrum ({:?}): phase {:.4} rad, residual {:.4}",
            mode,
            fit.phase.radians(),
            fit.residual
        );

        let window = self.push_fit(fit, config);
        Ok(TrackerUpdate { fit, mode, window })
    }

    /// Add an already-fitted result to the window and evaluate it when full
    ///
    /// The window never grows beyond `config.avg_spectra()` and is emptied
    /// whenever it is evaluated.
    pub fn push_fit(&mut self, fit: FitParameters, config: &mut AnalysisConfig) -> WindowOutcome {
        self.window.push(fit);
        let capacity = config.avg_spectra();

        if self.window.len() < capacity {
            return WindowOutcome::Collecting {
                len: self.window.len(),
                capacity,
            };
        }

        let window = std::mem::take(&mut self.window);
        let Some(mean) = FitParameters::mean(&window) else {
            return WindowOutcome::Collecting { len: 0, capacity };
        };
        let threshold = config.residuals_threshold();

        if mean.residual < threshold {
            let phase_std = FitParameters::std_dev(&window, Field::Phase).unwrap_or(0.0);
            self.commits += 1;
            let estimate = PhaseEstimate {
                phase: mean.phase,
                phase_std: Angle::from_radians(phase_std),
                mean_residual: mean.residual,
                window_len: window.len(),
                sequence: self.commits,
            };

            config.absorb_fit(&mean);
            self.locked = Some(mean);
            self.estimate = Some(estimate);

            tracing::info!(
                "Window {} committed: phase {:.4} rad (std {:.2} deg), mean residual {:.4}",
                estimate.sequence,
                estimate.phase.radians(),
                estimate.phase_std.degrees(),
                estimate.mean_residual
            );
            WindowOutcome::Committed(estimate)
        } else {
            self.locked = None;
            tracing::warn!(
                "Window rejected: mean residual {:.4} >= threshold {:.4}",
                mean.residual,
                threshold
            );
            WindowOutcome::Rejected {
                mean_residual: mean.residual,
                threshold,
            }
        }
    }

    /// Skip the bootstrap and fit phase only, holding the rest at `params`
    ///
    /// Used to resume from parameters accepted in an earlier session. Any
    /// pending window is dropped; the estimate stays undefined until the
    /// next accepted window.
    pub fn lock_on(&mut self, params: FitParameters) {
        self.window.clear();
        self.locked = Some(params);
    }

    /// Discard all estimator state and start a fresh bootstrap session
    pub fn reset(&mut self) {
        self.window.clear();
        self.locked = None;
        self.estimate = None;
        self.commits = 0;
    }

    /// Fit the model to a spectrum starting from `seed`
    fn fit(
        &self,
        spectrum: &Spectrum,
        seed: &FitParameters,
        mode: FitMode,
    ) -> Result<FitParameters, FitError> {
        let free: Vec<&FieldSpec> = FIELDS
            .iter()
            .filter(|s| s.fitted)
            .filter(|s| mode == FitMode::Free || s.field == Field::Phase)
            .collect();

        let x0: Vec<f64> = free.iter().map(|s| (s.to_value)(seed)).collect();
        let wavelengths = spectrum.wavelengths_nm();
        let measured = spectrum.intensity();
        let model = &self.model;

        let assemble = |x: &[f64]| {
            let mut p = *seed;
            for (s, &v) in free.iter().zip(x) {
                (s.from_value)(&mut p, v);
            }
            p
        };

        let solution = self.solver.minimize(&x0, measured.len(), |x, out| {
            let p = assemble(x);
            for ((o, &w), &y) in out.iter_mut().zip(wavelengths).zip(measured) {
                *o = model.evaluate(w, &p) - y;
            }
        })?;

        let mut fit = assemble(&solution.params);
        fit.residual = solution.cost;
        if !fit.is_finite() {
            return Err(FitError::NonFinite);
        }
        Ok(fit)
    }
}

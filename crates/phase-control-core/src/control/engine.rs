//! Control-loop engine
//!
//! One [`AnalysisEngine::step`] runs the whole chain for the newest buffered
//! frame: calibrate and normalize, restrict to the fit range, estimate the
//! phase, correct, and forward the command to the actuator.
//!
//! The engine owns the authoritative [`AnalysisConfig`]. Other threads see it
//! only as snapshots, either by asking with [`AnalysisEngine::config`] between
//! steps or by subscribing to the snapshots sent after every commit and
//! every reset.

use super::actuator::{Actuator, ActuatorError};
use crate::analysis::corrector::{CorrectionCommand, CorrectorConfig, PhaseCorrector};
use crate::analysis::model::SpectralModel;
use crate::analysis::params::{AnalysisConfig, ConfigError};
use crate::analysis::solver::FitError;
use crate::analysis::spectrum::{Spectrum, SpectrumError};
use crate::analysis::tracker::{PhaseEstimate, PhaseTracker, TrackerState, TrackerUpdate, WindowOutcome};
use crate::stats::counters::LoopStats;
use crate::stream::buffer::FrameBuffer;
use crate::units::Angle;
use chrono::NaiveDateTime;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;

/// Default capacity of config subscription channels
pub const DEFAULT_NOTIFY_CAPACITY: usize = 16;

/// Everything one processed frame produced
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Buffer sequence number of the processed frame
    pub sequence: u64,
    /// Acquisition time of the frame
    pub timestamp: NaiveDateTime,
    /// Normalized spectrum restricted to the fit range
    pub spectrum: Spectrum,
    /// Fit of this spectrum, `None` if the fit failed
    pub fit: Option<TrackerUpdate>,
    /// Why the fit failed
    pub fit_error: Option<FitError>,
    /// Model evaluated with this spectrum's fit, empty if the fit failed
    pub fitted_curve: Vec<f64>,
    /// Same model with the phase set to zero
    pub zero_phase_curve: Vec<f64>,
    /// Held phase estimate after this step
    pub estimate: Option<PhaseEstimate>,
    /// Command sent to the actuator (zero until the first estimate)
    pub command: CorrectionCommand,
    /// Why the actuator refused the command
    pub actuator_error: Option<ActuatorError>,
    /// Tracker state after this step
    pub state: TrackerState,
}

impl StepReport {
    /// Current phase, if an estimate has been committed
    pub fn phase(&self) -> Option<Angle> {
        self.estimate.map(|e| e.phase)
    }
}

/// Result of one engine step
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Nothing buffered yet
    NoData,
    /// The newest frame was already processed
    Repeated,
    /// The frame could not be turned into a spectrum; a hold command was still sent
    Discarded(SpectrumError),
    /// A new frame went through the loop
    Processed(Box<StepReport>),
}

/// Closed-loop phase stabilizer
pub struct AnalysisEngine<M, A> {
    buffer: Arc<FrameBuffer>,
    axis: Vec<f64>,
    tracker: PhaseTracker<M>,
    corrector: PhaseCorrector,
    actuator: A,
    config: AnalysisConfig,
    last_sequence: Option<u64>,
    stats: LoopStats,
    notify_capacity: usize,
    subscribers: Vec<Sender<AnalysisConfig>>,
}

impl<M: SpectralModel, A: Actuator> AnalysisEngine<M, A> {
    /// Create an engine reading from `buffer`
    ///
    /// # Arguments
    /// * `buffer` - Latest-value buffer fed by the stream reader
    /// * `model` - Spectral model to fit
    /// * `actuator` - Receives one command per processed frame
    /// * `config` - Initial analysis config; becomes engine-owned
    /// * `corrector` - Corrector calibration
    pub fn new(
        buffer: Arc<FrameBuffer>,
        model: M,
        actuator: A,
        config: AnalysisConfig,
        corrector: CorrectorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let corrector = PhaseCorrector::new(corrector, model.phase_period())?;
        let axis = buffer.meta().wavelength_axis();

        tracing::info!(
            "Analysis engine ready: model {}, actuator {}, window {}, range {}-{}",
            model.name(),
            actuator.device_id(),
            config.avg_spectra(),
            config.wavelength_range().start(),
            config.wavelength_range().end()
        );

        Ok(Self {
            buffer,
            axis,
            tracker: PhaseTracker::new(model),
            corrector,
            actuator,
            config,
            last_sequence: None,
            stats: LoopStats::new(),
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
            subscribers: Vec::new(),
        })
    }

    /// Set the capacity of channels created by later [`subscribe`](Self::subscribe) calls
    pub fn with_notify_capacity(mut self, capacity: usize) -> Self {
        self.notify_capacity = capacity.max(1);
        self
    }

    /// Run one loop iteration on the newest buffered frame
    pub fn step(&mut self) -> StepOutcome {
        self.stats.steps += 1;

        let Some(latest) = self.buffer.get_latest() else {
            self.stats.no_data += 1;
            return StepOutcome::NoData;
        };
        if self.last_sequence == Some(latest.sequence) {
            self.stats.repeated += 1;
            return StepOutcome::Repeated;
        }
        self.last_sequence = Some(latest.sequence);

        let full = match Spectrum::from_counts(&self.axis, &latest.frame.counts) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Frame {} discarded: {}", latest.sequence, e);
                self.stats.record_fit_failure();
                let hold = CorrectionCommand::hold(self.corrector.reference().unwrap_or(Angle::ZERO));
                self.apply(&hold);
                return StepOutcome::Discarded(e);
            }
        };
        let spectrum = full.cut(&self.config.wavelength_range());

        let (fit, fit_error) = match self.tracker.update(&spectrum, &mut self.config) {
            Ok(update) => {
                self.stats.record_fit(update.fit.residual);
                (Some(update), None)
            }
            Err(e) => {
                self.stats.record_fit_failure();
                (None, Some(e))
            }
        };

        if let Some(update) = &fit {
            match &update.window {
                WindowOutcome::Committed(estimate) => {
                    self.stats.record_commit(estimate.phase.radians());
                    self.notify();
                }
                WindowOutcome::Rejected { .. } => self.stats.rejections += 1,
                WindowOutcome::Collecting { .. } => {}
            }
        }

        let estimate = self.tracker.estimate().copied();
        let command = match estimate {
            Some(e) => self.corrector.update(e.phase),
            None => CorrectionCommand::hold(self.corrector.reference().unwrap_or(Angle::ZERO)),
        };

        let actuator_error = self.apply(&command);

        let (fitted_curve, zero_phase_curve) = match &fit {
            Some(update) => {
                let model = self.tracker.model();
                let wavelengths = spectrum.wavelengths_nm();
                let mut zero = update.fit;
                zero.phase = Angle::ZERO;
                (model.curve(wavelengths, &update.fit), model.curve(wavelengths, &zero))
            }
            None => (Vec::new(), Vec::new()),
        };

        tracing::debug!(
            "Step {}: frame {}, {} points, state {:?}, command {:.4} rad",
            self.stats.steps,
            latest.sequence,
            spectrum.len(),
            self.tracker.state(),
            command.angle.radians()
        );

        StepOutcome::Processed(Box::new(StepReport {
            sequence: latest.sequence,
            timestamp: latest.frame.timestamp,
            spectrum,
            fit,
            fit_error,
            fitted_curve,
            zero_phase_curve,
            estimate,
            command,
            actuator_error,
            state: self.tracker.state(),
        }))
    }

    /// Send a command to the actuator and count the outcome
    fn apply(&mut self, command: &CorrectionCommand) -> Option<ActuatorError> {
        match self.actuator.apply(command) {
            Ok(()) => {
                if !command.is_zero() {
                    self.stats.corrections += 1;
                }
                None
            }
            Err(e) => {
                tracing::warn!("Actuator {} refused command: {}", self.actuator.device_id(), e);
                self.stats.actuator_errors += 1;
                Some(e)
            }
        }
    }

    /// Discard all estimator state and start a fresh bootstrap session
    ///
    /// The analysis config, including manual edits and the last accepted
    /// fit, is kept.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.corrector.reset();
        tracing::info!("Analysis reset, bootstrapping from current config");
        self.notify();
    }

    /// Reset, then fit phase only from the current config
    ///
    /// For a config that already holds parameters accepted in an earlier
    /// session; the bootstrap is skipped.
    pub fn resume_locked(&mut self) {
        self.reset();
        self.tracker.lock_on(self.config.params);
        tracing::info!(
            "Resuming phase-only fits from phase {:.4} rad",
            self.config.params.phase.radians()
        );
    }

    /// Install an edited config and reset
    ///
    /// An invalid config is rejected and the current one kept.
    pub fn reset_with(&mut self, config: AnalysisConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        self.reset();
        Ok(())
    }

    /// Snapshot of the analysis config
    pub fn config(&self) -> AnalysisConfig {
        self.config.clone()
    }

    /// Receive a config snapshot after every commit and reset
    ///
    /// A subscriber that falls behind misses snapshots; one that drops its
    /// receiver is forgotten.
    pub fn subscribe(&mut self) -> Receiver<AnalysisConfig> {
        let (tx, rx) = crossbeam_channel::bounded(self.notify_capacity);
        self.subscribers.push(tx);
        rx
    }

    /// Loop counters
    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Current phase estimate
    pub fn estimate(&self) -> Option<&PhaseEstimate> {
        self.tracker.estimate()
    }

    /// Current tracker state
    pub fn state(&self) -> TrackerState {
        self.tracker.state()
    }

    /// Current corrector reference
    pub fn reference(&self) -> Option<Angle> {
        self.corrector.reference()
    }

    /// The buffer this engine reads from
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    /// The actuator collaborator
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    fn notify(&mut self) {
        let snapshot = &self.config;
        self.subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Config subscriber is behind, snapshot dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

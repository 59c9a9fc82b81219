//! Phase Control - closed-loop stabilization of a spectral interference phase
//!
//! This library re-exports the stream decoding, phase estimation, correction
//! and control-loop functionality from `phase-control-core`.

pub use phase_control_core::{analysis, config, control, stats, stream, units};

pub use phase_control_core::{
    Actuator, AnalysisConfig, AnalysisEngine, ChirpedFringeModel, FitParameters, FrameBuffer,
    LoopStats, PhaseCorrector, PhaseTracker, SessionConfig, SpectralModel, Spectrum,
    StreamReader,
};
pub use phase_control_core::{DEFAULT_AVG_SPECTRA, DEFAULT_RESIDUALS_THRESHOLD, VERSION};

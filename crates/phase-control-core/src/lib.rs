//! Phase Control Core - phase estimation, correction and live-stream plumbing
//!
//! This library stabilizes the interference phase of an optical source. It
//! decodes single-shot spectra from a line-delimited stream, fits a parametric
//! spectral model to extract the phase offset, and turns the offset into a
//! chatter-free actuator command in a closed loop.

pub mod analysis;
pub mod config;
pub mod control;
pub mod stats;
pub mod stream;
pub mod units;

pub use analysis::{
    corrector::PhaseCorrector, model::ChirpedFringeModel, model::SpectralModel,
    params::AnalysisConfig, params::FitParameters, spectrum::Spectrum, tracker::PhaseTracker,
};
pub use config::SessionConfig;
pub use control::{actuator::Actuator, engine::AnalysisEngine};
pub use stats::counters::LoopStats;
pub use stream::{buffer::FrameBuffer, protocol::StreamReader};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default averaging window size (spectra per accepted update)
pub const DEFAULT_AVG_SPECTRA: usize = 10;

/// Default residual threshold for accepting an averaged window
pub const DEFAULT_RESIDUALS_THRESHOLD: f64 = 5.0;

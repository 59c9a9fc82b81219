//! Persistent session configuration
//!
//! Stores the initial fit parameters, corrector calibration, actuator
//! selection and loop cadence in a JSON file at
//! `<config_dir>/phase-control/config.json` or any path given on the command
//! line. Every section falls back to its defaults field by field, so a
//! partial file is valid.

use crate::analysis::corrector::CorrectorConfig;
use crate::analysis::model::SpectralModel;
use crate::analysis::params::{AnalysisConfig, ConfigError};
use crate::control::engine::DEFAULT_NOTIFY_CAPACITY;
use crate::control::runner::LoopSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised when reading or writing a config file
#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("Config file I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode config")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

fn default_device_id() -> String {
    "ell14-0".to_string()
}

fn default_dry_run() -> bool {
    true
}

/// Actuator selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorSettings {
    /// Device identifier
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Log commands instead of moving anything
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Maximum absolute position in radians for the simulated rotator
    #[serde(default)]
    pub travel_limit_rad: Option<f64>,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            dry_run: default_dry_run(),
            travel_limit_rad: None,
        }
    }
}

/// Loop cadence and notification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Pause after a processed frame (ms)
    pub step_interval_ms: u64,
    /// Pause when no new frame was available (ms)
    pub idle_interval_ms: u64,
    /// Capacity of config snapshot channels
    pub notify_capacity: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            step_interval_ms: 20,
            idle_interval_ms: 50,
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
        }
    }
}

impl ControlSettings {
    /// Loop cadence for the control runner
    pub fn loop_settings(&self, max_steps: Option<u64>) -> LoopSettings {
        LoopSettings {
            step_interval: Duration::from_millis(self.step_interval_ms),
            idle_interval: Duration::from_millis(self.idle_interval_ms),
            max_steps,
        }
    }
}

/// Complete configuration of one phase-control session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub analysis: AnalysisConfig,
    pub corrector: CorrectorConfig,
    pub actuator: ActuatorSettings,
    pub control: ControlSettings,
}

impl SessionConfig {
    /// Default config file path: `<config_dir>/phase-control/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("phase-control")
            .join("config.json")
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SessionConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigFileError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate(std::f64::consts::TAU)?;
        tracing::info!(path = %path.display(), "Loaded config from disk");
        Ok(config)
    }

    /// Load a config file, falling back to defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigFileError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                let cause = std::error::Error::source(&e)
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                tracing::warn!(path = %path.display(), error = %e, cause = %cause, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Save config as pretty JSON, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigFileError> {
        let io_err = |source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(ConfigFileError::Encode)?;
        std::fs::write(path, json).map_err(io_err)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Check every section
    ///
    /// # Arguments
    /// * `phase_period` - Phase period of the model the config will drive
    pub fn validate(&self, phase_period: f64) -> Result<(), ConfigError> {
        self.analysis.validate()?;
        self.corrector.validate(phase_period)?;
        Ok(())
    }

    /// Check every section against a model
    pub fn validate_for<M: SpectralModel>(&self, model: &M) -> Result<(), ConfigError> {
        self.validate(model.phase_period())
    }
}

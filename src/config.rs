//! User settings stored as `config.toml` under the application root.
//!
//! Every field has a default, so a missing file or a partial file loads
//! cleanly. Saving rewrites the whole file atomically.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs::{AppDirError, AppPaths};
use crate::fs_ops::write_atomic;
use crate::ml::mlp::FitOptions;

/// Default filename used to store the settings.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors that may occur while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The application directory could not be resolved or created.
    #[error(transparent)]
    Dirs(#[from] AppDirError),
    /// Failed to read the config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to write the config file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to serialize settings to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub collection: CollectionSettings,
    #[serde(default)]
    pub testing: TestingSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Fitting hyperparameters and the minimum data needed to train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub validation_split: f32,
    pub seed: u64,
    /// Minimum committed samples across all labels.
    pub min_samples: usize,
    /// Minimum labels holding at least one sample.
    pub min_labels: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let fit = FitOptions::default();
        Self {
            epochs: fit.epochs,
            batch_size: fit.batch_size,
            learning_rate: fit.learning_rate,
            validation_split: fit.validation_split,
            seed: fit.seed,
            min_samples: 10,
            min_labels: 2,
        }
    }
}

impl TrainingSettings {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            validation_split: self.validation_split,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    /// Samples to gather per run when the caller gives no target.
    pub default_target: usize,
    /// Minimum spacing between accepted samples; 0 accepts every frame.
    pub sample_interval_ms: u64,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            default_target: 100,
            sample_interval_ms: 0,
        }
    }
}

impl CollectionSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingSettings {
    /// At or below this probability a prediction is reported as uncertain.
    pub confidence_threshold: f32,
    /// Probability a new label must exceed to be announced.
    pub announce_threshold: f32,
    pub announce_interval_ms: u64,
}

impl Default for TestingSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            announce_threshold: 0.6,
            announce_interval_ms: 1200,
        }
    }
}

impl TestingSettings {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Database file; defaults to one under the application root.
    pub database_path: Option<PathBuf>,
}

/// Resolve the settings file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(AppPaths::resolve()?.config_file())
}

/// Load settings from the default location, returning defaults if missing.
pub fn load_or_default() -> Result<Settings, ConfigError> {
    load_from(&config_path()?)
}

/// Load settings from `path`, returning defaults if the file does not exist.
pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist settings to the default location.
pub fn save(settings: &Settings) -> Result<(), ConfigError> {
    save_to_path(settings, &config_path()?)
}

/// Write settings to `path`, replacing any previous contents atomically.
pub fn save_to_path(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    let data = toml::to_string_pretty(settings).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, data.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

//! Locations of everything gesturelab writes to disk.
//!
//! All files hang off one `.gesturelab` root: `config.toml`, the SQLite
//! database, `logs/` and `exports/`. The root sits in the OS config directory
//! unless `GESTURELAB_CONFIG_HOME` names another parent.

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use thiserror::Error;

use crate::config::CONFIG_FILE_NAME;
use crate::storage::DATABASE_FILE_NAME;

/// Name of the application directory under the config parent.
pub const APP_DIR_NAME: &str = ".gesturelab";
/// Environment variable naming an alternative config parent.
pub const CONFIG_HOME_ENV: &str = "GESTURELAB_CONFIG_HOME";

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("No config directory available; set {CONFIG_HOME_ENV}")]
    NoBaseDir,
    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolved application root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// Resolve the root from the environment and create it.
    pub fn resolve() -> Result<Self, AppDirError> {
        let parent = config_parent().ok_or(AppDirError::NoBaseDir)?;
        Self::under(&parent)
    }

    /// Use `parent/.gesturelab` as the root, creating it.
    pub fn under(parent: &Path) -> Result<Self, AppDirError> {
        let root = create(parent.join(APP_DIR_NAME))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn database_file(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_NAME)
    }

    pub fn logs_dir(&self) -> Result<PathBuf, AppDirError> {
        create(self.root.join("logs"))
    }

    /// Default target for portable model exports.
    pub fn exports_dir(&self) -> Result<PathBuf, AppDirError> {
        create(self.root.join("exports"))
    }
}

fn config_parent() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_HOME_ENV) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf()),
    }
}

fn create(path: PathBuf) -> Result<PathBuf, AppDirError> {
    match std::fs::create_dir_all(&path) {
        Ok(()) => Ok(path),
        Err(source) => Err(AppDirError::CreateDir { path, source }),
    }
}

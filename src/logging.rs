//! Tracing setup: stdout plus one log file per run under `<app root>/logs`.
//!
//! Log file names carry a sortable timestamp, so pruning keeps the newest
//! files by name. `RUST_LOG` overrides the default `info` filter.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{AppDirError, AppPaths};

const LOG_FILE_PREFIX: &str = "gesturelab_";
/// Files kept in the log directory, including the one for this run.
const KEEP_LOG_FILES: usize = 10;
const DEFAULT_FILTER: &str = "info";

static ACTIVE: OnceLock<ActiveLog> = OnceLock::new();

struct ActiveLog {
    _guard: WorkerGuard,
    path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error(transparent)]
    Dirs(#[from] AppDirError),
    #[error("log directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not format log file timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("a global tracing subscriber is already installed: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber and return this run's log file.
///
/// Calling it again returns the same file.
pub fn init() -> Result<PathBuf, LoggingError> {
    if let Some(active) = ACTIVE.get() {
        return Ok(active.path.clone());
    }
    let dir = AppPaths::resolve()?.logs_dir()?;
    init_in(&dir)
}

fn init_in(dir: &Path) -> Result<PathBuf, LoggingError> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let file_name = log_file_name(now)?;
    let removed = prune_logs(dir, KEEP_LOG_FILES.saturating_sub(1))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, &file_name));

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let offset = now.offset();
    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_timer(OffsetTime::new(offset, Rfc3339)))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(OffsetTime::new(offset, Rfc3339))
                .with_writer(writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;

    let path = dir.join(&file_name);
    let _ = ACTIVE.set(ActiveLog {
        _guard: guard,
        path: path.clone(),
    });
    tracing::debug!(removed, "Logging to {}", path.display());
    Ok(path)
}

fn log_file_name(now: OffsetDateTime) -> Result<String, LoggingError> {
    let stamp = now.format(format_description!(
        "[year]-[month]-[day]_[hour]-[minute]-[second]"
    ))?;
    Ok(format!("{LOG_FILE_PREFIX}{stamp}.log"))
}

fn is_log_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log") && path.is_file()
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LoggingError {
    let path = path.to_path_buf();
    move |source| LoggingError::Io { path, source }
}

/// Delete the oldest log files so at most `keep` remain; returns how many went.
fn prune_logs(dir: &Path, keep: usize) -> Result<usize, LoggingError> {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_error(dir))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_log_file(path))
        .collect();
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for path in &logs[..excess] {
        fs::remove_file(path).map_err(io_error(path))?;
    }
    Ok(excess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_file_name_is_sortable_timestamp() {
        let fixed = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(
            log_file_name(fixed).unwrap(),
            "gesturelab_2023-11-14_22-13-20.log"
        );
    }

    #[test]
    fn prune_removes_oldest_names_only() {
        let dir = tempdir().unwrap();
        for day in 1..=5 {
            let name = format!("gesturelab_2024-01-0{day}_00-00-00.log");
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::write(dir.path().join("notes.log"), "").unwrap();
        fs::write(dir.path().join("gesturelab_notes.txt"), "").unwrap();

        assert_eq!(prune_logs(dir.path(), 2).unwrap(), 3);
        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            [
                "gesturelab_2024-01-04_00-00-00.log",
                "gesturelab_2024-01-05_00-00-00.log",
                "gesturelab_notes.txt",
                "notes.log",
            ]
        );
    }

    #[test]
    fn prune_with_room_keeps_everything() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("gesturelab_a.log"), "").unwrap();
        assert_eq!(prune_logs(dir.path(), 9).unwrap(), 0);
    }
}

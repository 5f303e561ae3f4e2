//! Library exports for reuse in benchmarks and tests.
/// Application directory resolution.
pub mod app_dirs;
/// Classifier lifecycle: create, train, predict, persist.
pub mod classifier;
/// TOML settings.
pub mod config;
/// Per-label gesture samples and their persistence.
pub mod dataset;
/// Pose-detector seam and replay detectors.
pub mod detector;
/// Hand landmarks and sample encoding.
pub mod encoder;
/// Atomic file writes.
pub mod fs_ops;
/// Tracing setup.
pub mod logging;
/// Feed-forward network and evaluation metrics.
pub mod ml;
/// Collect / train / test state machine.
pub mod session;
/// Durable document and model storage.
pub mod storage;

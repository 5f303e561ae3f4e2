//! Machine learning building blocks: a small dense network and its metrics.

pub mod metrics;
pub mod mlp;

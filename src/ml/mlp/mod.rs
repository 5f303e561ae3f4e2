//! Dense feed-forward classifier for landmark feature vectors.

mod model;
mod train;

pub use model::{Activation, DenseLayer, MODEL_FORMAT_VERSION, MlpModel, ModelError, softmax};
pub use train::{EpochLogs, FitError, FitOptions, TrainHistory, argmax, fit};

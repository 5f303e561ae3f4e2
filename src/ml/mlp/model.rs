use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version stamped into serialized models.
pub const MODEL_FORMAT_VERSION: i64 = 1;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("invalid model shape: {0}")]
    InvalidShape(String),
    #[error("expected {expected} input values, got {actual}")]
    InputLength { expected: usize, actual: usize },
    #[error("unsupported model format version {0}")]
    UnsupportedVersion(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Softmax,
}

impl Activation {
    fn name(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Softmax => "softmax",
        }
    }
}

/// Fully connected layer; `weights` is row-major with one row per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub input_size: usize,
    pub units: usize,
    pub activation: Activation,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl DenseLayer {
    /// Glorot-uniform weights, zero bias.
    pub fn new(input_size: usize, units: usize, activation: Activation, rng: &mut impl Rng) -> Self {
        let limit = (6.0 / (input_size + units) as f32).sqrt();
        let weights = (0..input_size * units)
            .map(|_| rng.random_range(-limit..limit))
            .collect();
        Self {
            input_size,
            units,
            activation,
            weights,
            bias: vec![0.0; units],
        }
    }

    pub fn param_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    /// Compute this layer's activated output for `input`.
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.units];
        for (u, value) in out.iter_mut().enumerate() {
            let row = &self.weights[u * self.input_size..(u + 1) * self.input_size];
            let mut sum = self.bias[u];
            for (w, x) in row.iter().zip(input) {
                sum += w * x;
            }
            *value = sum;
        }
        match self.activation {
            Activation::Relu => {
                for value in &mut out {
                    *value = value.max(0.0);
                }
                out
            }
            Activation::Softmax => softmax(&out),
        }
    }
}

/// Trained (or freshly initialized) network plus everything needed to run it.
///
/// `labels` maps output units to gesture names and travels with the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpModel {
    pub format_version: i64,
    pub input_size: usize,
    #[serde(default)]
    pub labels: Vec<String>,
    pub layers: Vec<DenseLayer>,
    pub feature_mean: Vec<f32>,
    pub feature_std: Vec<f32>,
}

impl MlpModel {
    /// Build an untrained network: ReLU hidden layers and a softmax head.
    pub fn new(
        input_size: usize,
        hidden: &[usize],
        num_classes: usize,
        seed: u64,
    ) -> Result<Self, ModelError> {
        if input_size == 0 || num_classes == 0 {
            return Err(ModelError::InvalidShape(format!(
                "input size {input_size} and class count {num_classes} must be positive"
            )));
        }
        if hidden.contains(&0) {
            return Err(ModelError::InvalidShape(
                "hidden layers must have at least one unit".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input_size;
        for &units in hidden {
            layers.push(DenseLayer::new(fan_in, units, Activation::Relu, &mut rng));
            fan_in = units;
        }
        layers.push(DenseLayer::new(
            fan_in,
            num_classes,
            Activation::Softmax,
            &mut rng,
        ));
        Ok(Self {
            format_version: MODEL_FORMAT_VERSION,
            input_size,
            labels: Vec::new(),
            layers,
            feature_mean: vec![0.0; input_size],
            feature_std: vec![1.0; input_size],
        })
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(|layer| layer.units).unwrap_or(0)
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(DenseLayer::param_count).sum()
    }

    /// Check that every stored vector agrees with the declared shapes.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion(self.format_version));
        }
        if self.layers.is_empty() {
            return Err(ModelError::InvalidShape("model has no layers".to_string()));
        }
        if self.feature_mean.len() != self.input_size || self.feature_std.len() != self.input_size
        {
            return Err(ModelError::InvalidShape(
                "feature statistics length mismatch".to_string(),
            ));
        }
        let mut fan_in = self.input_size;
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.input_size != fan_in {
                return Err(ModelError::InvalidShape(format!(
                    "layer {idx} expects {} inputs, previous layer yields {fan_in}",
                    layer.input_size
                )));
            }
            if layer.weights.len() != layer.input_size * layer.units
                || layer.bias.len() != layer.units
            {
                return Err(ModelError::InvalidShape(format!(
                    "layer {idx} weight length mismatch"
                )));
            }
            fan_in = layer.units;
        }
        if !self.labels.is_empty() && self.labels.len() != self.output_size() {
            return Err(ModelError::InvalidShape(format!(
                "{} labels for {} outputs",
                self.labels.len(),
                self.output_size()
            )));
        }
        Ok(())
    }

    /// Standardize a raw feature row with the stored statistics.
    pub fn normalize(&self, features: &[f32]) -> Vec<f32> {
        features
            .iter()
            .zip(self.feature_mean.iter().zip(&self.feature_std))
            .map(|(x, (mean, std))| (x - mean) / std)
            .collect()
    }

    /// Activations of every layer, starting with the normalized input.
    pub(crate) fn forward_trace(&self, normalized: Vec<f32>) -> Vec<Vec<f32>> {
        let mut trace = Vec::with_capacity(self.layers.len() + 1);
        trace.push(normalized);
        for layer in &self.layers {
            let next = layer.forward(&trace[trace.len() - 1]);
            trace.push(next);
        }
        trace
    }

    /// Class probabilities for one raw feature row.
    pub fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>, ModelError> {
        if features.len() != self.input_size {
            return Err(ModelError::InputLength {
                expected: self.input_size,
                actual: features.len(),
            });
        }
        let mut trace = self.forward_trace(self.normalize(features));
        Ok(trace.pop().unwrap_or_default())
    }

    /// Layer table with output shapes and parameter counts.
    pub fn summary(&self) -> String {
        let rule = "_".repeat(60);
        let mut out = format!(
            "{rule}\n{:<28}{:<18}{:>14}\n{}\n",
            "Layer (type)",
            "Output shape",
            "Param #",
            "=".repeat(60)
        );
        for (idx, layer) in self.layers.iter().enumerate() {
            out.push_str(&format!(
                "{:<28}{:<18}{:>14}\n",
                format!("dense_{} ({})", idx + 1, layer.activation.name()),
                format!("[batch,{}]", layer.units),
                layer.param_count()
            ));
        }
        out.push_str(&format!("{}\n", "=".repeat(60)));
        out.push_str(&format!("Total params: {}\n", self.param_count()));
        out.push_str(&format!("Input features: {}\n", self.input_size));
        if self.labels.is_empty() {
            out.push_str("Labels: (untrained)\n");
        } else {
            out.push_str(&format!("Labels: {}\n", self.labels.join(", ")));
        }
        out.push_str(&rule);
        out.push('\n');
        out
    }
}

/// Numerically stable softmax; a degenerate input yields a uniform distribution.
pub fn softmax(raw: &[f32]) -> Vec<f32> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if !sum.is_finite() || sum == 0.0 {
        return vec![1.0 / raw.len() as f32; raw.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}

use rand::rngs::StdRng;
use rand::{SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Activation, MlpModel};

/// Hyperparameters for [`fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Fraction of rows held out for validation.
    pub validation_split: f32,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 16,
            learning_rate: 0.001,
            validation_split: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("training set is empty")]
    Empty,
    #[error("{features} feature rows but {targets} target rows")]
    RowMismatch { features: usize, targets: usize },
    #[error("row {row} has {actual} values (expected {expected})")]
    RowLength {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("loss became non-finite at epoch {epoch}")]
    Diverged { epoch: usize },
}

/// Metrics reported after every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Per-epoch series plus the rows held out for validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainHistory {
    pub epochs: Vec<EpochLogs>,
    pub validation_rows: Vec<usize>,
}

impl TrainHistory {
    pub fn loss(&self) -> Vec<f32> {
        self.epochs.iter().map(|logs| logs.loss).collect()
    }

    pub fn accuracy(&self) -> Vec<f32> {
        self.epochs.iter().map(|logs| logs.accuracy).collect()
    }

    pub fn last(&self) -> Option<&EpochLogs> {
        self.epochs.last()
    }
}

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-7;

struct AdamState {
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
    step: i32,
}

impl AdamState {
    /// One moment buffer per parameter tensor: weights then bias for each layer.
    fn new(model: &MlpModel) -> Self {
        let sizes: Vec<usize> = model
            .layers
            .iter()
            .flat_map(|layer| [layer.weights.len(), layer.bias.len()])
            .collect();
        Self {
            m: sizes.iter().map(|&n| vec![0.0; n]).collect(),
            v: sizes.iter().map(|&n| vec![0.0; n]).collect(),
            step: 0,
        }
    }

    fn apply(&mut self, model: &mut MlpModel, grads: &[Vec<f32>], learning_rate: f32) {
        self.step += 1;
        let correction1 = 1.0 - ADAM_BETA1.powi(self.step);
        let correction2 = 1.0 - ADAM_BETA2.powi(self.step);
        let params = model
            .layers
            .iter_mut()
            .flat_map(|layer| [&mut layer.weights, &mut layer.bias]);
        for (slot, param) in params.enumerate() {
            let (m, v, g) = (&mut self.m[slot], &mut self.v[slot], &grads[slot]);
            for i in 0..param.len() {
                m[i] = ADAM_BETA1 * m[i] + (1.0 - ADAM_BETA1) * g[i];
                v[i] = ADAM_BETA2 * v[i] + (1.0 - ADAM_BETA2) * g[i] * g[i];
                let m_hat = m[i] / correction1;
                let v_hat = v[i] / correction2;
                param[i] -= learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
            }
        }
    }
}

/// Fit `model` to one-hot `targets` with mini-batch Adam and cross-entropy.
///
/// Feature statistics are recomputed from the training rows. `on_epoch` is
/// called as `(epoch_index, total_epochs, logs)` after every epoch.
pub fn fit(
    model: &mut MlpModel,
    features: &[Vec<f32>],
    targets: &[Vec<f32>],
    options: &FitOptions,
    mut on_epoch: impl FnMut(usize, usize, &EpochLogs),
) -> Result<TrainHistory, FitError> {
    validate_inputs(model, features, targets)?;
    let n = features.len();
    let mut rng = StdRng::seed_from_u64(options.seed);

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rng);
    let split = options.validation_split.clamp(0.0, 0.9);
    let n_val = ((n as f32 * split).floor() as usize).min(n - 1);
    let validation_rows = order.split_off(n - n_val);
    let mut train_rows = order;

    let (mean, std) = feature_mean_std(features, &train_rows, model.input_size);
    model.feature_mean = mean;
    model.feature_std = std;

    let normalized: Vec<Vec<f32>> = features.iter().map(|row| model.normalize(row)).collect();
    let batch_size = options.batch_size.max(1);
    let mut adam = AdamState::new(model);
    let mut history = TrainHistory {
        epochs: Vec::with_capacity(options.epochs),
        validation_rows: validation_rows.clone(),
    };

    for epoch in 0..options.epochs {
        train_rows.shuffle(&mut rng);
        for batch in train_rows.chunks(batch_size) {
            let grads = batch_gradients(model, &normalized, targets, batch);
            adam.apply(model, &grads, options.learning_rate);
        }

        let (loss, accuracy) = evaluate_rows(model, &normalized, targets, &train_rows);
        if !loss.is_finite() {
            return Err(FitError::Diverged { epoch });
        }
        let (val_loss, val_accuracy) = if validation_rows.is_empty() {
            (None, None)
        } else {
            let (loss, acc) = evaluate_rows(model, &normalized, targets, &validation_rows);
            (Some(loss), Some(acc))
        };
        let logs = EpochLogs {
            loss,
            accuracy,
            val_loss,
            val_accuracy,
        };
        on_epoch(epoch, options.epochs, &logs);
        history.epochs.push(logs);
    }
    Ok(history)
}

fn validate_inputs(
    model: &MlpModel,
    features: &[Vec<f32>],
    targets: &[Vec<f32>],
) -> Result<(), FitError> {
    if features.is_empty() {
        return Err(FitError::Empty);
    }
    if features.len() != targets.len() {
        return Err(FitError::RowMismatch {
            features: features.len(),
            targets: targets.len(),
        });
    }
    let outputs = model.output_size();
    for (row, (x, y)) in features.iter().zip(targets).enumerate() {
        if x.len() != model.input_size {
            return Err(FitError::RowLength {
                row,
                expected: model.input_size,
                actual: x.len(),
            });
        }
        if y.len() != outputs {
            return Err(FitError::RowLength {
                row,
                expected: outputs,
                actual: y.len(),
            });
        }
    }
    Ok(())
}

/// Mean gradient over a batch, laid out like [`AdamState`] slots.
fn batch_gradients(
    model: &MlpModel,
    normalized: &[Vec<f32>],
    targets: &[Vec<f32>],
    batch: &[usize],
) -> Vec<Vec<f32>> {
    let mut grads: Vec<Vec<f32>> = model
        .layers
        .iter()
        .flat_map(|layer| [vec![0.0; layer.weights.len()], vec![0.0; layer.bias.len()]])
        .collect();
    for &row in batch {
        let trace = model.forward_trace(normalized[row].clone());
        let output = &trace[trace.len() - 1];
        // Softmax with cross-entropy: dL/dz = p - y.
        let mut delta: Vec<f32> = output
            .iter()
            .zip(&targets[row])
            .map(|(p, y)| p - y)
            .collect();
        for l in (0..model.layers.len()).rev() {
            let layer = &model.layers[l];
            let input = &trace[l];
            let (w_slot, b_slot) = (2 * l, 2 * l + 1);
            for u in 0..layer.units {
                let d = delta[u];
                if d == 0.0 {
                    continue;
                }
                grads[b_slot][u] += d;
                let base = u * layer.input_size;
                for i in 0..layer.input_size {
                    grads[w_slot][base + i] += d * input[i];
                }
            }
            if l == 0 {
                break;
            }
            let mut prev = vec![0.0f32; layer.input_size];
            for u in 0..layer.units {
                let d = delta[u];
                let base = u * layer.input_size;
                for i in 0..layer.input_size {
                    prev[i] += layer.weights[base + i] * d;
                }
            }
            if model.layers[l - 1].activation == Activation::Relu {
                for (grad, act) in prev.iter_mut().zip(input) {
                    if *act <= 0.0 {
                        *grad = 0.0;
                    }
                }
            }
            delta = prev;
        }
    }
    let scale = 1.0 / batch.len().max(1) as f32;
    for grad in &mut grads {
        for value in grad.iter_mut() {
            *value *= scale;
        }
    }
    grads
}

/// Mean cross-entropy and accuracy over `rows`.
fn evaluate_rows(
    model: &MlpModel,
    normalized: &[Vec<f32>],
    targets: &[Vec<f32>],
    rows: &[usize],
) -> (f32, f32) {
    if rows.is_empty() {
        return (0.0, 0.0);
    }
    let mut loss = 0.0f32;
    let mut correct = 0usize;
    for &row in rows {
        let mut trace = model.forward_trace(normalized[row].clone());
        let probs = trace.pop().unwrap_or_default();
        let target = &targets[row];
        for (p, y) in probs.iter().zip(target) {
            if *y > 0.0 {
                loss -= y * p.max(1e-7).ln();
            }
        }
        if argmax(&probs) == argmax(target) {
            correct += 1;
        }
    }
    let n = rows.len() as f32;
    (loss / n, correct as f32 / n)
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = idx;
        }
    }
    best
}

/// Per-feature mean and standard deviation over the selected rows.
///
/// Constant features get a std of 1 so they pass through centered.
fn feature_mean_std(rows: &[Vec<f32>], selected: &[usize], d: usize) -> (Vec<f32>, Vec<f32>) {
    let n = selected.len().max(1) as f32;
    let mut mean = vec![0.0f32; d];
    for &idx in selected {
        for (m, x) in mean.iter_mut().zip(&rows[idx]) {
            *m += x;
        }
    }
    for v in &mut mean {
        *v /= n;
    }
    let mut var = vec![0.0f32; d];
    for &idx in selected {
        for i in 0..d {
            let diff = rows[idx][i] - mean[i];
            var[i] += diff * diff;
        }
    }
    let std = var
        .into_iter()
        .map(|v| {
            let std = (v / n).sqrt();
            if std < 1e-6 { 1.0 } else { std }
        })
        .collect();
    (mean, std)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two well separated clusters in 4-d space.
    fn clusters(per_class: usize) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for i in 0..per_class {
            let jitter = (i % 5) as f32 * 0.01;
            xs.push(vec![0.1 + jitter, 0.2, 0.1, 0.2 - jitter]);
            ys.push(vec![1.0, 0.0]);
        }
        for i in 0..per_class {
            let jitter = (i % 5) as f32 * 0.01;
            xs.push(vec![0.9 - jitter, 0.8, 0.9, 0.8 + jitter]);
            ys.push(vec![0.0, 1.0]);
        }
        (xs, ys)
    }

    #[test]
    fn fit_separates_clusters_and_reports_every_epoch() {
        let (xs, ys) = clusters(20);
        let mut model = MlpModel::new(4, &[8], 2, 3).unwrap();
        let options = FitOptions {
            epochs: 60,
            learning_rate: 0.01,
            ..FitOptions::default()
        };
        let mut calls = Vec::new();
        let history = fit(&mut model, &xs, &ys, &options, |epoch, total, _| {
            calls.push((epoch, total));
        })
        .unwrap();
        assert_eq!(calls.len(), 60);
        assert_eq!(calls[0], (0, 60));
        assert_eq!(calls[59], (59, 60));
        assert_eq!(history.validation_rows.len(), 8);
        let first = history.epochs[0].loss;
        let last = history.last().unwrap();
        assert!(last.loss < first);
        assert!(last.accuracy > 0.95);
        assert!(last.val_accuracy.unwrap() > 0.95);
        let left = model.predict_proba(&[0.1, 0.2, 0.1, 0.2]).unwrap();
        assert!(left[0] > 0.5);
    }

    #[test]
    fn fit_is_deterministic_for_a_seed() {
        let (xs, ys) = clusters(6);
        let options = FitOptions {
            epochs: 3,
            ..FitOptions::default()
        };
        let mut a = MlpModel::new(4, &[8], 2, 3).unwrap();
        let mut b = MlpModel::new(4, &[8], 2, 3).unwrap();
        let ha = fit(&mut a, &xs, &ys, &options, |_, _, _| {}).unwrap();
        let hb = fit(&mut b, &xs, &ys, &options, |_, _, _| {}).unwrap();
        assert_eq!(a, b);
        assert_eq!(ha, hb);
    }

    #[test]
    fn fit_rejects_shape_errors() {
        let mut model = MlpModel::new(4, &[8], 2, 3).unwrap();
        let options = FitOptions::default();
        assert_eq!(
            fit(&mut model, &[], &[], &options, |_, _, _| {}),
            Err(FitError::Empty)
        );
        assert_eq!(
            fit(&mut model, &[vec![0.0; 4]], &[], &options, |_, _, _| {}),
            Err(FitError::RowMismatch {
                features: 1,
                targets: 0
            })
        );
        assert!(matches!(
            fit(&mut model, &[vec![0.0; 3]], &[vec![1.0, 0.0]], &options, |_, _, _| {}),
            Err(FitError::RowLength { row: 0, .. })
        ));
        assert!(matches!(
            fit(&mut model, &[vec![0.0; 4]], &[vec![1.0, 0.0, 0.0]], &options, |_, _, _| {}),
            Err(FitError::RowLength { expected: 2, .. })
        ));
    }

    #[test]
    fn single_row_keeps_it_for_training() {
        let mut model = MlpModel::new(4, &[2], 2, 0).unwrap();
        let options = FitOptions {
            epochs: 1,
            validation_split: 0.5,
            ..FitOptions::default()
        };
        let history = fit(&mut model, &[vec![1.0; 4]], &[vec![1.0, 0.0]], &options, |_, _, _| {}).unwrap();
        assert!(history.validation_rows.is_empty());
        assert_eq!(history.last().unwrap().val_loss, None);
    }

    #[test]
    fn constant_features_get_unit_std() {
        let rows = vec![vec![2.0, 1.0], vec![2.0, 3.0]];
        let (mean, std) = feature_mean_std(&rows, &[0, 1], 2);
        assert_eq!(mean, vec![2.0, 2.0]);
        assert_eq!(std, vec![1.0, 1.0]);
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
    }
}

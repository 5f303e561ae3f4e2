//! Classifier lifecycle: create, train, predict, save/load and export.
//!
//! The trained artifact is a JSON-serialized [`MlpModel`] that includes the
//! ordered label list, so a restored model knows which output is which.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::dataset::TrainingData;
use crate::encoder::SAMPLE_LEN;
use crate::fs_ops::write_atomic;
use crate::ml::metrics::{ConfusionMatrix, EvaluationReport};
use crate::ml::mlp::{
    EpochLogs, FitError, FitOptions, MlpModel, ModelError, TrainHistory, argmax, fit,
};
use crate::storage::{ModelStore, StorageError};

/// Identifier the trained model is stored under.
pub const MODEL_ID: &str = "gesture-model";
/// File name used for portable exports.
pub const EXPORT_FILE_NAME: &str = "gesture-model.json";
/// Hidden layer widths between the input and the softmax head.
pub const HIDDEN_LAYERS: [usize; 3] = [64, 32, 16];
/// Placeholder returned by [`Classifier::describe`] when no model exists.
pub const NO_MODEL_DESCRIPTION: &str = "No model available";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("no model available: {0}")]
    NotReady(&'static str),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("training data has {labels} labels but the model has {outputs} outputs")]
    ClassMismatch { labels: usize, outputs: usize },
    #[error("training failed: {0}")]
    Training(#[from] FitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid model artifact: {0}")]
    Artifact(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Export {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Owner of the current model and its persistence.
pub struct Classifier {
    model: Option<MlpModel>,
    trained: bool,
    training: bool,
    store: Box<dyn ModelStore>,
    seed: u64,
}

impl Classifier {
    pub fn new(store: Box<dyn ModelStore>) -> Self {
        Self {
            model: None,
            trained: false,
            training: false,
            store,
            seed: FitOptions::default().seed,
        }
    }

    /// Seed used for weight initialization of subsequently created models.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Labels aligned with output units; empty until trained or restored.
    pub fn labels(&self) -> &[String] {
        self.model
            .as_ref()
            .map(|model| model.labels.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the model's labels are exactly `labels`, in order.
    pub fn labels_match(&self, labels: &[String]) -> bool {
        self.trained && self.labels() == labels
    }

    /// Replace any held model with an untrained one.
    pub fn create(&mut self, input_size: usize, num_classes: usize) -> Result<(), ClassifierError> {
        let model = MlpModel::new(input_size, &HIDDEN_LAYERS, num_classes, self.seed)?;
        info!(input_size, num_classes, "Created classifier");
        self.model = Some(model);
        self.trained = false;
        Ok(())
    }

    /// Fit the held model to `data`.
    ///
    /// The fit runs on a copy; the held model is only replaced on success.
    pub fn train(
        &mut self,
        data: &TrainingData,
        options: &FitOptions,
        progress: impl FnMut(usize, usize, &EpochLogs),
    ) -> Result<TrainHistory, ClassifierError> {
        let Some(current) = self.model.as_ref() else {
            return Err(ClassifierError::NotReady("create a model before training"));
        };
        if data.labels.len() != current.output_size() {
            return Err(ClassifierError::ClassMismatch {
                labels: data.labels.len(),
                outputs: current.output_size(),
            });
        }
        let candidate = current.clone();
        self.fit_candidate(candidate, data, options, progress)
    }

    /// Fit a newly initialized model to `data` and install it on success.
    ///
    /// Any held model stays in place if fitting fails.
    pub fn train_fresh(
        &mut self,
        data: &TrainingData,
        options: &FitOptions,
        progress: impl FnMut(usize, usize, &EpochLogs),
    ) -> Result<TrainHistory, ClassifierError> {
        let candidate = MlpModel::new(SAMPLE_LEN, &HIDDEN_LAYERS, data.labels.len(), self.seed)?;
        info!(
            input_size = SAMPLE_LEN,
            num_classes = data.labels.len(),
            "Created classifier"
        );
        self.fit_candidate(candidate, data, options, progress)
    }

    fn fit_candidate(
        &mut self,
        mut candidate: MlpModel,
        data: &TrainingData,
        options: &FitOptions,
        progress: impl FnMut(usize, usize, &EpochLogs),
    ) -> Result<TrainHistory, ClassifierError> {
        self.training = true;
        let result = fit(&mut candidate, &data.features, &data.one_hot, options, progress);
        self.training = false;
        let history = result?;
        candidate.labels = data.labels.clone();
        self.model = Some(candidate);
        self.trained = true;
        if let Some(last) = history.last() {
            info!(
                epochs = history.epochs.len(),
                loss = last.loss,
                accuracy = last.accuracy,
                "Training finished"
            );
        }
        Ok(history)
    }

    fn trained_model(&self) -> Result<&MlpModel, ClassifierError> {
        match (&self.model, self.trained) {
            (Some(model), true) => Ok(model),
            _ => Err(ClassifierError::NotReady("train or load a model first")),
        }
    }

    /// Probability per class index for one encoded sample.
    pub fn predict_one(&self, sample: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        let model = self.trained_model()?;
        Ok(model.predict_proba(sample)?)
    }

    /// Confusion-matrix evaluation on the given rows.
    pub fn evaluate(
        &self,
        data: &TrainingData,
        rows: &[usize],
    ) -> Result<EvaluationReport, ClassifierError> {
        let model = self.trained_model()?;
        let mut confusion = ConfusionMatrix::new(model.output_size());
        for &row in rows {
            let (Some(features), Some(&truth)) = (data.features.get(row), data.class_indices.get(row))
            else {
                continue;
            };
            let probs = model.predict_proba(features)?;
            confusion.add(truth, argmax(&probs));
        }
        Ok(EvaluationReport::from_confusion(confusion, &model.labels))
    }

    fn artifact(&self, pretty: bool) -> Result<String, ClassifierError> {
        let model = self.trained_model()?;
        let text = if pretty {
            serde_json::to_string_pretty(model)?
        } else {
            serde_json::to_string(model)?
        };
        Ok(text)
    }

    /// Save the trained model under [`MODEL_ID`].
    pub fn persist(&mut self) -> Result<(), ClassifierError> {
        let artifact = self.artifact(false)?;
        self.store.save_model(MODEL_ID, &artifact)?;
        info!("Saved model as {MODEL_ID}");
        Ok(())
    }

    /// Load the model saved under [`MODEL_ID`]; `false` if none is usable.
    pub fn restore(&mut self) -> bool {
        let artifact = match self.store.load_model(MODEL_ID) {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                info!("No saved model found");
                return false;
            }
            Err(err) => {
                warn!("Error loading model: {err}");
                return false;
            }
        };
        let model = match serde_json::from_str::<MlpModel>(&artifact) {
            Ok(model) => model,
            Err(err) => {
                warn!("Saved model is unreadable: {err}");
                return false;
            }
        };
        if let Err(err) = model.validate() {
            warn!("Saved model is invalid: {err}");
            return false;
        }
        if model.input_size != SAMPLE_LEN || model.labels.is_empty() {
            warn!(
                input_size = model.input_size,
                labels = model.labels.len(),
                "Saved model does not match the gesture sample layout"
            );
            return false;
        }
        info!(labels = ?model.labels, "Loaded saved model");
        self.model = Some(model);
        self.trained = true;
        true
    }

    /// Write the trained model as pretty JSON into `dir`.
    pub fn export_portable(&self, dir: &Path) -> Result<PathBuf, ClassifierError> {
        let artifact = self.artifact(true)?;
        let path = dir.join(EXPORT_FILE_NAME);
        write_atomic(&path, artifact.as_bytes()).map_err(|source| ClassifierError::Export {
            path: path.clone(),
            source,
        })?;
        info!("Exported model to {}", path.display());
        Ok(path)
    }

    /// Architecture summary, or a placeholder without a model.
    pub fn describe(&self) -> String {
        match &self.model {
            Some(model) => model.summary(),
            None => NO_MODEL_DESCRIPTION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tempfile::tempdir;

    fn two_class_data() -> TrainingData {
        let mut features = Vec::new();
        let mut class_indices = Vec::new();
        let mut one_hot = Vec::new();
        for class in 0..2usize {
            for i in 0..8 {
                let base = if class == 0 { 0.2 } else { 0.8 };
                features.push(
                    (0..SAMPLE_LEN)
                        .map(|j| base + ((i + j) % 3) as f32 * 0.01)
                        .collect(),
                );
                class_indices.push(class);
                let mut target = vec![0.0; 2];
                target[class] = 1.0;
                one_hot.push(target);
            }
        }
        TrainingData {
            features,
            class_indices,
            one_hot,
            labels: vec!["open".to_string(), "closed".to_string()],
        }
    }

    fn quick_options() -> FitOptions {
        FitOptions {
            epochs: 60,
            learning_rate: 0.01,
            ..FitOptions::default()
        }
    }

    fn trained(store: MemoryStore) -> Classifier {
        let mut classifier = Classifier::new(Box::new(store));
        classifier.create(SAMPLE_LEN, 2).unwrap();
        classifier
            .train(&two_class_data(), &quick_options(), |_, _, _| {})
            .unwrap();
        classifier
    }

    #[test]
    fn predict_before_create_is_not_ready() {
        let classifier = Classifier::new(Box::new(MemoryStore::new()));
        assert!(matches!(
            classifier.predict_one(&[0.0; SAMPLE_LEN]),
            Err(ClassifierError::NotReady(_))
        ));
    }

    #[test]
    fn predict_after_create_but_before_train_is_not_ready() {
        let mut classifier = Classifier::new(Box::new(MemoryStore::new()));
        classifier.create(SAMPLE_LEN, 2).unwrap();
        assert!(matches!(
            classifier.predict_one(&[0.0; SAMPLE_LEN]),
            Err(ClassifierError::NotReady(_))
        ));
    }

    #[test]
    fn failed_fresh_training_keeps_previous_model() {
        let mut classifier = trained(MemoryStore::new());
        let sample = two_class_data().features[0].clone();
        let before = classifier.predict_one(&sample).unwrap();

        let mut broken = two_class_data();
        broken.features[3].truncate(10);
        let result = classifier.train_fresh(&broken, &quick_options(), |_, _, _| {});

        assert!(matches!(
            result,
            Err(ClassifierError::Training(FitError::RowLength { row: 3, .. }))
        ));
        assert!(classifier.is_trained());
        assert!(!classifier.is_training());
        assert_eq!(classifier.labels(), ["open", "closed"]);
        assert_eq!(classifier.predict_one(&sample).unwrap(), before);
    }

    #[test]
    fn fresh_training_replaces_model_and_labels() {
        let mut classifier = trained(MemoryStore::new());
        let mut data = two_class_data();
        data.labels = vec!["wave".to_string(), "fist".to_string()];
        classifier
            .train_fresh(&data, &quick_options(), |_, _, _| {})
            .unwrap();
        assert!(classifier.is_trained());
        assert_eq!(classifier.labels(), ["wave", "fist"]);
    }

    #[test]
    fn train_without_model_is_not_ready() {
        let mut classifier = Classifier::new(Box::new(MemoryStore::new()));
        let result = classifier.train(&two_class_data(), &quick_options(), |_, _, _| {});
        assert!(matches!(result, Err(ClassifierError::NotReady(_))));
        assert!(!classifier.is_training());
    }

    #[test]
    fn create_rejects_non_positive_sizes() {
        let mut classifier = Classifier::new(Box::new(MemoryStore::new()));
        assert!(classifier.create(0, 2).is_err());
        assert!(classifier.create(SAMPLE_LEN, 0).is_err());
        assert!(!classifier.has_model());
    }

    #[test]
    fn train_reports_progress_and_predicts() {
        let mut classifier = Classifier::new(Box::new(MemoryStore::new()));
        classifier.create(SAMPLE_LEN, 2).unwrap();
        let mut epochs_seen = 0;
        let history = classifier
            .train(&two_class_data(), &quick_options(), |_, total, _| {
                assert_eq!(total, 60);
                epochs_seen += 1;
            })
            .unwrap();
        assert_eq!(epochs_seen, 60);
        assert_eq!(history.loss().len(), 60);
        assert!(!classifier.is_training());
        let probs = classifier.predict_one(&[0.8; SAMPLE_LEN]).unwrap();
        assert_eq!(probs.len(), 2);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert!(probs[1] > probs[0]);
        assert_eq!(classifier.labels(), ["open".to_string(), "closed".to_string()]);
    }

    #[test]
    fn class_mismatch_leaves_model_untrained() {
        let mut classifier = Classifier::new(Box::new(MemoryStore::new()));
        classifier.create(SAMPLE_LEN, 3).unwrap();
        let result = classifier.train(&two_class_data(), &quick_options(), |_, _, _| {});
        assert!(matches!(result, Err(ClassifierError::ClassMismatch { .. })));
        assert!(!classifier.is_trained());
    }

    #[test]
    fn persist_and_restore_carry_labels() {
        let store = MemoryStore::new();
        let mut original = trained(store.clone());
        original.persist().unwrap();

        let mut restored = Classifier::new(Box::new(store));
        assert!(restored.restore());
        assert_eq!(restored.labels(), original.labels());
        let sample = [0.2; SAMPLE_LEN];
        assert_eq!(
            restored.predict_one(&sample).unwrap(),
            original.predict_one(&sample).unwrap()
        );
        assert!(restored.labels_match(&["open".to_string(), "closed".to_string()]));
        assert!(!restored.labels_match(&["closed".to_string(), "open".to_string()]));
    }

    #[test]
    fn restore_without_saved_model_returns_false() {
        let mut classifier = Classifier::new(Box::new(MemoryStore::new()));
        assert!(!classifier.restore());
        assert!(!classifier.is_trained());
    }

    #[test]
    fn restore_rejects_corrupt_artifacts() {
        let mut store = MemoryStore::new();
        store.save_model(MODEL_ID, "{\"not\": \"a model\"}").unwrap();
        let mut classifier = Classifier::new(Box::new(store));
        assert!(!classifier.restore());
    }

    #[test]
    fn persist_requires_trained_model() {
        let mut classifier = Classifier::new(Box::new(MemoryStore::new()));
        assert!(matches!(
            classifier.persist(),
            Err(ClassifierError::NotReady(_))
        ));
    }

    #[test]
    fn export_writes_portable_file() {
        let dir = tempdir().unwrap();
        let classifier = trained(MemoryStore::new());
        let path = classifier.export_portable(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(EXPORT_FILE_NAME));
        let text = std::fs::read_to_string(&path).unwrap();
        let model: MlpModel = serde_json::from_str(&text).unwrap();
        assert_eq!(model.labels, vec!["open".to_string(), "closed".to_string()]);
    }

    #[test]
    fn evaluate_counts_selected_rows() {
        let classifier = trained(MemoryStore::new());
        let data = two_class_data();
        let report = classifier.evaluate(&data, &[0, 1, 8, 9, 100]).unwrap();
        assert_eq!(report.confusion.total(), 4);
        assert!(report.accuracy > 0.9);
    }

    #[test]
    fn describe_has_placeholder() {
        let mut classifier = Classifier::new(Box::new(MemoryStore::new()));
        assert_eq!(classifier.describe(), NO_MODEL_DESCRIPTION);
        classifier.create(SAMPLE_LEN, 2).unwrap();
        assert!(classifier.describe().contains("dense_4"));
    }
}

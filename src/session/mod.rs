//! Session controller: one explicit state instead of scattered UI flags.
//!
//! The controller owns the dataset store and the classifier and moves between
//! [`SessionState::Idle`], [`SessionState::Collecting`],
//! [`SessionState::Training`] and [`SessionState::Testing`]. Transitions
//! return the resulting state plus the events a front end should surface.
//! Detection is driven from outside one tick at a time: ask for a
//! [`TickTicket`] with [`SessionController::next_tick`], run the detector,
//! then hand the hands back with [`SessionController::on_detection`].

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, ClassifierError};
use crate::config::Settings;
use crate::dataset::{DatasetError, DatasetStore, DatasetSummary, DocumentError, TrainingData};
use crate::encoder::{Hand, SAMPLE_LEN};
use crate::ml::metrics::EvaluationReport;
use crate::ml::mlp::{EpochLogs, FitOptions, ModelError, TrainHistory, argmax};
use crate::storage::{KeyValueStore, ModelStore, StorageError};

mod announcer;
mod detection_loop;
mod runner;

pub use announcer::PredictionAnnouncer;
pub use detection_loop::{DetectionLoop, StopHandle, TickTicket};
pub use runner::{RunStats, run_detection};

/// Label reported when no class is confident enough.
pub const UNCERTAIN_LABEL: &str = "uncertain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Collecting { label: String, target: usize },
    Training,
    Testing,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Collecting { .. } => "collecting",
            SessionState::Training => "training",
            SessionState::Testing => "testing",
        }
    }

    /// Whether this state runs the detection loop.
    pub fn is_detecting(&self) -> bool {
        matches!(
            self,
            SessionState::Collecting { .. } | SessionState::Testing
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f32,
}

/// Result of classifying one detected hand.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Arg-max label, or [`UNCERTAIN_LABEL`] at or below the threshold.
    pub label: String,
    pub class_index: usize,
    pub probability: f32,
    /// Every class in model output order.
    pub probabilities: Vec<ClassProbability>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    CollectionStarted {
        label: String,
        target: usize,
    },
    SampleCollected {
        label: String,
        collected: usize,
        target: usize,
    },
    /// Detection arrived before the collection interval elapsed.
    SampleSkipped,
    NoHand,
    CollectionComplete {
        label: String,
        collected: usize,
    },
    Stopped {
        pending: usize,
    },
    Committed {
        label: String,
        total: usize,
    },
    NothingToCommit,
    TrainingProgress {
        epoch: usize,
        total_epochs: usize,
        logs: EpochLogs,
    },
    TestingStarted,
    Prediction(Prediction),
    Announce {
        label: String,
        probability: f32,
    },
    /// A detection result arrived for a cancelled tick.
    Discarded,
}

/// State after a transition plus what happened on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: SessionState,
    pub events: Vec<SessionEvent>,
}

/// Outcome of a successful training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub labels: Vec<String>,
    pub samples: usize,
    pub history: TrainHistory,
    pub evaluation: EvaluationReport,
}

/// Reasons an operation was refused before it started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("gesture label must not be empty")]
    EmptyLabel,
    #[error("target sample count must be positive")]
    InvalidTarget,
    #[error("hand detector is not ready")]
    DetectorNotReady,
    #[error("no trained model is available")]
    NoModel,
    #[error("need at least {required} samples, have {actual}")]
    InsufficientSamples { required: usize, actual: usize },
    #[error("need at least {required} labels with samples, have {actual}")]
    InsufficientLabels { required: usize, actual: usize },
    #[error("session is {state}; stop it first")]
    Busy { state: &'static str },
    #[error("sample has {actual} values (expected {expected})")]
    InvalidSample { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(#[from] Precondition),
    #[error("could not parse dataset: {0}")]
    Parse(#[source] DocumentError),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),
    #[error("training failed: {0}")]
    TrainingFailed(#[source] ClassifierError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<DatasetError> for SessionError {
    fn from(error: DatasetError) -> Self {
        match error {
            DatasetError::EmptyLabel => Precondition::EmptyLabel.into(),
            DatasetError::InvalidSample { expected, actual } => {
                Precondition::InvalidSample { expected, actual }.into()
            }
            DatasetError::Parse(err) => SessionError::Parse(err),
            DatasetError::Serialize(err) => SessionError::Parse(DocumentError::Json(err)),
            DatasetError::Storage(err) => SessionError::StorageUnavailable(err),
        }
    }
}

impl From<ClassifierError> for SessionError {
    fn from(error: ClassifierError) -> Self {
        match error {
            ClassifierError::NotReady(_) => Precondition::NoModel.into(),
            ClassifierError::Model(ModelError::InputLength { expected, actual }) => {
                Precondition::InvalidSample { expected, actual }.into()
            }
            ClassifierError::Storage(err) => SessionError::StorageUnavailable(err),
            ClassifierError::Export { path, source } => SessionError::Io { path, source },
            other => SessionError::TrainingFailed(other),
        }
    }
}

pub struct SessionController {
    state: SessionState,
    dataset: DatasetStore,
    classifier: Classifier,
    settings: Settings,
    detection: DetectionLoop,
    announcer: PredictionAnnouncer,
    last_sample_at: Option<Instant>,
}

impl SessionController {
    pub fn new(dataset: DatasetStore, classifier: Classifier, settings: Settings) -> Self {
        let announcer = PredictionAnnouncer::new(
            settings.testing.announce_threshold,
            settings.testing.announce_interval(),
        );
        Self {
            state: SessionState::Idle,
            dataset,
            classifier,
            settings,
            detection: DetectionLoop::new(),
            announcer,
            last_sample_at: None,
        }
    }

    /// Load the persisted dataset and restore the saved model, if any.
    pub fn open(
        documents: Box<dyn KeyValueStore>,
        models: Box<dyn ModelStore>,
        settings: Settings,
    ) -> Result<Self, SessionError> {
        let dataset = DatasetStore::open(documents)?;
        Ok(Self::with_saved_model(dataset, models, settings))
    }

    /// Start from an empty dataset without reading the persisted document.
    ///
    /// The stored document is left as is until the next write, so `clear`
    /// and the imports can replace one that no longer parses.
    pub fn open_unrestored(
        documents: Box<dyn KeyValueStore>,
        models: Box<dyn ModelStore>,
        settings: Settings,
    ) -> Self {
        Self::with_saved_model(DatasetStore::new(documents), models, settings)
    }

    fn with_saved_model(
        dataset: DatasetStore,
        models: Box<dyn ModelStore>,
        settings: Settings,
    ) -> Self {
        let mut classifier = Classifier::new(models).with_seed(settings.training.seed);
        if classifier.restore() && !dataset.dataset().is_empty() {
            let labels = dataset.dataset().labels();
            if !classifier.labels_match(&labels) {
                warn!(
                    model = ?classifier.labels(),
                    dataset = ?labels,
                    "Saved model was trained on different labels; retrain to include changes"
                );
            }
        }
        Self::new(dataset, classifier, settings)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn dataset(&self) -> &DatasetStore {
        &self.dataset
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn summary(&self) -> DatasetSummary {
        self.dataset.summary()
    }

    /// Flag another thread can raise to end the current detection run.
    pub fn stop_handle(&self) -> StopHandle {
        self.detection.stop_handle()
    }

    fn transition(&self, events: Vec<SessionEvent>) -> Transition {
        Transition {
            state: self.state.clone(),
            events,
        }
    }

    fn require_idle(&self) -> Result<(), Precondition> {
        match self.state {
            SessionState::Idle => Ok(()),
            ref other => Err(Precondition::Busy {
                state: other.name(),
            }),
        }
    }

    /// `Idle -> Collecting`: begin a fresh pending buffer for `label`.
    ///
    /// `target` falls back to the configured default.
    pub fn start_collecting(
        &mut self,
        label: &str,
        target: Option<usize>,
        detector_ready: bool,
    ) -> Result<Transition, SessionError> {
        self.require_idle()?;
        let label = label.trim();
        if label.is_empty() {
            return Err(Precondition::EmptyLabel.into());
        }
        let target = target.unwrap_or(self.settings.collection.default_target);
        if target == 0 {
            return Err(Precondition::InvalidTarget.into());
        }
        if !detector_ready {
            return Err(Precondition::DetectorNotReady.into());
        }
        self.dataset.begin_label(label)?;
        self.detection.start();
        self.last_sample_at = None;
        self.state = SessionState::Collecting {
            label: label.to_string(),
            target,
        };
        info!(target, "Collecting samples for {label}");
        Ok(self.transition(vec![SessionEvent::CollectionStarted {
            label: label.to_string(),
            target,
        }]))
    }

    /// `Idle -> Testing`: classify every detected hand with the current model.
    pub fn start_testing(&mut self, detector_ready: bool) -> Result<Transition, SessionError> {
        self.require_idle()?;
        if !self.classifier.is_trained() {
            return Err(Precondition::NoModel.into());
        }
        if !detector_ready {
            return Err(Precondition::DetectorNotReady.into());
        }
        self.detection.start();
        self.announcer.reset();
        self.state = SessionState::Testing;
        info!(labels = ?self.classifier.labels(), "Testing started");
        Ok(self.transition(vec![SessionEvent::TestingStarted]))
    }

    /// Leave `Collecting` or `Testing` and cancel the detection loop.
    ///
    /// Pending samples stay buffered until [`Self::save_pending`].
    pub fn stop(&mut self) -> Transition {
        if !self.state.is_detecting() {
            return self.transition(Vec::new());
        }
        self.detection.cancel();
        let previous = std::mem::replace(&mut self.state, SessionState::Idle);
        let pending = self.dataset.pending_len();
        info!(pending, "Stopped {}", previous.name());
        self.transition(vec![SessionEvent::Stopped { pending }])
    }

    /// Ticket for the next detection, if the loop should keep running.
    pub fn next_tick(&mut self) -> Option<TickTicket> {
        if !self.state.is_detecting() {
            return None;
        }
        self.detection.schedule()
    }

    /// Feed the hands detected for `ticket`.
    ///
    /// Results for cancelled ticks are discarded. A raised stop flag ends the
    /// run before the result is used.
    pub fn on_detection(
        &mut self,
        ticket: TickTicket,
        hands: &[Hand],
        now: Instant,
    ) -> Result<Transition, SessionError> {
        if self.detection.stop_handle().is_stop_requested() {
            debug!("Stop requested; discarding detection result");
            let mut transition = self.stop();
            transition.events.insert(0, SessionEvent::Discarded);
            return Ok(transition);
        }
        if !self.detection.complete(ticket) {
            debug!("Discarding detection result from a cancelled tick");
            return Ok(self.transition(vec![SessionEvent::Discarded]));
        }
        match self.state.clone() {
            SessionState::Collecting { label, target } => self.collect(label, target, hands, now),
            SessionState::Testing => self.predict(hands, now),
            _ => Ok(self.transition(vec![SessionEvent::Discarded])),
        }
    }

    /// Release `ticket` after the detector failed, keeping the loop alive.
    pub fn on_detection_failed(&mut self, ticket: TickTicket) -> Transition {
        if !self.detection.complete(ticket) {
            return self.transition(vec![SessionEvent::Discarded]);
        }
        self.transition(Vec::new())
    }

    fn first_sample(hands: &[Hand]) -> Result<Option<Vec<f32>>, SessionError> {
        let Some(hand) = hands.first() else {
            return Ok(None);
        };
        hand.encode().map(Some).map_err(|_| {
            SessionError::from(Precondition::InvalidSample {
                expected: SAMPLE_LEN,
                actual: hand.keypoints.len() * 2,
            })
        })
    }

    fn collect(
        &mut self,
        label: String,
        target: usize,
        hands: &[Hand],
        now: Instant,
    ) -> Result<Transition, SessionError> {
        if hands.is_empty() {
            return Ok(self.transition(vec![SessionEvent::NoHand]));
        }
        let interval = self.settings.collection.sample_interval();
        if let Some(last) = self.last_sample_at
            && now.saturating_duration_since(last) < interval
        {
            return Ok(self.transition(vec![SessionEvent::SampleSkipped]));
        }
        let Some(sample) = Self::first_sample(hands)? else {
            return Ok(self.transition(vec![SessionEvent::NoHand]));
        };
        let collected = self.dataset.add_to_pending(sample)?.unwrap_or(0);
        self.last_sample_at = Some(now);
        debug!(collected, target, "Collected sample for {label}");
        let mut events = vec![SessionEvent::SampleCollected {
            label: label.clone(),
            collected,
            target,
        }];
        if collected >= target {
            self.detection.cancel();
            self.state = SessionState::Idle;
            info!(collected, "Collection complete for {label}");
            events.push(SessionEvent::CollectionComplete { label, collected });
        }
        Ok(self.transition(events))
    }

    fn predict(&mut self, hands: &[Hand], now: Instant) -> Result<Transition, SessionError> {
        let Some(sample) = Self::first_sample(hands)? else {
            return Ok(self.transition(vec![SessionEvent::NoHand]));
        };
        let probabilities = self.classifier.predict_one(&sample)?;
        let prediction = describe_prediction(
            &probabilities,
            self.classifier.labels(),
            self.settings.testing.confidence_threshold,
        );
        let mut events = Vec::with_capacity(2);
        let best = prediction
            .probabilities
            .get(prediction.class_index)
            .map(|class| class.label.clone());
        if let Some(best) = best
            && self.announcer.observe(&best, prediction.probability, now)
        {
            info!(probability = prediction.probability, "Recognized {best}");
            events.push(SessionEvent::Announce {
                label: best,
                probability: prediction.probability,
            });
        }
        events.insert(0, SessionEvent::Prediction(prediction));
        Ok(self.transition(events))
    }

    /// Commit the pending buffer for the current label.
    ///
    /// Refused while a collection run is active.
    pub fn save_pending(&mut self) -> Result<Transition, SessionError> {
        if matches!(
            self.state,
            SessionState::Collecting { .. } | SessionState::Training
        ) {
            return Err(Precondition::Busy {
                state: self.state.name(),
            }
            .into());
        }
        let event = match self.dataset.commit_pending()? {
            Some(total) => SessionEvent::Committed {
                label: self.dataset.current_label().unwrap_or_default().to_string(),
                total,
            },
            None => SessionEvent::NothingToCommit,
        };
        Ok(self.transition(vec![event]))
    }

    /// `Idle -> Training -> Idle`: fit a fresh model on the committed dataset.
    ///
    /// Progress events are relayed after every epoch. The model is evaluated
    /// on the held-out rows and persisted before returning.
    pub fn train(
        &mut self,
        mut progress: impl FnMut(&SessionEvent),
    ) -> Result<TrainingOutcome, SessionError> {
        self.require_idle()?;
        let training = &self.settings.training;
        let total = self.dataset.dataset().total_samples();
        if total < training.min_samples {
            return Err(Precondition::InsufficientSamples {
                required: training.min_samples,
                actual: total,
            }
            .into());
        }
        let populated = self.dataset.dataset().populated_label_count();
        if populated < training.min_labels {
            return Err(Precondition::InsufficientLabels {
                required: training.min_labels,
                actual: populated,
            }
            .into());
        }
        let options = training.fit_options();
        let data = self.dataset.materialize_training_data();
        self.state = SessionState::Training;
        info!(
            samples = data.len(),
            labels = data.labels.len(),
            "Training started"
        );
        let result = self.fit_and_persist(&data, &options, &mut progress);
        self.state = SessionState::Idle;
        let (history, evaluation) = result?;
        info!(accuracy = evaluation.accuracy, "Validation finished");
        Ok(TrainingOutcome {
            samples: data.len(),
            labels: data.labels,
            history,
            evaluation,
        })
    }

    fn fit_and_persist(
        &mut self,
        data: &TrainingData,
        options: &FitOptions,
        progress: &mut impl FnMut(&SessionEvent),
    ) -> Result<(TrainHistory, EvaluationReport), SessionError> {
        let history = self
            .classifier
            .train_fresh(data, options, |epoch, total_epochs, logs| {
                progress(&SessionEvent::TrainingProgress {
                    epoch,
                    total_epochs,
                    logs: *logs,
                })
            })
            .map_err(SessionError::TrainingFailed)?;
        let evaluation = self.classifier.evaluate(data, &history.validation_rows)?;
        self.classifier.persist()?;
        Ok((history, evaluation))
    }

    pub fn describe_model(&self) -> String {
        self.classifier.describe()
    }

    /// Write the trained model as a portable file into `dir`.
    pub fn export_model(&self, dir: &Path) -> Result<PathBuf, SessionError> {
        Ok(self.classifier.export_portable(dir)?)
    }

    pub fn export_document(&self) -> Result<String, SessionError> {
        Ok(self.dataset.export_document()?)
    }

    /// Replace the dataset with `document`.
    pub fn import_document(&mut self, document: &str) -> Result<(), SessionError> {
        self.require_idle()?;
        self.dataset.import_document(document)?;
        self.warn_if_model_labels_differ();
        Ok(())
    }

    pub fn export_csv(&self) -> String {
        self.dataset.export_csv()
    }

    /// Replace the dataset with CSV rows.
    pub fn import_csv(&mut self, text: &str) -> Result<(), SessionError> {
        self.require_idle()?;
        self.dataset.import_csv(text)?;
        self.warn_if_model_labels_differ();
        Ok(())
    }

    /// Erase the dataset, pending samples and persisted document.
    pub fn clear_dataset(&mut self) -> Result<(), SessionError> {
        self.require_idle()?;
        self.dataset.clear()?;
        Ok(())
    }

    fn warn_if_model_labels_differ(&self) {
        if !self.classifier.is_trained() {
            return;
        }
        let labels = self.dataset.dataset().labels();
        if !self.classifier.labels_match(&labels) {
            warn!(
                model = ?self.classifier.labels(),
                dataset = ?labels,
                "Imported labels differ from the trained model"
            );
        }
    }
}

/// Build a [`Prediction`] from class probabilities in output order.
pub fn describe_prediction(probabilities: &[f32], labels: &[String], threshold: f32) -> Prediction {
    let class_index = argmax(probabilities);
    let probability = probabilities.get(class_index).copied().unwrap_or(0.0);
    let probabilities: Vec<ClassProbability> = probabilities
        .iter()
        .enumerate()
        .map(|(index, &probability)| ClassProbability {
            label: labels
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("class {index}")),
            probability,
        })
        .collect();
    let label = if probability > threshold {
        probabilities
            .get(class_index)
            .map(|class| class.label.clone())
            .unwrap_or_else(|| UNCERTAIN_LABEL.to_string())
    } else {
        UNCERTAIN_LABEL.to_string()
    };
    Prediction {
        label,
        class_index,
        probability,
        probabilities,
    }
}

//! Dataset store: per-label sample collection, persistence and training tensors.
//!
//! Samples for the label being collected land in a pending buffer first and
//! only join the committed dataset on [`DatasetStore::commit_pending`]. The
//! committed dataset is persisted as a single JSON document.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoder::{SAMPLE_LEN, Sample};
use crate::storage::{KeyValueStore, StorageError};

pub mod csv;
pub mod document;

pub use document::{Dataset, DocumentError, LabelSamples};

/// Storage key holding the serialized dataset.
pub const DATASET_KEY: &str = "gestureData";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("sample has {actual} values (expected {expected})")]
    InvalidSample { expected: usize, actual: usize },
    #[error("invalid dataset document: {0}")]
    Parse(#[from] DocumentError),
    #[error("failed to serialize dataset: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Feature rows, class targets and the label order used to build them.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingData {
    /// `[N, 42]` feature rows in label order, then per-label insertion order.
    pub features: Vec<Vec<f32>>,
    /// Class index of each row.
    pub class_indices: Vec<usize>,
    /// `[N, labels.len()]` one-hot targets.
    pub one_hot: Vec<Vec<f32>>,
    /// Authoritative index -> label mapping for the rows above.
    pub labels: Vec<String>,
}

impl TrainingData {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// Per-label counts in label order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetSummary {
    pub labels: Vec<LabelCount>,
    pub total: usize,
}

/// Single owner of the dataset, the pending buffer and the current label.
pub struct DatasetStore {
    dataset: Dataset,
    pending: Vec<Sample>,
    current_label: Option<String>,
    store: Box<dyn KeyValueStore>,
}

impl DatasetStore {
    /// Create an empty store without reading persisted state.
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            dataset: Dataset::new(),
            pending: Vec::new(),
            current_label: None,
            store,
        }
    }

    /// Create a store and load any previously persisted dataset.
    pub fn open(store: Box<dyn KeyValueStore>) -> Result<Self, DatasetError> {
        let mut dataset_store = Self::new(store);
        dataset_store.restore()?;
        Ok(dataset_store)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn current_label(&self) -> Option<&str> {
        self.current_label.as_deref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Make `label` current and start a fresh pending buffer for it.
    pub fn begin_label(&mut self, label: &str) -> Result<(), DatasetError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(DatasetError::EmptyLabel);
        }
        if !self.pending.is_empty() {
            warn!(
                discarded = self.pending.len(),
                "Discarding uncommitted samples for {:?}",
                self.current_label
            );
        }
        self.dataset.entry(label);
        self.current_label = Some(label.to_string());
        self.pending.clear();
        debug!("Collecting samples for {label}");
        Ok(())
    }

    /// Buffer a sample for the current label.
    ///
    /// Returns the new buffer size, or `None` when no label is current.
    pub fn add_to_pending(&mut self, sample: Sample) -> Result<Option<usize>, DatasetError> {
        if self.current_label.is_none() {
            return Ok(None);
        }
        if sample.len() != SAMPLE_LEN {
            return Err(DatasetError::InvalidSample {
                expected: SAMPLE_LEN,
                actual: sample.len(),
            });
        }
        self.pending.push(sample);
        Ok(Some(self.pending.len()))
    }

    /// Move the pending buffer into the dataset and persist.
    ///
    /// Returns the label's new total, or `None` if there was nothing to commit.
    /// On a storage failure the dataset and buffer are left as they were.
    pub fn commit_pending(&mut self) -> Result<Option<usize>, DatasetError> {
        let Some(label) = self.current_label.clone() else {
            return Ok(None);
        };
        if self.pending.is_empty() {
            return Ok(None);
        }
        let before = self.dataset.entry(&label).len();
        self.dataset
            .entry(&label)
            .extend(self.pending.iter().cloned());
        if let Err(err) = self.persist() {
            if let Some(samples) = self.dataset.samples_mut(&label) {
                samples.truncate(before);
            }
            return Err(err);
        }
        let committed = self.pending.len();
        self.pending.clear();
        let total = self.dataset.entry(&label).len();
        info!(committed, total, "Saved samples for {label}");
        Ok(Some(total))
    }

    /// Build feature rows and one-hot targets from the current label order.
    pub fn materialize_training_data(&self) -> TrainingData {
        let labels = self.dataset.labels();
        let num_classes = labels.len();
        let total = self.dataset.total_samples();
        let mut features = Vec::with_capacity(total);
        let mut class_indices = Vec::with_capacity(total);
        let mut one_hot = Vec::with_capacity(total);
        for (class_index, entry) in self.dataset.iter().enumerate() {
            for sample in &entry.samples {
                features.push(sample.clone());
                class_indices.push(class_index);
                let mut target = vec![0.0f32; num_classes];
                target[class_index] = 1.0;
                one_hot.push(target);
            }
        }
        TrainingData {
            features,
            class_indices,
            one_hot,
            labels,
        }
    }

    pub fn summary(&self) -> DatasetSummary {
        let labels = self
            .dataset
            .iter()
            .map(|entry| LabelCount {
                label: entry.label.clone(),
                count: entry.samples.len(),
            })
            .collect();
        DatasetSummary {
            labels,
            total: self.dataset.total_samples(),
        }
    }

    /// Write the full dataset under [`DATASET_KEY`].
    pub fn persist(&mut self) -> Result<(), DatasetError> {
        let document = self.dataset.to_json().map_err(DatasetError::Serialize)?;
        self.store.put(DATASET_KEY, &document)?;
        Ok(())
    }

    /// Replace the in-memory dataset with the persisted one, if any.
    pub fn restore(&mut self) -> Result<(), DatasetError> {
        let Some(document) = self.store.get(DATASET_KEY)? else {
            debug!("No persisted dataset found");
            return Ok(());
        };
        self.dataset = Dataset::from_json(&document)?;
        info!(
            labels = self.dataset.label_count(),
            samples = self.dataset.total_samples(),
            "Restored dataset"
        );
        Ok(())
    }

    /// Drop everything, including persisted state.
    pub fn clear(&mut self) -> Result<(), DatasetError> {
        self.store.delete(DATASET_KEY)?;
        self.dataset = Dataset::new();
        self.pending.clear();
        self.current_label = None;
        info!("Cleared dataset");
        Ok(())
    }

    pub fn export_document(&self) -> Result<String, DatasetError> {
        self.dataset.to_json().map_err(DatasetError::Serialize)
    }

    /// Replace the whole dataset with `document` and persist it.
    pub fn import_document(&mut self, document: &str) -> Result<(), DatasetError> {
        let dataset = Dataset::from_json(document)?;
        self.replace(dataset)
    }

    pub fn export_csv(&self) -> String {
        csv::to_csv(&self.dataset)
    }

    /// Replace the whole dataset with CSV rows and persist it.
    pub fn import_csv(&mut self, text: &str) -> Result<(), DatasetError> {
        let dataset = csv::from_csv(text)?;
        self.replace(dataset)
    }

    fn replace(&mut self, dataset: Dataset) -> Result<(), DatasetError> {
        let document = dataset.to_json().map_err(DatasetError::Serialize)?;
        self.store.put(DATASET_KEY, &document)?;
        self.dataset = dataset;
        self.pending.clear();
        self.current_label = None;
        info!(
            labels = self.dataset.label_count(),
            samples = self.dataset.total_samples(),
            "Imported dataset"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn sample(seed: f32) -> Sample {
        (0..SAMPLE_LEN).map(|i| seed + i as f32).collect()
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
        fn put(&mut self, _key: &str, _document: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
        fn delete(&mut self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
    }

    fn store_with(counts: &[(&str, usize)]) -> (DatasetStore, MemoryStore) {
        let backing = MemoryStore::new();
        let mut store = DatasetStore::new(Box::new(backing.clone()));
        for (label, count) in counts {
            store.begin_label(label).unwrap();
            for i in 0..*count {
                store.add_to_pending(sample(i as f32)).unwrap();
            }
            store.commit_pending().unwrap();
        }
        (store, backing)
    }

    #[test]
    fn commit_appends_pending_to_prior_samples() {
        let (mut store, _) = store_with(&[("wave", 2)]);
        store.begin_label("wave").unwrap();
        for n in 1..=3 {
            assert_eq!(store.add_to_pending(sample(9.0)).unwrap(), Some(n));
        }
        assert_eq!(store.commit_pending().unwrap(), Some(5));
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.dataset().samples("wave").unwrap().len(), 5);
    }

    #[test]
    fn add_without_label_is_a_no_op() {
        let (mut store, _) = store_with(&[]);
        assert_eq!(store.add_to_pending(sample(0.0)).unwrap(), None);
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.commit_pending().unwrap(), None);
    }

    #[test]
    fn begin_label_validates_and_resets_buffer() {
        let (mut store, _) = store_with(&[]);
        assert!(matches!(store.begin_label("  "), Err(DatasetError::EmptyLabel)));
        store.begin_label("fist").unwrap();
        store.add_to_pending(sample(0.0)).unwrap();
        store.begin_label("palm").unwrap();
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.current_label(), Some("palm"));
        assert_eq!(store.commit_pending().unwrap(), None);
        assert_eq!(store.dataset().samples("fist").unwrap().len(), 0);
    }

    #[test]
    fn add_rejects_wrong_sample_length() {
        let (mut store, _) = store_with(&[]);
        store.begin_label("fist").unwrap();
        assert!(matches!(
            store.add_to_pending(vec![1.0; 3]),
            Err(DatasetError::InvalidSample { actual: 3, .. })
        ));
    }

    #[test]
    fn materialize_follows_label_order() {
        let (store, _) = store_with(&[("A", 3), ("B", 2)]);
        let data = store.materialize_training_data();
        assert_eq!(data.features.len(), 5);
        assert_eq!(data.class_indices, vec![0, 0, 0, 1, 1]);
        assert_eq!(data.one_hot.len(), 5);
        assert!(data.one_hot.iter().all(|row| row.len() == 2));
        assert_eq!(data.one_hot[0], vec![1.0, 0.0]);
        assert_eq!(data.one_hot[4], vec![0.0, 1.0]);
        assert_eq!(data.labels, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(data.features[3], sample(0.0));
    }

    #[test]
    fn summary_reports_counts_in_label_order() {
        let (store, _) = store_with(&[("b", 1), ("a", 4)]);
        let summary = store.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(
            summary.labels,
            vec![
                LabelCount { label: "b".into(), count: 1 },
                LabelCount { label: "a".into(), count: 4 },
            ]
        );
    }

    #[test]
    fn commit_persists_and_open_restores() {
        let (_, backing) = store_with(&[("A", 2), ("B", 1)]);
        let reopened = DatasetStore::open(Box::new(backing)).unwrap();
        assert_eq!(reopened.summary().total, 3);
        assert_eq!(reopened.dataset().labels(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn restore_without_data_leaves_dataset_empty() {
        let store = DatasetStore::open(Box::new(MemoryStore::new())).unwrap();
        assert!(store.dataset().is_empty());
    }

    #[test]
    fn commit_failure_keeps_prior_state() {
        let mut store = DatasetStore::new(Box::new(BrokenStore));
        store.begin_label("wave").unwrap();
        store.add_to_pending(sample(1.0)).unwrap();
        assert!(matches!(
            store.commit_pending(),
            Err(DatasetError::Storage(_))
        ));
        assert_eq!(store.pending_len(), 1);
        assert_eq!(store.dataset().samples("wave").unwrap().len(), 0);
    }

    #[test]
    fn export_import_round_trip() {
        let (store, _) = store_with(&[("B", 2), ("A", 1)]);
        let document = store.export_document().unwrap();
        let (mut other, backing) = store_with(&[("C", 1)]);
        other.import_document(&document).unwrap();
        assert_eq!(other.dataset(), store.dataset());
        let reopened = DatasetStore::open(Box::new(backing)).unwrap();
        assert_eq!(reopened.dataset(), store.dataset());
    }

    #[test]
    fn malformed_import_leaves_dataset_unchanged() {
        let (mut store, _) = store_with(&[("A", 2)]);
        let before = store.dataset().clone();
        for bad in ["[]", r#"{"A": 3}"#, r#"{"A": [[1, 2]]}"#, "{"] {
            assert!(matches!(
                store.import_document(bad),
                Err(DatasetError::Parse(_))
            ));
            assert_eq!(store.dataset(), &before);
        }
    }

    #[test]
    fn clear_erases_memory_and_storage() {
        let (mut store, backing) = store_with(&[("A", 2)]);
        store.begin_label("A").unwrap();
        store.add_to_pending(sample(0.0)).unwrap();
        store.clear().unwrap();
        assert!(store.dataset().is_empty());
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.current_label(), None);
        assert_eq!(backing.get(DATASET_KEY).unwrap(), None);
    }

    #[test]
    fn csv_import_replaces_dataset() {
        let (source, _) = store_with(&[("A", 2), ("B", 1)]);
        let text = source.export_csv();
        let (mut target, _) = store_with(&[("Z", 3)]);
        target.import_csv(&text).unwrap();
        assert_eq!(target.dataset(), source.dataset());
    }
}

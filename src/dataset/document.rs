//! The committed dataset and its portable JSON document form.
//!
//! The document is `{ "<label>": [[x0, y0, ...], ...], ... }`. Label order in
//! the document is the insertion order of the dataset, which in turn fixes
//! class indices, so the codec below keeps it instead of going through a
//! sorted or hashed map.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::encoder::{SAMPLE_LEN, Sample};

/// Reasons a dataset document or CSV export could not be accepted.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is not a label -> samples mapping: {0}")]
    Json(#[from] serde_json::Error),
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("label {0:?} appears more than once")]
    DuplicateLabel(String),
    #[error("sample {index} of {label:?} has {len} values (expected {SAMPLE_LEN})")]
    SampleLength {
        label: String,
        index: usize,
        len: usize,
    },
    #[error("sample {index} of {label:?} contains a non-finite value")]
    NonFinite { label: String, index: usize },
    #[error("csv line {line}: {message}")]
    Csv { line: usize, message: String },
}

/// Labels are compared after trimming surrounding whitespace.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_string()
}

/// Samples recorded for one label.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelSamples {
    pub label: String,
    pub samples: Vec<Sample>,
}

/// Label -> samples mapping that remembers label insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    entries: Vec<LabelSamples>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, DocumentError> {
        let dataset: Dataset = serde_json::from_str(text)?;
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Build from `(label, samples)` pairs, rejecting duplicates.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, Vec<Sample>)>,
    ) -> Result<Self, DocumentError> {
        let mut dataset = Dataset::new();
        for (label, samples) in entries {
            let label = normalize_label(&label);
            if dataset.contains(&label) {
                return Err(DocumentError::DuplicateLabel(label));
            }
            dataset.entries.push(LabelSamples { label, samples });
        }
        dataset.validate()?;
        Ok(dataset)
    }

    /// Check label and sample invariants.
    pub fn validate(&self) -> Result<(), DocumentError> {
        for entry in &self.entries {
            if entry.label.is_empty() {
                return Err(DocumentError::EmptyLabel);
            }
            for (index, sample) in entry.samples.iter().enumerate() {
                if sample.len() != SAMPLE_LEN {
                    return Err(DocumentError::SampleLength {
                        label: entry.label.clone(),
                        index,
                        len: sample.len(),
                    });
                }
                if sample.iter().any(|value| !value.is_finite()) {
                    return Err(DocumentError::NonFinite {
                        label: entry.label.clone(),
                        index,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn label_count(&self) -> usize {
        self.entries.len()
    }

    /// Labels that hold at least one sample.
    pub fn populated_label_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.samples.is_empty())
            .count()
    }

    pub fn total_samples(&self) -> usize {
        self.entries.iter().map(|entry| entry.samples.len()).sum()
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.label.clone()).collect()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|entry| entry.label == label)
    }

    pub fn samples(&self, label: &str) -> Option<&[Sample]> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .map(|entry| entry.samples.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelSamples> {
        self.entries.iter()
    }

    /// Return the label's sample list, appending an empty entry if absent.
    pub fn entry(&mut self, label: &str) -> &mut Vec<Sample> {
        let position = match self.entries.iter().position(|entry| entry.label == label) {
            Some(position) => position,
            None => {
                self.entries.push(LabelSamples {
                    label: label.to_string(),
                    samples: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[position].samples
    }

    pub(crate) fn samples_mut(&mut self, label: &str) -> Option<&mut Vec<Sample>> {
        self.entries
            .iter_mut()
            .find(|entry| entry.label == label)
            .map(|entry| &mut entry.samples)
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.label, &entry.samples)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Dataset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DatasetVisitor)
    }
}

struct DatasetVisitor;

impl<'de> Visitor<'de> for DatasetVisitor {
    type Value = Dataset;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of label to an array of numeric arrays")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut dataset = Dataset::new();
        while let Some((label, samples)) = access.next_entry::<String, Vec<Sample>>()? {
            let label = normalize_label(&label);
            if dataset.contains(&label) {
                return Err(de::Error::custom(format!("duplicate label {label:?}")));
            }
            dataset.entries.push(LabelSamples { label, samples });
        }
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seed: f32) -> Sample {
        (0..SAMPLE_LEN).map(|i| seed + i as f32 * 0.01).collect()
    }

    #[test]
    fn json_keeps_label_insertion_order() {
        let dataset = Dataset::from_entries([
            ("zeta".to_string(), vec![sample(1.0)]),
            ("alpha".to_string(), vec![sample(2.0), sample(3.0)]),
        ])
        .unwrap();
        let text = dataset.to_json().unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        let parsed = Dataset::from_json(&text).unwrap();
        assert_eq!(parsed.labels(), vec!["zeta".to_string(), "alpha".to_string()]);
        assert_eq!(parsed, dataset);
    }

    #[test]
    fn rejects_non_mapping_documents() {
        assert!(matches!(
            Dataset::from_json("[1, 2, 3]"),
            Err(DocumentError::Json(_))
        ));
        assert!(matches!(
            Dataset::from_json(r#"{"a": [1, 2]}"#),
            Err(DocumentError::Json(_))
        ));
        assert!(matches!(
            Dataset::from_json(r#"{"a": "nope"}"#),
            Err(DocumentError::Json(_))
        ));
        assert!(matches!(
            Dataset::from_json("not json"),
            Err(DocumentError::Json(_))
        ));
    }

    #[test]
    fn rejects_wrong_sample_length_and_empty_label() {
        assert!(matches!(
            Dataset::from_json(r#"{"a": [[1.0, 2.0]]}"#),
            Err(DocumentError::SampleLength { len: 2, .. })
        ));
        let text = serde_json::json!({ "": [sample(0.0)] }).to_string();
        assert!(matches!(
            Dataset::from_json(&text),
            Err(DocumentError::EmptyLabel)
        ));
    }

    #[test]
    fn rejects_duplicate_labels() {
        let one = serde_json::to_string(&vec![sample(0.0)]).unwrap();
        let text = format!(r#"{{"a": {one}, "a": {one}}}"#);
        assert!(Dataset::from_json(&text).is_err());
        assert!(matches!(
            Dataset::from_entries([
                ("a".to_string(), Vec::new()),
                ("a".to_string(), Vec::new())
            ]),
            Err(DocumentError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn labels_are_trimmed_on_import() {
        let text = serde_json::json!({ " wave ": [sample(0.0)], "fist": [] }).to_string();
        let dataset = Dataset::from_json(&text).unwrap();
        assert_eq!(dataset.labels(), vec!["wave".to_string(), "fist".to_string()]);

        let text = format!(
            r#"{{"wave": {one}, "wave ": {one}}}"#,
            one = serde_json::to_string(&vec![sample(0.0)]).unwrap()
        );
        assert!(matches!(
            Dataset::from_json(&text),
            Err(DocumentError::Json(_))
        ));
        let text = serde_json::json!({ "   ": [] }).to_string();
        assert!(matches!(
            Dataset::from_json(&text),
            Err(DocumentError::EmptyLabel)
        ));
    }

    #[test]
    fn entry_appends_new_labels_at_the_end() {
        let mut dataset = Dataset::new();
        dataset.entry("b").push(sample(0.0));
        dataset.entry("a");
        dataset.entry("b").push(sample(1.0));
        assert_eq!(dataset.labels(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(dataset.total_samples(), 2);
        assert_eq!(dataset.populated_label_count(), 1);
        assert_eq!(dataset.label_count(), 2);
    }

    #[test]
    fn empty_object_is_an_empty_dataset() {
        let dataset = Dataset::from_json("{}").unwrap();
        assert!(dataset.is_empty());
    }
}

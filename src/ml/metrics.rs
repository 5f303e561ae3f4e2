//! Evaluation metrics for classification models.

use serde::{Deserialize, Serialize};

/// Counts of (true class, predicted class) pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub n_classes: usize,
    /// Row-major counts: row is the true class, column the prediction.
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Record one prediction; out-of-range classes are ignored.
    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth < self.n_classes && predicted < self.n_classes {
            let cell = &mut self.counts[truth * self.n_classes + predicted];
            *cell = cell.saturating_add(1);
        }
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    /// Examples whose true class is `class`.
    pub fn row_total(&self, class: usize) -> u32 {
        (0..self.n_classes).map(|col| self.get(class, col)).sum()
    }

    /// Examples predicted as `class`.
    pub fn column_total(&self, class: usize) -> u32 {
        (0..self.n_classes).map(|row| self.get(row, class)).sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.n_classes)
            .map(|class| u64::from(self.get(class, class)))
            .sum()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&count| u64::from(count)).sum()
    }

    pub fn accuracy(&self) -> f32 {
        ratio(self.correct() as f32, self.total() as f32)
    }
}

fn ratio(numerator: f32, denominator: f32) -> f32 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Per-class line of an [`EvaluationReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerClassMetric {
    pub label: String,
    pub support: u32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

/// Held-out evaluation of a trained classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy: f32,
    pub per_class: Vec<PerClassMetric>,
    pub confusion: ConfusionMatrix,
}

impl EvaluationReport {
    /// Build a report from a filled confusion matrix and its class labels.
    pub fn from_confusion(confusion: ConfusionMatrix, labels: &[String]) -> Self {
        let per_class = labels
            .iter()
            .take(confusion.n_classes)
            .enumerate()
            .map(|(class, label)| {
                let hits = confusion.get(class, class) as f32;
                let support = confusion.row_total(class);
                let precision = ratio(hits, confusion.column_total(class) as f32);
                let recall = ratio(hits, support as f32);
                PerClassMetric {
                    label: label.clone(),
                    support,
                    precision,
                    recall,
                    f1: ratio(2.0 * precision * recall, precision + recall),
                }
            })
            .collect();
        Self {
            accuracy: confusion.accuracy(),
            per_class,
            confusion,
        }
    }

    /// Plain-text table in the style of a classification report.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{:<16} {:>9} {:>9} {:>9} {:>8}\n",
            "label", "precision", "recall", "f1", "support"
        );
        for metric in &self.per_class {
            out.push_str(&format!(
                "{:<16} {:>9.3} {:>9.3} {:>9.3} {:>8}\n",
                metric.label, metric.precision, metric.recall, metric.f1, metric.support
            ));
        }
        out.push_str(&format!(
            "accuracy {:.3} over {} samples\n",
            self.accuracy,
            self.confusion.total()
        ));
        out.push_str("confusion (rows=true, cols=pred):\n");
        for truth in 0..self.confusion.n_classes {
            for predicted in 0..self.confusion.n_classes {
                out.push_str(&format!("{:6}", self.confusion.get(truth, predicted)));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_from_confusion() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 1);
        cm.add(5, 0);
        let labels = vec!["fist".to_string(), "palm".to_string()];
        let report = EvaluationReport::from_confusion(cm, &labels);
        assert!((report.accuracy - 0.75).abs() < 1e-6);
        assert_eq!(report.per_class[0].support, 3);
        assert!((report.per_class[0].precision - 1.0).abs() < 1e-6);
        assert!((report.per_class[0].recall - 2.0 / 3.0).abs() < 1e-6);
        assert!((report.per_class[1].precision - 0.5).abs() < 1e-6);
        assert!(report.render().contains("palm"));
    }

    #[test]
    fn row_and_column_totals() {
        let mut cm = ConfusionMatrix::new(3);
        cm.add(0, 2);
        cm.add(1, 2);
        cm.add(2, 2);
        assert_eq!(cm.row_total(0), 1);
        assert_eq!(cm.column_total(2), 3);
        assert_eq!(cm.correct(), 1);
        assert!((cm.accuracy() - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_matrix_has_zero_accuracy() {
        let report = EvaluationReport::from_confusion(
            ConfusionMatrix::new(2),
            &["a".to_string(), "b".to_string()],
        );
        assert_eq!(report.accuracy, 0.0);
        assert!(report.per_class.iter().all(|m| m.support == 0 && m.f1 == 0.0));
    }
}

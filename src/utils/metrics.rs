//! Metrics Module for Model Evaluation
//!
//! Classification metrics computed from accumulated (label, prediction)
//! pairs at the end of a validation pass:
//! - Accuracy
//! - Macro-averaged precision and recall
//! - Confusion matrix (raw counts and row-normalised)
//!
//! Macro averages run over every class that occurs either as a label or
//! as a prediction. A class that is never predicted has an undefined
//! precision and a class that never occurs has an undefined recall; both
//! count as 0 and emit a warning.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Aggregate metrics for one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Unweighted mean of per-class precision
    pub macro_precision: f64,

    /// Unweighted mean of per-class recall
    pub macro_recall: f64,

    /// Per-class metrics for every class that was seen
    pub per_class: Vec<ClassMetrics>,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl ClassificationMetrics {
    /// Compute metrics from ground-truth labels and predicted labels.
    ///
    /// `num_classes` sizes the confusion matrix; out-of-range indices grow it.
    pub fn from_labels(labels: &[usize], predictions: &[usize], num_classes: usize) -> Self {
        assert_eq!(
            labels.len(),
            predictions.len(),
            "Labels and predictions must have same length"
        );

        let total_samples = labels.len();
        if total_samples == 0 {
            return Self::empty(num_classes);
        }

        let confusion_matrix = ConfusionMatrix::from_labels(labels, predictions, num_classes);
        let correct_predictions = confusion_matrix.correct();
        let accuracy = correct_predictions as f64 / total_samples as f64;

        let row_sums = confusion_matrix.row_sums();
        let col_sums = confusion_matrix.col_sums();

        let per_class: Vec<ClassMetrics> = (0..confusion_matrix.num_classes)
            .filter(|&c| row_sums[c] > 0 || col_sums[c] > 0)
            .map(|c| ClassMetrics::from_confusion_matrix(&confusion_matrix, c))
            .collect();

        if per_class.iter().any(|m| m.predicted == 0) {
            warn!("Precision is ill-defined for labels with no predicted samples; reporting 0.0");
        }
        if per_class.iter().any(|m| m.support == 0) {
            warn!("Recall is ill-defined for labels with no true samples; reporting 0.0");
        }

        let n = per_class.len() as f64;
        let macro_precision = per_class.iter().map(|m| m.precision).sum::<f64>() / n;
        let macro_recall = per_class.iter().map(|m| m.recall).sum::<f64>() / n;

        Self {
            total_samples,
            correct_predictions,
            accuracy,
            macro_precision,
            macro_recall,
            per_class,
            confusion_matrix,
        }
    }

    fn empty(num_classes: usize) -> Self {
        Self {
            total_samples: 0,
            correct_predictions: 0,
            accuracy: 0.0,
            macro_precision: 0.0,
            macro_recall: 0.0,
            per_class: Vec::new(),
            confusion_matrix: ConfusionMatrix::new(num_classes),
        }
    }
}

impl std::fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Accuracy = {:.2}% .. Precision = {:.2}% .. Recall = {:.2}% ({} samples)",
            self.accuracy * 100.0,
            self.macro_precision * 100.0,
            self.macro_recall * 100.0,
            self.total_samples
        )
    }
}

/// Metrics for a single class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Class index
    pub class_idx: usize,

    /// True positives
    pub true_positives: usize,

    /// Number of samples predicted as this class
    pub predicted: usize,

    /// Number of samples whose label is this class
    pub support: usize,

    /// tp / predicted, 0 when nothing was predicted
    pub precision: f64,

    /// tp / support, 0 when the class never occurs
    pub recall: f64,
}

impl ClassMetrics {
    /// Read one class's counts out of a confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);
        let support = (0..cm.num_classes).map(|p| cm.get(class_idx, p)).sum::<usize>();
        let predicted = (0..cm.num_classes).map(|a| cm.get(a, class_idx)).sum::<usize>();

        let precision = if predicted > 0 {
            true_positives as f64 / predicted as f64
        } else {
            0.0
        };
        let recall = if support > 0 {
            true_positives as f64 / support as f64
        } else {
            0.0
        };

        Self {
            class_idx,
            true_positives,
            predicted,
            support,
            precision,
            recall,
        }
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted)
    /// Stored as a flat vector in row-major order
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Build from parallel label/prediction slices
    pub fn from_labels(labels: &[usize], predictions: &[usize], num_classes: usize) -> Self {
        let seen = labels
            .iter()
            .chain(predictions.iter())
            .map(|&c| c + 1)
            .max()
            .unwrap_or(0);
        let mut cm = Self::new(num_classes.max(seen));

        for (&actual, &pred) in labels.iter().zip(predictions.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Get the total count
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Get the number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Get the row sums (actual class counts)
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Get the column sums (predicted class counts)
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Normalize the matrix so every non-empty row sums to 1
    pub fn normalize_rows(&self) -> Vec<Vec<f64>> {
        let row_sums = self.row_sums();

        (0..self.num_classes)
            .map(|row| {
                let sum = row_sums[row] as f64;
                (0..self.num_classes)
                    .map(|col| {
                        if sum > 0.0 {
                            self.get(row, col) as f64 / sum
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Render the row-normalised matrix as a text table
    pub fn display_normalized(&self, class_names: Option<&[&str]>) -> String {
        let mut output = String::new();
        output.push_str("Confusion Matrix (rows=actual, cols=predicted, row-normalised):\n\n");

        let name = |i: usize| -> String {
            match class_names.and_then(|names| names.get(i)) {
                Some(n) => n.chars().take(8).collect(),
                None => i.to_string(),
            }
        };

        output.push_str(&format!("{:>9}", ""));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>9}", name(col)));
        }
        output.push('\n');

        for (row, values) in self.normalize_rows().iter().enumerate() {
            output.push_str(&format!("{:>9}", name(row)));
            for v in values {
                output.push_str(&format!("{:>9.3}", v));
            }
            output.push('\n');
        }

        output
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_normalized(None))
    }
}

/// Running average for per-batch losses
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean of the values added so far, 0 when empty
    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Round to `places` decimal places (half away from zero)
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

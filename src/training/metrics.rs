//! Binary classification metrics.
//!
//! Precision, recall and F1 are computed for the positive class (label 1).

use anyhow::{bail, Result};

/// Metrics for a binary classification run
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BinaryMetrics {
    /// Fraction of predictions that match the label
    pub accuracy: f64,
    /// TP / (TP + FP), 0.0 when nothing was predicted positive
    pub precision: f64,
    /// TP / (TP + FN), 0.0 when no positive labels exist
    pub recall: f64,
    /// Harmonic mean of precision and recall, 0.0 when both are 0
    pub f1: f64,
    /// Number of evaluated examples
    pub total: usize,
}

impl BinaryMetrics {
    /// Computes metrics from parallel label/prediction slices.
    ///
    /// Every degenerate denominator yields 0.0 rather than NaN, so an
    /// all-negative eval split still produces comparable numbers.
    pub fn compute(labels: &[u32], predictions: &[u32]) -> Result<Self> {
        if labels.len() != predictions.len() {
            bail!(
                "Label/prediction length mismatch: {} vs {}",
                labels.len(),
                predictions.len()
            );
        }
        if labels.is_empty() {
            bail!("Cannot compute metrics over an empty evaluation set");
        }

        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        let mut correct = 0usize;

        for (&label, &pred) in labels.iter().zip(predictions.iter()) {
            if label == pred {
                correct += 1;
            }
            match (label == 1, pred == 1) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
                (false, false) => {}
            }
        }

        let precision = if tp + fp > 0 {
            tp as f64 / (tp + fp) as f64
        } else {
            0.0
        };
        let recall = if tp + fn_ > 0 {
            tp as f64 / (tp + fn_) as f64
        } else {
            0.0
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Ok(Self {
            accuracy: correct as f64 / labels.len() as f64,
            precision,
            recall,
            f1,
            total: labels.len(),
        })
    }
}

impl std::fmt::Display for BinaryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Accuracy: {:.2}% | Precision: {:.4} | Recall: {:.4} | F1: {:.4} ({} examples)",
            self.accuracy * 100.0,
            self.precision,
            self.recall,
            self.f1,
            self.total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_known_values() {
        let labels = [0u32, 1, 1, 0];
        let predictions = [0u32, 1, 0, 0];

        let m = BinaryMetrics::compute(&labels, &predictions).unwrap();
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 0.5);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.accuracy, 0.75);
        assert_eq!(m.total, 4);
    }

    #[test]
    fn test_metrics_perfect_predictions() {
        let labels = [1u32, 0, 1, 1];
        let m = BinaryMetrics::compute(&labels, &labels).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.f1, 1.0);
    }

    #[test]
    fn test_metrics_zero_denominators() {
        // no positive predictions and no positive labels
        let labels = [0u32, 0, 0];
        let predictions = [0u32, 0, 0];

        let m = BinaryMetrics::compute(&labels, &predictions).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert!(!m.f1.is_nan());
    }

    #[test]
    fn test_metrics_all_wrong_positive_guess() {
        // predicted positive everywhere, labels all negative
        let labels = [0u32, 0];
        let predictions = [1u32, 1];

        let m = BinaryMetrics::compute(&labels, &predictions).unwrap();
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
    }

    #[test]
    fn test_metrics_length_mismatch() {
        let labels = [0u32, 1];
        let predictions = [0u32];
        assert!(BinaryMetrics::compute(&labels, &predictions).is_err());
    }

    #[test]
    fn test_metrics_empty() {
        assert!(BinaryMetrics::compute(&[], &[]).is_err());
    }
}

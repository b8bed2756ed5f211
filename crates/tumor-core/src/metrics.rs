//! Evaluation metrics: confusion matrix, per-class scores and ROC analysis.

use serde::{Deserialize, Serialize};

/// Classification metrics accumulated over a labelled set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Overall accuracy
    pub accuracy: f64,
    /// Per-class precision, indexed by label
    pub per_class_precision: Vec<f64>,
    /// Per-class recall, indexed by label
    pub per_class_recall: Vec<f64>,
    /// Per-class F1 score, indexed by label
    pub per_class_f1: Vec<f64>,
    /// Confusion matrix (actual x predicted)
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Total number of samples evaluated
    pub num_samples: usize,
}

impl EvaluationMetrics {
    pub fn new(num_classes: usize) -> Self {
        Self {
            accuracy: 0.0,
            per_class_precision: vec![0.0; num_classes],
            per_class_recall: vec![0.0; num_classes],
            per_class_f1: vec![0.0; num_classes],
            confusion_matrix: vec![vec![0; num_classes]; num_classes],
            num_samples: 0,
        }
    }

    /// Records one prediction
    pub fn update_confusion_matrix(&mut self, actual: usize, predicted: usize) {
        let n = self.confusion_matrix.len();
        if actual < n && predicted < n {
            self.confusion_matrix[actual][predicted] += 1;
        }
    }

    /// Recomputes every score from the confusion matrix
    pub fn compute_from_confusion_matrix(&mut self) {
        let num_classes = self.confusion_matrix.len();
        self.num_samples = self.confusion_matrix.iter().flatten().sum();

        if self.num_samples == 0 {
            return;
        }

        let correct: usize = (0..num_classes).map(|i| self.confusion_matrix[i][i]).sum();
        self.accuracy = correct as f64 / self.num_samples as f64;

        for class_id in 0..num_classes {
            let true_positives = self.confusion_matrix[class_id][class_id] as f64;
            let predicted: f64 = (0..num_classes)
                .map(|i| self.confusion_matrix[i][class_id] as f64)
                .sum();
            let actual: f64 = self.confusion_matrix[class_id].iter().sum::<usize>() as f64;

            let precision = if predicted > 0.0 { true_positives / predicted } else { 0.0 };
            let recall = if actual > 0.0 { true_positives / actual } else { 0.0 };
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            self.per_class_precision[class_id] = precision;
            self.per_class_recall[class_id] = recall;
            self.per_class_f1[class_id] = f1;
        }
    }

    pub fn macro_f1(&self) -> f64 {
        if self.per_class_f1.is_empty() {
            return 0.0;
        }
        self.per_class_f1.iter().sum::<f64>() / self.per_class_f1.len() as f64
    }
}

/// One operating point of a ROC curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    /// Scores greater than or equal to this are predicted positive
    pub threshold: f64,
    pub fpr: f64,
    pub tpr: f64,
}

/// Receiver operating characteristic of a binary scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocCurve {
    pub points: Vec<RocPoint>,
    pub auc: f64,
}

impl RocCurve {
    /// Builds the curve from positive-class scores and binary ground truth.
    ///
    /// Tied scores produce a single point. The first point is always
    /// `(threshold = +inf, fpr = 0, tpr = 0)`. Returns `None` when either
    /// class is absent, since one of the rates is then undefined.
    pub fn from_scores(scores: &[f64], positives: &[bool]) -> Option<Self> {
        let total_pos = positives.iter().filter(|&&p| p).count();
        let total_neg = positives.len() - total_pos;
        if total_pos == 0 || total_neg == 0 || scores.len() != positives.len() {
            return None;
        }

        let mut ranked: Vec<(f64, bool)> = scores.iter().copied().zip(positives.iter().copied()).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut points = vec![RocPoint {
            threshold: f64::INFINITY,
            fpr: 0.0,
            tpr: 0.0,
        }];
        let (mut tp, mut fp) = (0usize, 0usize);
        let mut i = 0;
        while i < ranked.len() {
            let threshold = ranked[i].0;
            while i < ranked.len() && ranked[i].0 == threshold {
                if ranked[i].1 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
            points.push(RocPoint {
                threshold,
                fpr: fp as f64 / total_neg as f64,
                tpr: tp as f64 / total_pos as f64,
            });
        }

        let auc = points
            .windows(2)
            .map(|w| (w[1].fpr - w[0].fpr) * (w[1].tpr + w[0].tpr) / 2.0)
            .sum();

        Some(Self { points, auc })
    }

    /// CSV rendering with a `threshold,fpr,tpr` header
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("threshold,fpr,tpr\n");
        for point in &self.points {
            csv.push_str(&format!("{},{},{}\n", point.threshold, point.fpr, point.tpr));
        }
        csv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_metrics() {
        let mut metrics = EvaluationMetrics::new(2);
        for (actual, predicted) in [(0, 0), (0, 0), (0, 1), (1, 1), (1, 1), (1, 0)] {
            metrics.update_confusion_matrix(actual, predicted);
        }
        metrics.compute_from_confusion_matrix();

        assert_eq!(metrics.num_samples, 6);
        assert!((metrics.accuracy - 4.0 / 6.0).abs() < 1e-9);
        assert!((metrics.per_class_recall[1] - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.per_class_precision[0] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_prediction_ignored() {
        let mut metrics = EvaluationMetrics::new(2);
        metrics.update_confusion_matrix(0, 5);
        metrics.compute_from_confusion_matrix();
        assert_eq!(metrics.num_samples, 0);
    }

    #[test]
    fn test_roc_perfect_separation() {
        let scores = [0.9, 0.8, 0.3, 0.1];
        let positives = [true, true, false, false];
        let roc = RocCurve::from_scores(&scores, &positives).unwrap();
        assert!((roc.auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_roc_constant_scores() {
        let scores = [0.5; 6];
        let positives = [true, false, true, false, true, false];
        let roc = RocCurve::from_scores(&scores, &positives).unwrap();
        assert_eq!(roc.points.len(), 2);
        assert!((roc.auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_roc_inverted_scores() {
        let scores = [0.1, 0.2, 0.8, 0.9];
        let positives = [true, true, false, false];
        let roc = RocCurve::from_scores(&scores, &positives).unwrap();
        assert!(roc.auc.abs() < 1e-12);
    }

    #[test]
    fn test_roc_single_class_is_none() {
        assert!(RocCurve::from_scores(&[0.2, 0.4], &[true, true]).is_none());
    }

    #[test]
    fn test_roc_csv_header() {
        let roc = RocCurve::from_scores(&[0.9, 0.1], &[true, false]).unwrap();
        let csv = roc.to_csv();
        assert!(csv.starts_with("threshold,fpr,tpr\n"));
        assert_eq!(csv.lines().count(), 4);
    }
}

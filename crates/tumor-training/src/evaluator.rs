//! Post-training evaluation: confusion matrix and ROC for the tumor class.

use std::fs;
use std::path::Path;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;
use tumor_core::{ClassMapping, Error, EvaluationMetrics, Result, RocCurve, POSITIVE_CLASS};
use tumor_dataset::DirectoryIterator;

use crate::model::TumorClassifier;

pub const ROC_FILE: &str = "roc.csv";
pub const REPORT_FILE: &str = "evaluation.json";

/// Scores collected over one pass of a stream
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    /// Positive-class probability per sample
    pub scores: Vec<f64>,
    pub predicted: Vec<usize>,
    pub actual: Vec<usize>,
}

impl Predictions {
    pub fn len(&self) -> usize {
        self.actual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actual.is_empty()
    }

    pub fn metrics(&self, num_classes: usize) -> EvaluationMetrics {
        let mut metrics = EvaluationMetrics::new(num_classes);
        for (&actual, &predicted) in self.actual.iter().zip(&self.predicted) {
            metrics.update_confusion_matrix(actual, predicted);
        }
        metrics.compute_from_confusion_matrix();
        metrics
    }

    pub fn roc(&self) -> Option<RocCurve> {
        let positives: Vec<bool> = self.actual.iter().map(|&a| a == POSITIVE_CLASS).collect();
        RocCurve::from_scores(&self.scores, &positives)
    }
}

/// Evaluation summary written next to the model artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub timestamp: String,
    pub dataset: String,
    pub class_names: Vec<String>,
    pub metrics: EvaluationMetrics,
    pub auc: Option<f64>,
}

impl EvaluationReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Runs `model` over one full pass of `stream`
pub fn predict_stream<B: Backend>(
    model: &TumorClassifier<B>,
    stream: &mut DirectoryIterator<B>,
) -> Result<Predictions> {
    if stream.steps_per_epoch() == 0 {
        return Err(Error::Dataset("Evaluation directory contains no images".to_string()));
    }

    stream.reset();
    let mut predictions = Predictions::default();

    for _ in 0..stream.steps_per_epoch() {
        let batch = stream.next_batch()?;
        let batch_size = batch.len();
        let probs = model.predict(batch.images);
        let num_classes = probs.dims()[1];

        let probs: Vec<f32> = probs
            .into_data()
            .to_vec()
            .map_err(|e| Error::Model(format!("Failed to read probabilities: {e:?}")))?;
        let targets: Vec<i64> = batch
            .targets
            .into_data()
            .to_vec()
            .map_err(|e| Error::Model(format!("Failed to read targets: {e:?}")))?;

        for (row, &target) in probs.chunks(num_classes).zip(&targets).take(batch_size) {
            let predicted = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            predictions.scores.push(row.get(POSITIVE_CLASS).copied().unwrap_or(0.0) as f64);
            predictions.predicted.push(predicted);
            predictions.actual.push(target as usize);
        }
    }

    Ok(predictions)
}

/// Evaluates and writes `roc.csv` and `evaluation.json` into `output_dir`
pub fn evaluate_and_report<B: Backend>(
    model: &TumorClassifier<B>,
    stream: &mut DirectoryIterator<B>,
    dataset: &Path,
    output_dir: &Path,
) -> Result<EvaluationReport> {
    let mapping = ClassMapping::default();
    let predictions = predict_stream(model, stream)?;
    let metrics = predictions.metrics(mapping.num_classes());
    let roc = predictions.roc();

    info!(
        "Evaluated {} images: accuracy {:.4}, macro F1 {:.4}",
        predictions.len(),
        metrics.accuracy,
        metrics.macro_f1()
    );

    match &roc {
        Some(curve) => {
            fs::create_dir_all(output_dir)?;
            fs::write(output_dir.join(ROC_FILE), curve.to_csv())?;
            info!("ROC AUC ({}): {:.4}", mapping.name_of(POSITIVE_CLASS)?, curve.auc);
        }
        None => info!("ROC curve skipped: evaluation set holds a single class"),
    }

    let report = EvaluationReport {
        timestamp: chrono::Utc::now().to_rfc3339(),
        dataset: dataset.display().to_string(),
        class_names: mapping.names().to_vec(),
        metrics,
        auc: roc.map(|curve| curve.auc),
    };
    report.save(&output_dir.join(REPORT_FILE))?;

    Ok(report)
}

//! Fine-tuning an Inception-ResNet-v2 classifier on tumor patches.
//!
//! - [`model`]: backbone and two-class head
//! - [`artifacts`]: architecture file, weights and the build-or-reload decision
//! - [`callbacks`]: checkpoint, early stopping, LR decay and CSV logging
//! - [`trainer`]: the epoch loop
//! - [`evaluator`]: confusion matrix and ROC on a labelled stream

pub mod artifacts;
pub mod backend;
pub mod callbacks;
pub mod evaluator;
pub mod model;
pub mod trainer;

pub use artifacts::{
    build_model, build_or_reload, load_weights, reload_model, save_weights, ModelArtifacts,
    ModelOrigin, RecordLayout,
};
pub use backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
pub use callbacks::{callback_set, CallbackAction, EpochLogs, TrainingCallback};
pub use evaluator::{evaluate_and_report, predict_stream, EvaluationReport, Predictions};
pub use model::{InceptionResNetV2, InceptionResNetV2Config, TumorClassifier, TumorClassifierConfig};
pub use trainer::{fit, FitConfig, History};

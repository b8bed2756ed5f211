//! Epoch-end callbacks.
//!
//! The standard set, in execution order:
//! 1. [`ModelCheckpoint`]: save weights when the monitored metric improves
//! 2. [`EarlyStopping`]: request a stop after `patience` flat epochs
//! 3. [`ReduceLrOnPlateau`]: decay the learning rate on a plateau
//! 4. [`CsvLogger`]: append one row per epoch to the run log

mod csv_logger;
mod early_stopping;
mod model_checkpoint;
mod reduce_lr;

pub use csv_logger::CsvLogger;
pub use early_stopping::EarlyStopping;
pub use model_checkpoint::ModelCheckpoint;
pub use reduce_lr::ReduceLrOnPlateau;

use std::collections::BTreeMap;
use std::path::Path;

use burn::module::Module;
use burn::tensor::backend::Backend;
use tumor_core::{CallbackConfig, Result};

use crate::artifacts::{LOG_FILE, WEIGHTS_FILE};

pub const LOSS: &str = "loss";
pub const ACC: &str = "acc";
pub const VAL_LOSS: &str = "val_loss";
pub const VAL_ACC: &str = "val_acc";
pub const LR: &str = "lr";

/// Metric values of one epoch, keyed by name (iterates in sorted order)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochLogs {
    values: BTreeMap<String, f64>,
}

impl EpochLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<const N: usize> From<[(&str, f64); N]> for EpochLogs {
    fn from(pairs: [(&str, f64); N]) -> Self {
        let mut logs = Self::new();
        for (key, value) in pairs {
            logs.insert(key, value);
        }
        logs
    }
}

/// Direction in which a monitored metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Min,
    Max,
}

impl MonitorMode {
    /// Accuracy-like metrics are maximized, everything else minimized
    pub fn for_metric(name: &str) -> Self {
        if name.contains("acc") {
            MonitorMode::Max
        } else {
            MonitorMode::Min
        }
    }

    /// Worst possible value, used before the first epoch
    pub fn initial_best(self) -> f64 {
        match self {
            MonitorMode::Min => f64::INFINITY,
            MonitorMode::Max => f64::NEG_INFINITY,
        }
    }

    /// Whether `current` beats `best` by more than `min_delta`
    pub fn improved(self, current: f64, best: f64, min_delta: f64) -> bool {
        match self {
            MonitorMode::Min => current + min_delta < best,
            MonitorMode::Max => current - min_delta > best,
        }
    }
}

/// Action requested by a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// State handed to callbacks at the end of an epoch
pub struct EpochContext<'a, M> {
    /// Zero-based epoch index within this run
    pub epoch: usize,
    pub logs: &'a mut EpochLogs,
    pub model: &'a M,
    /// Learning rate used for the next epoch
    pub learning_rate: &'a mut f64,
}

/// Hook invoked by the training loop
pub trait TrainingCallback<B: Backend, M: Module<B>> {
    fn on_train_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_, M>) -> Result<CallbackAction>;

    fn on_train_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Checkpoint, early stop, LR decay and CSV logging, in that order
pub fn callback_set<B, M>(
    save_dir: impl AsRef<Path>,
    config: &CallbackConfig,
) -> Vec<Box<dyn TrainingCallback<B, M>>>
where
    B: Backend,
    M: Module<B> + 'static,
{
    let save_dir = save_dir.as_ref();
    vec![
        Box::new(ModelCheckpoint::<B>::new(save_dir.join(WEIGHTS_FILE), &config.monitor)),
        Box::new(EarlyStopping::new(
            &config.monitor,
            config.early_stopping_patience,
            config.early_stopping_min_delta,
        )),
        Box::new(
            ReduceLrOnPlateau::new(&config.monitor, config.lr_factor, config.lr_patience, config.min_lr)
                .with_min_delta(config.lr_min_delta),
        ),
        Box::new(CsvLogger::new(save_dir.join(LOG_FILE))),
    ]
}

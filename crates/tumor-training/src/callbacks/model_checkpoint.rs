use std::marker::PhantomData;
use std::path::PathBuf;

use burn::module::Module;
use burn::tensor::backend::Backend;
use tracing::{info, warn};
use tumor_core::Result;

use super::{CallbackAction, EpochContext, MonitorMode, TrainingCallback};
use crate::artifacts::save_weights;

/// Saves weights (no optimizer state) whenever the monitored metric
/// strictly improves on the best value of this run.
pub struct ModelCheckpoint<B> {
    path: PathBuf,
    monitor: String,
    mode: MonitorMode,
    best: f64,
    _backend: PhantomData<B>,
}

impl<B: Backend> ModelCheckpoint<B> {
    pub fn new(path: impl Into<PathBuf>, monitor: &str) -> Self {
        let mode = MonitorMode::for_metric(monitor);
        Self {
            path: path.into(),
            monitor: monitor.to_string(),
            mode,
            best: mode.initial_best(),
            _backend: PhantomData,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }
}

impl<B: Backend, M: Module<B>> TrainingCallback<B, M> for ModelCheckpoint<B> {
    fn on_train_begin(&mut self) -> Result<()> {
        self.best = self.mode.initial_best();
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_, M>) -> Result<CallbackAction> {
        let Some(current) = ctx.logs.get(&self.monitor) else {
            warn!("Can save best model only with {} available, skipping.", self.monitor);
            return Ok(CallbackAction::Continue);
        };

        if self.mode.improved(current, self.best, 0.0) {
            info!(
                "Epoch {:05}: {} improved from {:.5} to {:.5}, saving model to {}",
                ctx.epoch + 1,
                self.monitor,
                self.best,
                current,
                self.path.display()
            );
            self.best = current;
            save_weights(ctx.model, &self.path)?;
        } else {
            info!(
                "Epoch {:05}: {} did not improve from {:.5}",
                ctx.epoch + 1,
                self.monitor,
                self.best
            );
        }

        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "ModelCheckpoint"
    }
}

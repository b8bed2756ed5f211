use burn::module::Module;
use burn::tensor::backend::Backend;
use tracing::{info, warn};
use tumor_core::Result;

use super::{CallbackAction, EpochContext, EpochLogs, MonitorMode, TrainingCallback};

/// Requests a stop once the monitored metric has failed to improve by more
/// than `min_delta` for `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    monitor: String,
    mode: MonitorMode,
    patience: usize,
    min_delta: f64,
    best: f64,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(monitor: &str, patience: usize, min_delta: f64) -> Self {
        let mode = MonitorMode::for_metric(monitor);
        Self {
            monitor: monitor.to_string(),
            mode,
            patience,
            min_delta: min_delta.abs(),
            best: mode.initial_best(),
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn reset(&mut self) {
        self.best = self.mode.initial_best();
        self.wait = 0;
        self.stopped_epoch = None;
    }

    /// Epoch at which the stop was requested
    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn wait(&self) -> usize {
        self.wait
    }

    pub fn check(&mut self, epoch: usize, logs: &EpochLogs) -> CallbackAction {
        let Some(current) = logs.get(&self.monitor) else {
            warn!(
                "Early stopping conditioned on metric `{}` which is not available",
                self.monitor
            );
            return CallbackAction::Continue;
        };

        if self.mode.improved(current, self.best, self.min_delta) {
            self.best = current;
            self.wait = 0;
            return CallbackAction::Continue;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            self.stopped_epoch = Some(epoch);
            info!("Epoch {:05}: early stopping", epoch + 1);
            return CallbackAction::Stop;
        }
        CallbackAction::Continue
    }
}

impl<B: Backend, M: Module<B>> TrainingCallback<B, M> for EarlyStopping {
    fn on_train_begin(&mut self) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_, M>) -> Result<CallbackAction> {
        Ok(self.check(ctx.epoch, ctx.logs))
    }

    fn name(&self) -> &str {
        "EarlyStopping"
    }
}

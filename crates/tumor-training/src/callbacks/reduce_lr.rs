use burn::module::Module;
use burn::tensor::backend::Backend;
use tracing::{info, warn};
use tumor_core::Result;

use super::{CallbackAction, EpochContext, EpochLogs, MonitorMode, TrainingCallback, LR};

/// Multiplies the learning rate by `factor` after `patience` epochs without
/// an improvement larger than `min_delta`, never going below `min_lr`.
///
/// The rate in effect during the epoch is recorded in the logs as `lr`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    monitor: String,
    mode: MonitorMode,
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    cooldown: usize,
    cooldown_counter: usize,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(monitor: &str, factor: f64, patience: usize, min_lr: f64) -> Self {
        let mode = MonitorMode::for_metric(monitor);
        Self {
            monitor: monitor.to_string(),
            mode,
            factor,
            patience,
            min_lr,
            min_delta: 1e-4,
            cooldown: 0,
            cooldown_counter: 0,
            best: mode.initial_best(),
            wait: 0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    /// Epochs to wait after a reduction before counting plateaus again
    pub fn with_cooldown(mut self, cooldown: usize) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn reset(&mut self) {
        self.best = self.mode.initial_best();
        self.cooldown_counter = 0;
        self.wait = 0;
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_counter > 0
    }

    /// Records `lr` in the logs and lowers it in place on a plateau
    pub fn update(&mut self, epoch: usize, logs: &mut EpochLogs, learning_rate: &mut f64) {
        logs.insert(LR, *learning_rate);

        let Some(current) = logs.get(&self.monitor) else {
            warn!(
                "Reduce LR on plateau conditioned on metric `{}` which is not available",
                self.monitor
            );
            return;
        };

        if self.in_cooldown() {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if self.mode.improved(current, self.best, self.min_delta) {
            self.best = current;
            self.wait = 0;
        } else if !self.in_cooldown() {
            self.wait += 1;
            if self.wait >= self.patience {
                let old_lr = *learning_rate;
                if old_lr > self.min_lr {
                    let new_lr = (old_lr * self.factor).max(self.min_lr);
                    *learning_rate = new_lr;
                    info!(
                        "Epoch {:05}: reducing learning rate from {:e} to {:e}",
                        epoch + 1,
                        old_lr,
                        new_lr
                    );
                    self.cooldown_counter = self.cooldown;
                    self.wait = 0;
                }
            }
        }
    }
}

impl<B: Backend, M: Module<B>> TrainingCallback<B, M> for ReduceLrOnPlateau {
    fn on_train_begin(&mut self) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_, M>) -> Result<CallbackAction> {
        self.update(ctx.epoch, ctx.logs, ctx.learning_rate);
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "ReduceLROnPlateau"
    }
}

//! Training loop driven by batch streams and epoch-end callbacks.
//!
//! Each epoch runs `steps_per_epoch` training batches, then one full pass
//! of the validation stream with the inference-mode model. The epoch logs
//! (`loss`, `acc`, `val_loss`, `val_acc`) are handed to the callbacks in
//! order; any callback may request a stop, which takes effect after all
//! callbacks have seen the epoch.

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tumor_core::{Error, Result};
use tumor_dataset::DirectoryIterator;

use crate::callbacks::{CallbackAction, EpochContext, EpochLogs, TrainingCallback, ACC, LOSS, VAL_ACC, VAL_LOSS};
use crate::model::TumorClassifier;

/// Adam with the Keras defaults (beta1 0.9, beta2 0.999, epsilon 1e-7)
pub fn adam_config() -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-7)
}

/// Mean categorical cross-entropy between logits and one-hot labels
pub fn categorical_crossentropy<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (log_probs * labels).sum_dim(1).neg().mean()
}

/// Number of rows whose arg-max matches the target index
pub fn correct_predictions<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = logits.argmax(1).flatten::<1>(0, 1);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Loop settings
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub epochs: usize,
    pub initial_epoch: usize,
    pub learning_rate: f64,
    pub show_progress: bool,
}

impl FitConfig {
    pub fn new(epochs: usize, learning_rate: f64) -> Self {
        Self {
            epochs,
            initial_epoch: 0,
            learning_rate,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

/// Per-epoch logs of a finished run
#[derive(Debug, Clone, Default)]
pub struct History {
    pub epochs: Vec<EpochLogs>,
    pub stopped_early: bool,
}

impl History {
    pub fn epochs_run(&self) -> usize {
        self.epochs.len()
    }

    /// Best value of `metric` over the run
    pub fn best(&self, metric: &str) -> Option<f64> {
        let values = self.epochs.iter().filter_map(|logs| logs.get(metric));
        if metric.contains("acc") {
            values.reduce(f64::max)
        } else {
            values.reduce(f64::min)
        }
    }
}

/// Running sample-weighted loss and accuracy
#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl Accumulator {
    fn add(&mut self, batch_loss: f64, batch_correct: usize, batch_size: usize) {
        self.loss_sum += batch_loss * batch_size as f64;
        self.correct += batch_correct;
        self.samples += batch_size;
    }

    fn loss(&self) -> f64 {
        self.loss_sum / self.samples.max(1) as f64
    }

    fn accuracy(&self) -> f64 {
        self.correct as f64 / self.samples.max(1) as f64
    }
}

type Callbacks<B> = [Box<dyn TrainingCallback<B, TumorClassifier<B>>>];

/// Trains `model` and returns it together with the run history
pub fn fit<B: AutodiffBackend>(
    mut model: TumorClassifier<B>,
    train: &mut DirectoryIterator<B>,
    validation: &mut DirectoryIterator<B>,
    callbacks: &mut Callbacks<B>,
    config: &FitConfig,
) -> Result<(TumorClassifier<B>, History)> {
    let steps = train.steps_per_epoch();
    if steps == 0 {
        return Err(Error::Training("Training directory contains no images".to_string()));
    }
    if validation.steps_per_epoch() == 0 {
        return Err(Error::Training("Validation directory contains no images".to_string()));
    }

    let mut optimizer = adam_config().init::<B, TumorClassifier<B>>();
    let mut learning_rate = config.learning_rate;
    let mut history = History::default();

    for callback in callbacks.iter_mut() {
        callback.on_train_begin()?;
    }

    info!(
        "Training for {} epochs, {} steps per epoch, {} validation steps",
        config.epochs.saturating_sub(config.initial_epoch),
        steps,
        validation.steps_per_epoch()
    );

    for epoch in config.initial_epoch..config.epochs {
        info!("Epoch {}/{}", epoch + 1, config.epochs);
        let progress = progress_bar(steps as u64, config.show_progress);

        let mut train_stats = Accumulator::default();
        for _ in 0..steps {
            let batch = train.next_batch()?;
            let batch_size = batch.len();

            let logits = model.forward(batch.images);
            let loss = categorical_crossentropy(logits.clone(), batch.labels);

            let batch_loss: f64 = loss.clone().into_scalar().elem();
            let batch_correct = correct_predictions(logits, batch.targets);
            train_stats.add(batch_loss, batch_correct, batch_size);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);

            progress.set_message(format!(
                "loss: {:.4} - acc: {:.4}",
                train_stats.loss(),
                train_stats.accuracy()
            ));
            progress.inc(1);
        }
        progress.finish_and_clear();

        let val_stats = evaluate(&model.valid(), validation)?;

        let mut logs = EpochLogs::new();
        logs.insert(LOSS, train_stats.loss());
        logs.insert(ACC, train_stats.accuracy());
        logs.insert(VAL_LOSS, val_stats.loss());
        logs.insert(VAL_ACC, val_stats.accuracy());

        info!(
            "loss: {:.4} - acc: {:.4} - val_loss: {:.4} - val_acc: {:.4}",
            train_stats.loss(),
            train_stats.accuracy(),
            val_stats.loss(),
            val_stats.accuracy()
        );

        let mut stop = false;
        let mut ctx = EpochContext {
            epoch,
            logs: &mut logs,
            model: &model,
            learning_rate: &mut learning_rate,
        };
        for callback in callbacks.iter_mut() {
            if callback.on_epoch_end(&mut ctx)? == CallbackAction::Stop {
                stop = true;
            }
        }

        history.epochs.push(logs);
        if stop {
            history.stopped_early = true;
            break;
        }
    }

    for callback in callbacks.iter_mut() {
        callback.on_train_end()?;
    }

    Ok((model, history))
}

/// One full pass over `stream` with an inference-mode model
fn evaluate<B: AutodiffBackend>(
    model: &TumorClassifier<B::InnerBackend>,
    stream: &mut DirectoryIterator<B>,
) -> Result<Accumulator> {
    stream.reset();
    let mut stats = Accumulator::default();

    for _ in 0..stream.steps_per_epoch() {
        let batch = stream.next_batch()?;
        let batch_size = batch.len();

        let logits = model.forward(batch.images.inner());
        let loss = categorical_crossentropy(logits.clone(), batch.labels.inner());
        let batch_loss: f64 = loss.into_scalar().elem();
        let batch_correct = correct_predictions(logits, batch.targets.inner());
        stats.add(batch_loss, batch_correct, batch_size);
    }

    Ok(stats)
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    ProgressBar::new(len).with_style(style)
}

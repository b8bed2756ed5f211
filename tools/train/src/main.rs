//! Training driver
//!
//! Fine-tunes the Inception-ResNet-v2 tumor classifier on the configured
//! patch trees. A save directory that already holds an architecture file
//! is resumed from its best weights; otherwise a new model is built.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tumor_core::{load_toml_config, setup_cli_logging, FinetuneConfig};
use tumor_dataset::{create_generators, list_by_mtime};
use tumor_training::{
    backend_name, build_or_reload, callback_set, default_device, fit, FitConfig,
    InceptionResNetV2Config, ModelArtifacts, ModelOrigin, TrainingBackend, TumorClassifier,
    TumorClassifierConfig,
};

/// Tumor patch classifier fine-tuning
#[derive(Parser, Debug)]
#[command(name = "train", about = "Fine-tune Inception-ResNet-v2 on normal/tumor patches")]
struct Args {
    /// Path to the run configuration (TOML)
    #[arg(short, long, value_name = "FILE", default_value = "config/finetune.toml")]
    config: PathBuf,

    /// Override the epoch budget
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Debug logging and per-batch progress
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let mut config: FinetuneConfig =
        load_toml_config(&args.config).context("Failed to load configuration file")?;
    if let Some(epochs) = args.epochs {
        config.hp.epoch = epochs;
    }
    config.validate()?;

    print_config_summary(&config, &args.config);

    let save_dir = &config.paths.saved_model_dir;
    std::fs::create_dir_all(save_dir)
        .with_context(|| format!("Failed to create {}", save_dir.display()))?;
    if let Some(entries) = list_by_mtime(save_dir)? {
        debug!("Existing artifacts (oldest first): {}", entries.join(", "));
    }

    let artifacts = ModelArtifacts::new(save_dir);
    config.hp.image_size = artifacts
        .input_size(config.hp.image_size)
        .context("Failed to read saved architecture")?;

    let device = default_device();
    let started = chrono::Local::now();

    let (mut train, mut validation) = create_generators::<TrainingBackend>(
        &config.paths.train_patches,
        &config.paths.val_patches,
        &config,
        &device,
    )
    .context("Failed to open image directories")?;

    let model_config =
        TumorClassifierConfig::new(InceptionResNetV2Config::new()).with_input_size(config.hp.image_size);
    let (model, origin) = build_or_reload::<TrainingBackend>(
        &artifacts,
        &model_config,
        config.paths.pretrained_backbone.as_deref(),
        &device,
    )
    .context("Failed to prepare model")?;

    match origin {
        ModelOrigin::Built => info!("Model built"),
        ModelOrigin::Reloaded => info!("Model loaded"),
    }

    let mut callbacks =
        callback_set::<TrainingBackend, TumorClassifier<TrainingBackend>>(save_dir, &config.callbacks);
    let fit_config =
        FitConfig::new(config.hp.epoch, config.hp.learning_rate).with_progress(args.verbose);

    let (_, history) = fit(model, &mut train, &mut validation, &mut callbacks, &fit_config)
        .context("Training failed")?;

    let elapsed = chrono::Local::now() - started;
    info!("");
    info!("Training Summary:");
    info!("  Epochs run: {}", history.epochs_run());
    if history.stopped_early {
        info!("  Stopped early on {}", config.callbacks.monitor);
    }
    if let Some(best) = history.best(&config.callbacks.monitor) {
        info!("  Best {}: {:.4}", config.callbacks.monitor, best);
    }
    info!("  Elapsed: {}s", elapsed.num_seconds());
    info!("  Best weights: {}", artifacts.weights_path().display());
    info!("  Log: {}", artifacts.log_path().display());

    Ok(())
}

fn print_config_summary(config: &FinetuneConfig, path: &std::path::Path) {
    info!("Configuration: {}", path.display());
    info!("  Backend: {}", backend_name());
    info!("  Epochs: {}", config.hp.epoch);
    info!("  Batch size: {}", config.hp.batch_size);
    info!("  Image size: {}", config.hp.image_size);
    info!("  Learning rate: {}", config.hp.learning_rate);
    info!("  Workers: {}", config.hp.num_workers);
    info!("  Train dir: {}", config.paths.train_patches.display());
    info!("  Val dir: {}", config.paths.val_patches.display());
    info!("  Save dir: {}", config.paths.saved_model_dir.display());
}

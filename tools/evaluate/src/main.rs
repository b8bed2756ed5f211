//! Evaluation tool
//!
//! Reloads the best weights from the save directory and reports accuracy,
//! the confusion matrix and the ROC curve of the `tumor` class on the
//! validation tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tumor_core::{load_toml_config, setup_cli_logging, FinetuneConfig};
use tumor_dataset::{DataGenerator, FlowOptions};
use tumor_training::{
    backend_name, default_device, evaluate_and_report, reload_model, DefaultBackend, ModelArtifacts,
};

#[derive(Parser, Debug)]
#[command(name = "evaluate", about = "Evaluate the fine-tuned tumor classifier")]
struct Args {
    /// Path to the run configuration (TOML)
    #[arg(short, long, value_name = "FILE", default_value = "config/finetune.toml")]
    config: PathBuf,

    /// Evaluate this directory instead of the validation tree
    #[arg(short, long, value_name = "DIR")]
    data: Option<PathBuf>,

    /// Write reports here instead of the save directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let config: FinetuneConfig =
        load_toml_config(&args.config).context("Failed to load configuration file")?;
    config.validate()?;

    let device = default_device();
    let artifacts = ModelArtifacts::new(&config.paths.saved_model_dir);
    let (model_config, model) = reload_model::<DefaultBackend>(&artifacts, &device)
        .with_context(|| format!("No trained model in {}", artifacts.dir().display()))?;
    info!("Backend: {}", backend_name());

    let data_dir = args.data.unwrap_or_else(|| config.paths.val_patches.clone());
    let output_dir = args.output.unwrap_or_else(|| artifacts.dir().to_path_buf());

    let mut stream = DataGenerator::rescale_only(config.augmentation.rescale)
        .flow_from_directory::<DefaultBackend>(
            &data_dir,
            FlowOptions {
                target_size: model_config.input_size,
                batch_size: config.hp.batch_size,
                shuffle: false,
                seed: config.hp.seed,
                num_workers: config.hp.num_workers,
            },
            &device,
        )
        .with_context(|| format!("Failed to open {}", data_dir.display()))?;

    let report = evaluate_and_report(&model, &mut stream, &data_dir, &output_dir)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!("");
        info!("Evaluation Summary:");
        info!("  Samples: {}", report.metrics.num_samples);
        info!("  Accuracy: {:.4}", report.metrics.accuracy);
        for (i, name) in report.class_names.iter().enumerate() {
            info!(
                "  {name}: precision {:.4}, recall {:.4}, f1 {:.4}",
                report.metrics.per_class_precision[i],
                report.metrics.per_class_recall[i],
                report.metrics.per_class_f1[i]
            );
        }
        info!("  Confusion matrix (rows = actual): {:?}", report.metrics.confusion_matrix);
        match report.auc {
            Some(auc) => info!("  ROC AUC: {auc:.4}"),
            None => info!("  ROC AUC: n/a"),
        }
        info!("  Reports written to {}", output_dir.display());
    }

    Ok(())
}

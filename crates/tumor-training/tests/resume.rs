//! End-to-end runs against a shared save directory.

use std::fs;
use std::path::{Path, PathBuf};

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use image::{ImageBuffer, Rgb, RgbImage};
use tempfile::TempDir;
use tumor_core::{load_toml_config, FinetuneConfig, Result};
use tumor_dataset::{create_generators, DataGenerator, FlowOptions};
use tumor_training::{
    build_or_reload, callback_set, evaluate_and_report, fit, reload_model, FitConfig, History,
    InceptionResNetV2Config, ModelArtifacts, ModelOrigin, TumorClassifier, TumorClassifierConfig,
};

type Inner = NdArray<f32>;
type Train = Autodiff<Inner>;

fn write_patches(root: &Path, per_class: usize) {
    for (class, shade) in [("normal", 40u8), ("tumor", 210u8)] {
        let dir = root.join(class);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let img: RgbImage =
                ImageBuffer::from_fn(12, 12, |x, y| Rgb([shade, (x * 10) as u8, (y + i as u32) as u8]));
            img.save(dir.join(format!("{class}_{i}.png"))).unwrap();
        }
    }
}

fn setup(root: &Path, epochs: usize) -> FinetuneConfig {
    write_patches(&root.join("train"), 3);
    write_patches(&root.join("val"), 2);

    let config_path = root.join("finetune.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[paths]
train_patches = "{train}"
val_patches = "{val}"
saved_model_dir = "{save}"

[hp]
epoch = {epochs}
batch_size = 2
image_size = 75
num_workers = 2
"#,
            train = root.join("train").display(),
            val = root.join("val").display(),
            save = root.join("save").display(),
        ),
    )
    .unwrap();

    let config: FinetuneConfig = load_toml_config(&config_path).unwrap();
    config.validate().unwrap();
    config
}

fn model_config() -> TumorClassifierConfig {
    TumorClassifierConfig::new(
        InceptionResNetV2Config::new()
            .with_block35_repeats(0)
            .with_block17_repeats(0)
            .with_block8_repeats(0),
    )
    .with_hidden_units(4)
    .with_input_size(75)
}

/// One invocation of the training driver
fn run(config: &FinetuneConfig) -> Result<(ModelOrigin, History)> {
    let device = Default::default();
    let save_dir = &config.paths.saved_model_dir;
    let artifacts = ModelArtifacts::new(save_dir);

    let (mut train, mut validation) = create_generators::<Train>(
        &config.paths.train_patches,
        &config.paths.val_patches,
        config,
        &device,
    )?;
    let (model, origin) = build_or_reload::<Train>(&artifacts, &model_config(), None, &device)?;
    let mut callbacks = callback_set::<Train, TumorClassifier<Train>>(save_dir, &config.callbacks);

    let fit_config = FitConfig::new(config.hp.epoch, config.hp.learning_rate);
    let (_, history) = fit(model, &mut train, &mut validation, &mut callbacks, &fit_config)?;
    Ok((origin, history))
}

fn csv_lines(path: PathBuf) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn second_run_reloads_and_appends_log() -> Result<()> {
    let dir = TempDir::new()?;
    let config = setup(dir.path(), 2);
    let artifacts = ModelArtifacts::new(&config.paths.saved_model_dir);

    assert!(!artifacts.has_architecture());
    let (origin, history) = run(&config)?;
    let first = history.epochs_run();
    assert_eq!(origin, ModelOrigin::Built);
    assert_eq!(first, 2);
    assert!(artifacts.has_architecture());
    assert!(artifacts.weights_path().is_file());

    let (origin, history) = run(&config)?;
    let second = history.epochs_run();
    assert_eq!(origin, ModelOrigin::Reloaded);
    assert_eq!(second, 2);

    let lines = csv_lines(artifacts.log_path());
    assert_eq!(lines[0], "epoch,acc,loss,lr,val_acc,val_loss");
    assert_eq!(lines.len(), 1 + first + second);
    assert_eq!(lines.iter().filter(|l| l.starts_with("epoch")).count(), 1);

    let epochs: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(epochs, vec!["0", "1", "0", "1"]);
    Ok(())
}

#[test]
fn evaluation_reads_saved_model() -> Result<()> {
    let dir = TempDir::new()?;
    let config = setup(dir.path(), 1);
    run(&config)?;

    let device = Default::default();
    let artifacts = ModelArtifacts::new(&config.paths.saved_model_dir);
    let (saved, model) = reload_model::<Inner>(&artifacts, &device)?;
    assert_eq!(saved.input_size, 75);

    let mut stream = DataGenerator::rescale_only(config.augmentation.rescale).flow_from_directory::<Inner>(
        &config.paths.val_patches,
        FlowOptions {
            target_size: saved.input_size,
            batch_size: 3,
            shuffle: false,
            seed: config.hp.seed,
            num_workers: 1,
        },
        &device,
    )?;

    let report = evaluate_and_report(&model, &mut stream, &config.paths.val_patches, artifacts.dir())?;
    assert_eq!(report.metrics.num_samples, 4);
    assert!(report.auc.is_some());
    assert!(artifacts.dir().join("roc.csv").is_file());
    assert!(artifacts.dir().join("evaluation.json").is_file());
    Ok(())
}

#[test]
fn early_stop_ends_run_before_budget() -> Result<()> {
    let dir = TempDir::new()?;
    let budget = 12;
    let mut config = setup(dir.path(), budget);
    config.callbacks.early_stopping_patience = 1;

    // six training images allow at most seven distinct accuracies
    let (_, history) = run(&config)?;
    assert!(history.stopped_early);
    assert!(history.epochs_run() < budget);

    // the logger runs after early stopping and still records the last epoch
    let lines = csv_lines(ModelArtifacts::new(&config.paths.saved_model_dir).log_path());
    assert_eq!(lines.len(), 1 + history.epochs_run());
    assert!(lines[1..].iter().all(|l| l.split(',').count() == 6));
    Ok(())
}

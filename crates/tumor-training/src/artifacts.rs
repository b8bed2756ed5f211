//! Model artifacts on disk: architecture description, best weights, run log.
//!
//! The architecture is written once, the first time a model is built, and
//! its presence is what selects the reload path on later runs. Weights are
//! stored with Burn's named MessagePack recorder at full precision.

use std::fs;
use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::Backend;
use tracing::{info, warn};
use tumor_core::{Error, Result};

use crate::model::{InceptionResNetV2, TumorClassifier, TumorClassifierConfig};

pub const ARCHITECTURE_FILE: &str = "InceptionResnet_v2_finetuning.json";
pub const WEIGHTS_FILE: &str = "InRe2weights.best.mpk";
pub const LOG_FILE: &str = "result.csv";

type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Conventional file locations inside the save directory
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    dir: PathBuf,
}

impl ModelArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn architecture_path(&self) -> PathBuf {
        self.dir.join(ARCHITECTURE_FILE)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(WEIGHTS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn has_architecture(&self) -> bool {
        self.architecture_path().is_file()
    }

    /// Architecture written by an earlier run, if any
    pub fn saved_config(&self) -> Result<Option<TumorClassifierConfig>> {
        if !self.has_architecture() {
            return Ok(None);
        }
        TumorClassifierConfig::load(self.architecture_path())
            .map(Some)
            .map_err(|e| {
                Error::Serialization(format!(
                    "Failed to read architecture {}: {e}",
                    self.architecture_path().display()
                ))
            })
    }

    /// Input size the streams must produce: the saved architecture's when
    /// one exists, `requested` otherwise.
    pub fn input_size(&self, requested: usize) -> Result<usize> {
        match self.saved_config()? {
            Some(saved) => {
                if saved.input_size != requested {
                    warn!(
                        "Saved architecture expects {}x{} inputs, ignoring image_size {}",
                        saved.input_size, saved.input_size, requested
                    );
                }
                Ok(saved.input_size)
            }
            None => Ok(requested),
        }
    }
}

/// How the model of a run was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOrigin {
    Built,
    Reloaded,
}

/// Writes a module's parameters to `path`
pub fn save_weights<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    model
        .clone()
        .save_file(path.to_path_buf(), &WeightsRecorder::new())
        .map_err(|e| Error::Checkpoint(format!("Failed to save {}: {e:?}", path.display())))
}

/// Module whose stored record is checked against its own layout before
/// loading. Block lists of a different length are an error here; Burn's
/// `load_record` would assert on them.
pub trait RecordLayout<B: Backend>: Module<B> {
    fn check_layout(&self, _record: &Self::Record) -> Result<()> {
        Ok(())
    }
}

fn check_repeats(name: &str, found: usize, expected: usize) -> Result<()> {
    if found != expected {
        return Err(Error::Checkpoint(format!(
            "weights hold {found} {name} blocks, architecture expects {expected}"
        )));
    }
    Ok(())
}

impl<B: Backend> RecordLayout<B> for InceptionResNetV2<B> {
    fn check_layout(&self, record: &Self::Record) -> Result<()> {
        check_repeats("block35", record.block35.len(), self.block35.len())?;
        check_repeats("block17", record.block17.len(), self.block17.len())?;
        check_repeats("block8", record.block8.len(), self.block8.len())
    }
}

impl<B: Backend> RecordLayout<B> for TumorClassifier<B> {
    fn check_layout(&self, record: &Self::Record) -> Result<()> {
        self.backbone.check_layout(&record.backbone)
    }
}

/// Loads parameters from `path` into `model`.
///
/// Fails if the file is absent or unreadable, if its block layout differs
/// from the module's, or if it holds a different number of parameters.
pub fn load_weights<B: Backend, M: RecordLayout<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    if !path.is_file() {
        return Err(Error::Checkpoint(format!(
            "Weights file not found: {}",
            path.display()
        )));
    }

    let record: M::Record = Recorder::<B>::load(&WeightsRecorder::new(), path.to_path_buf(), device)
        .map_err(|e| Error::Checkpoint(format!("Failed to load {}: {e:?}", path.display())))?;
    model.check_layout(&record)?;

    let expected = model.num_params();
    let loaded = model.load_record(record);

    let found = loaded.num_params();
    if found != expected {
        return Err(Error::Checkpoint(format!(
            "{} holds {found} parameters, architecture expects {expected}",
            path.display()
        )));
    }
    Ok(loaded)
}

/// Builds a fresh classifier and writes its architecture description.
///
/// The backbone is initialised from `pretrained_backbone` when given.
pub fn build_model<B: Backend>(
    artifacts: &ModelArtifacts,
    config: &TumorClassifierConfig,
    pretrained_backbone: Option<&Path>,
    device: &B::Device,
) -> Result<TumorClassifier<B>> {
    let mut model = TumorClassifier::<B>::new(config, device);

    match pretrained_backbone {
        Some(path) => {
            model.backbone = load_weights(model.backbone, path, device)?;
            info!("Backbone initialised from {}", path.display());
        }
        None => warn!("No pretrained backbone configured, backbone starts from random weights"),
    }

    fs::create_dir_all(artifacts.dir())?;
    config
        .save(artifacts.architecture_path())
        .map_err(|e| Error::Serialization(format!("Failed to write architecture: {e}")))?;
    info!(
        "Built model with {} parameters, architecture saved to {}",
        model.num_params(),
        artifacts.architecture_path().display()
    );

    Ok(model)
}

/// Reconstructs the saved architecture and loads the best weights
pub fn reload_model<B: Backend>(
    artifacts: &ModelArtifacts,
    device: &B::Device,
) -> Result<(TumorClassifierConfig, TumorClassifier<B>)> {
    let config = artifacts.saved_config()?.ok_or_else(|| {
        Error::NotFound(format!(
            "Architecture file not found: {}",
            artifacts.architecture_path().display()
        ))
    })?;

    let model = TumorClassifier::<B>::new(&config, device);
    let model = load_weights(model, &artifacts.weights_path(), device)?;
    info!("Reloaded model from {}", artifacts.weights_path().display());

    Ok((config, model))
}

/// Reloads when the architecture file exists, builds otherwise
pub fn build_or_reload<B: Backend>(
    artifacts: &ModelArtifacts,
    config: &TumorClassifierConfig,
    pretrained_backbone: Option<&Path>,
    device: &B::Device,
) -> Result<(TumorClassifier<B>, ModelOrigin)> {
    if artifacts.has_architecture() {
        let (_, model) = reload_model(artifacts, device)?;
        Ok((model, ModelOrigin::Reloaded))
    } else {
        let model = build_model(artifacts, config, pretrained_backbone, device)?;
        Ok((model, ModelOrigin::Built))
    }
}

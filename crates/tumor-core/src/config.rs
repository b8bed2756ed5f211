//! Run configuration for fine-tuning.
//!
//! Loaded from TOML (see `config/finetune.toml`). Only `[paths]` and
//! `hp.epoch` are mandatory; every other value falls back to the defaults
//! below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Top-level fine-tuning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinetuneConfig {
    /// Dataset and artifact locations
    pub paths: PathsConfig,
    /// Hyperparameters
    pub hp: HyperParams,
    /// Training-stream augmentation
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    /// Callback thresholds
    #[serde(default)]
    pub callbacks: CallbackConfig,
}

/// Dataset and artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Training tree with `normal/` and `tumor/` subdirectories
    pub train_patches: PathBuf,
    /// Validation tree with the same layout
    pub val_patches: PathBuf,
    /// Directory receiving architecture, weights and the CSV log
    pub saved_model_dir: PathBuf,
    /// Pretrained backbone record (ImageNet weights)
    #[serde(default)]
    pub pretrained_backbone: Option<PathBuf>,
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperParams {
    /// Epoch budget
    pub epoch: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Side length images are resized to
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Threads decoding and augmenting images
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_batch_size() -> usize {
    32
}

fn default_image_size() -> usize {
    256
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_num_workers() -> usize {
    6
}

fn default_seed() -> u64 {
    42
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            epoch: 50,
            batch_size: default_batch_size(),
            image_size: default_image_size(),
            learning_rate: default_learning_rate(),
            num_workers: default_num_workers(),
            seed: default_seed(),
        }
    }
}

/// Random augmentation applied to the training stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees (applied as ±rotation_range)
    pub rotation_range: f32,
    /// Zoom factors are drawn from [1 - zoom_range, 1 + zoom_range]
    pub zoom_range: f32,
    /// Flip horizontally with probability 0.5
    pub horizontal_flip: bool,
    /// Multiplier applied to raw pixel values
    pub rescale: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 20.0,
            zoom_range: 0.2,
            horizontal_flip: true,
            rescale: 1.0 / 255.0,
        }
    }
}

impl AugmentationConfig {
    /// Rescaling only, used for validation and evaluation streams
    pub fn rescale_only(rescale: f32) -> Self {
        Self {
            rotation_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
            rescale,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_range == 0.0 && self.zoom_range == 0.0 && !self.horizontal_flip
    }
}

/// Thresholds of the epoch-end callbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Metric watched by checkpointing, early stopping and LR decay
    pub monitor: String,
    pub early_stopping_patience: usize,
    pub early_stopping_min_delta: f64,
    /// Multiplier applied to the learning rate on a plateau
    pub lr_factor: f64,
    pub lr_patience: usize,
    pub lr_min_delta: f64,
    pub min_lr: f64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            monitor: "acc".to_string(),
            early_stopping_patience: 8,
            early_stopping_min_delta: 0.0,
            lr_factor: 0.4,
            lr_patience: 5,
            lr_min_delta: 1e-4,
            min_lr: 1e-5,
        }
    }
}

impl FinetuneConfig {
    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.hp.epoch == 0 {
            return Err(Error::Config("hp.epoch must be greater than 0".to_string()));
        }
        if self.hp.batch_size == 0 {
            return Err(Error::Config("hp.batch_size must be greater than 0".to_string()));
        }
        if self.hp.image_size < 75 {
            return Err(Error::Config(format!(
                "hp.image_size must be at least 75, got {}",
                self.hp.image_size
            )));
        }
        if self.hp.learning_rate <= 0.0 {
            return Err(Error::Config("hp.learning_rate must be positive".to_string()));
        }
        if self.hp.num_workers == 0 {
            return Err(Error::Config("hp.num_workers must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.augmentation.zoom_range) {
            return Err(Error::Config(format!(
                "augmentation.zoom_range must be in [0, 1), got {}",
                self.augmentation.zoom_range
            )));
        }
        let factor = self.callbacks.lr_factor;
        if factor <= 0.0 || factor >= 1.0 {
            return Err(Error::Config(format!(
                "callbacks.lr_factor must be in (0, 1), got {factor}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> FinetuneConfig {
        FinetuneConfig {
            paths: PathsConfig {
                train_patches: PathBuf::from("train"),
                val_patches: PathBuf::from("val"),
                saved_model_dir: PathBuf::from("out"),
                pretrained_backbone: None,
            },
            hp: HyperParams::default(),
            augmentation: AugmentationConfig::default(),
            callbacks: CallbackConfig::default(),
        }
    }

    #[test]
    fn test_default_callbacks() {
        let callbacks = CallbackConfig::default();
        assert_eq!(callbacks.early_stopping_patience, 8);
        assert_eq!(callbacks.lr_patience, 5);
        assert!((callbacks.lr_factor - 0.4).abs() < 1e-12);
        assert!((callbacks.min_lr - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn test_validate_defaults() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_epochs() {
        let mut config = sample_config();
        config.hp.epoch = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_lr_factor() {
        let mut config = sample_config();
        config.callbacks.lr_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rescale_only_is_identity() {
        assert!(AugmentationConfig::rescale_only(1.0 / 255.0).is_identity());
        assert!(!AugmentationConfig::default().is_identity());
    }
}

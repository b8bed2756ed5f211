//! Batched image streams read from class-per-directory trees.
//!
//! A [`DataGenerator`] carries the augmentation settings; calling
//! [`DataGenerator::flow_from_directory`] binds it to a directory and
//! yields a [`DirectoryIterator`]. The iterator is infinite: a pass over
//! the directory is `steps_per_epoch()` batches, the last one possibly
//! partial, after which it starts over (reshuffled when shuffling is on).
//! Images of each batch are decoded and augmented on a dedicated rayon
//! pool.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;
use tumor_core::{AugmentationConfig, ClassMapping, Error, FinetuneConfig, ImageSample, Result};

use crate::augmentation::Augmenter;
use crate::loader::{load_rgb, ImageFolder};

/// A decoded, preprocessed image ready for batching
#[derive(Clone, Debug)]
pub struct PatchItem {
    /// CHW float data, `3 * size * size` values
    pub image: Vec<f32>,
    pub label: usize,
}

/// Batch of images with one-hot and integer labels
#[derive(Clone, Debug)]
pub struct PatchBatch<B: Backend> {
    /// `[N, 3, H, W]`
    pub images: Tensor<B, 4>,
    /// One-hot labels `[N, num_classes]`
    pub labels: Tensor<B, 2>,
    /// Class indices `[N]`
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> PatchBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks [`PatchItem`]s into tensors
#[derive(Clone, Debug)]
pub struct PatchBatcher {
    image_size: usize,
    mapping: ClassMapping,
}

impl PatchBatcher {
    pub fn new(image_size: usize, mapping: ClassMapping) -> Self {
        Self { image_size, mapping }
    }
}

impl<B: Backend> Batcher<B, PatchItem, PatchBatch<B>> for PatchBatcher {
    fn batch(&self, items: Vec<PatchItem>, device: &B::Device) -> PatchBatch<B> {
        let batch_size = items.len();
        let num_classes = self.mapping.num_classes();
        let size = self.image_size;

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut labels_data = Vec::with_capacity(batch_size * num_classes);
        let mut targets_data = Vec::with_capacity(batch_size);

        for item in items {
            images_data.extend(item.image);
            labels_data.extend(self.mapping.one_hot(item.label));
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let labels = Tensor::<B, 2>::from_floats(
            TensorData::new(labels_data, [batch_size, num_classes]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        PatchBatch {
            images,
            labels,
            targets,
        }
    }
}

/// Stream settings that do not depend on augmentation
#[derive(Debug, Clone)]
pub struct FlowOptions {
    pub target_size: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
    pub num_workers: usize,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            target_size: 256,
            batch_size: 32,
            shuffle: true,
            seed: 42,
            num_workers: 6,
        }
    }
}

/// Augmentation settings bound to the fixed class mapping
#[derive(Debug, Clone)]
pub struct DataGenerator {
    augmentation: AugmentationConfig,
    mapping: ClassMapping,
}

impl DataGenerator {
    pub fn new(augmentation: AugmentationConfig) -> Self {
        Self {
            augmentation,
            mapping: ClassMapping::default(),
        }
    }

    /// Rescaling only
    pub fn rescale_only(rescale: f32) -> Self {
        Self::new(AugmentationConfig::rescale_only(rescale))
    }

    /// Opens a batched stream over `dir/<class>/**`
    pub fn flow_from_directory<B: Backend>(
        &self,
        dir: impl AsRef<Path>,
        options: FlowOptions,
        device: &B::Device,
    ) -> Result<DirectoryIterator<B>> {
        DirectoryIterator::new(
            ImageFolder::scan(dir.as_ref(), self.mapping.clone())?,
            Augmenter::new(self.augmentation.clone()),
            options,
            device.clone(),
        )
    }
}

/// Training and validation streams for one run.
///
/// The training stream augments and shuffles; the validation stream only
/// rescales and keeps directory order. Both share batch size, target size
/// and worker count.
pub fn create_generators<B: Backend>(
    train_dir: impl AsRef<Path>,
    val_dir: impl AsRef<Path>,
    config: &FinetuneConfig,
    device: &B::Device,
) -> Result<(DirectoryIterator<B>, DirectoryIterator<B>)> {
    let options = FlowOptions {
        target_size: config.hp.image_size,
        batch_size: config.hp.batch_size,
        shuffle: true,
        seed: config.hp.seed,
        num_workers: config.hp.num_workers,
    };

    let train = DataGenerator::new(config.augmentation.clone()).flow_from_directory(
        train_dir,
        options.clone(),
        device,
    )?;
    let validation = DataGenerator::rescale_only(config.augmentation.rescale).flow_from_directory(
        val_dir,
        FlowOptions {
            shuffle: false,
            ..options
        },
        device,
    )?;

    Ok((train, validation))
}

/// Infinite, restartable batch stream over an [`ImageFolder`]
pub struct DirectoryIterator<B: Backend> {
    samples: Vec<ImageSample>,
    augmenter: Augmenter,
    batcher: PatchBatcher,
    options: FlowOptions,
    pool: ThreadPool,
    device: B::Device,
    rng: ChaCha8Rng,
    index_array: Vec<usize>,
    batch_index: usize,
    passes: usize,
}

impl<B: Backend> DirectoryIterator<B> {
    fn new(
        folder: ImageFolder,
        augmenter: Augmenter,
        options: FlowOptions,
        device: B::Device,
    ) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be greater than 0".to_string()));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(options.num_workers.max(1))
            .thread_name(|i| format!("patch-loader-{i}"))
            .build()
            .map_err(|e| Error::Dataset(format!("Failed to build loader pool: {e}")))?;

        info!(
            "Found {} images belonging to {} classes.",
            folder.len(),
            folder.mapping().num_classes()
        );

        let batcher = PatchBatcher::new(options.target_size, folder.mapping().clone());
        let rng = ChaCha8Rng::seed_from_u64(options.seed);

        Ok(Self {
            samples: folder.samples().to_vec(),
            augmenter,
            batcher,
            options,
            pool,
            device,
            rng,
            index_array: Vec::new(),
            batch_index: 0,
            passes: 0,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn batch_size(&self) -> usize {
        self.options.batch_size
    }

    /// Number of batches in one pass: `ceil(num_samples / batch_size)`
    pub fn steps_per_epoch(&self) -> usize {
        self.samples.len().div_ceil(self.options.batch_size)
    }

    /// Completed passes over the directory
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Restarts the current pass from its first batch
    pub fn reset(&mut self) {
        self.batch_index = 0;
    }

    fn set_index_array(&mut self) {
        self.index_array = (0..self.samples.len()).collect();
        if self.options.shuffle {
            self.index_array.shuffle(&mut self.rng);
        }
    }

    /// Produces the next batch, wrapping to a new pass after the last one
    pub fn next_batch(&mut self) -> Result<PatchBatch<B>> {
        if self.samples.is_empty() {
            return Err(Error::Dataset("Cannot draw a batch from an empty directory".to_string()));
        }

        if self.batch_index == 0 {
            self.set_index_array();
        }

        let start = self.batch_index * self.options.batch_size;
        let end = (start + self.options.batch_size).min(self.samples.len());
        let indices = self.index_array[start..end].to_vec();

        self.batch_index += 1;
        if self.batch_index >= self.steps_per_epoch() {
            self.batch_index = 0;
            self.passes += 1;
        }

        let seeds: Vec<u64> = indices.iter().map(|_| self.rng.gen()).collect();
        let items = self.load_items(&indices, &seeds)?;
        Ok(Batcher::<B, PatchItem, PatchBatch<B>>::batch(
            &self.batcher,
            items,
            &self.device,
        ))
    }

    fn load_items(&self, indices: &[usize], seeds: &[u64]) -> Result<Vec<PatchItem>> {
        let size = self.options.target_size as u32;
        let samples = &self.samples;
        let augmenter = &self.augmenter;

        self.pool.install(|| {
            indices
                .par_iter()
                .zip(seeds.par_iter())
                .map(|(&i, &seed)| -> Result<PatchItem> {
                    let sample = &samples[i];
                    let img = load_rgb(&sample.path, size)?;
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    Ok(PatchItem {
                        image: augmenter.process(&img, Some(&mut rng)),
                        label: sample.label,
                    })
                })
                .collect()
        })
    }
}

impl<B: Backend> Iterator for DirectoryIterator<B> {
    type Item = Result<PatchBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

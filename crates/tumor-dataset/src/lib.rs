//! Dataset access for tumor patch fine-tuning.
//!
//! - [`lister`]: modification-time ordered directory listing
//! - [`loader`]: class-per-directory image discovery and decoding
//! - [`augmentation`]: random rotation, zoom and flip with rescaling
//! - [`generator`]: infinite batched streams with a worker pool

pub mod augmentation;
pub mod generator;
pub mod lister;
pub mod loader;

pub use augmentation::{AffineParams, Augmenter};
pub use generator::{
    create_generators, DataGenerator, DirectoryIterator, FlowOptions, PatchBatch, PatchBatcher,
    PatchItem,
};
pub use lister::list_by_mtime;
pub use loader::{load_rgb, ImageFolder};

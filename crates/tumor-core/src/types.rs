//! Core types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Class subdirectory names, in label order.
pub const CLASS_NAMES: [&str; 2] = ["normal", "tumor"];

/// Index of the positive class used for ROC analysis.
pub const POSITIVE_CLASS: usize = 1;

/// Fixed mapping between class directory names and label indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMapping {
    names: Vec<String>,
}

impl Default for ClassMapping {
    fn default() -> Self {
        Self {
            names: CLASS_NAMES.iter().map(|name| name.to_string()).collect(),
        }
    }
}

impl ClassMapping {
    pub fn num_classes(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Label index of a class directory name
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::NotFound(format!("Unknown class: {name}")))
    }

    /// Class name of a label index
    pub fn name_of(&self, index: usize) -> Result<&str> {
        self.names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidArgument(format!("Label out of range: {index}")))
    }

    /// One-hot encoding of a label
    pub fn one_hot(&self, index: usize) -> Vec<f32> {
        let mut encoded = vec![0.0; self.names.len()];
        if let Some(slot) = encoded.get_mut(index) {
            *slot = 1.0;
        }
        encoded
    }
}

/// Image file discovered under a class directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
    pub class_name: String,
}

impl ImageSample {
    pub fn new(path: PathBuf, label: usize, class_name: impl Into<String>) -> Self {
        Self {
            path,
            label,
            class_name: class_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_mapping_indices() -> Result<()> {
        let mapping = ClassMapping::default();
        assert_eq!(mapping.num_classes(), 2);
        assert_eq!(mapping.index_of("normal")?, 0);
        assert_eq!(mapping.index_of("tumor")?, 1);
        assert_eq!(mapping.name_of(1)?, "tumor");
        assert!(mapping.index_of("benign").is_err());
        Ok(())
    }

    #[test]
    fn test_one_hot() {
        let mapping = ClassMapping::default();
        assert_eq!(mapping.one_hot(0), vec![1.0, 0.0]);
        assert_eq!(mapping.one_hot(1), vec![0.0, 1.0]);
    }
}

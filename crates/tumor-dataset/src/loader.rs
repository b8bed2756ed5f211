//! Image discovery and decoding for class-per-directory datasets.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use tracing::debug;
use tumor_core::{ClassMapping, Error, ImageSample, Result};
use walkdir::WalkDir;

/// Extensions accepted when scanning class directories
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// Returns true if the path carries a supported image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Samples of a `root/<class>/**/<image>` tree.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    mapping: ClassMapping,
    samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// Scans every class directory of `mapping` under `root`.
    ///
    /// Samples are ordered by label, then by path. A missing root or class
    /// directory is an error; an empty class directory is not.
    pub fn scan(root: impl Into<PathBuf>, mapping: ClassMapping) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "Dataset directory not found: {}",
                root.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in mapping.names().iter().enumerate() {
            let class_dir = root.join(class_name);
            let mut files = scan_class_directory(&class_dir)?;
            files.sort();
            debug!("{}: {} images", class_dir.display(), files.len());
            samples.extend(
                files
                    .into_iter()
                    .map(|path| ImageSample::new(path, label, class_name.as_str())),
            );
        }

        Ok(Self {
            root,
            mapping,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mapping(&self) -> &ClassMapping {
        &self.mapping
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.mapping.num_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

/// Recursively collects image files below a class directory
fn scan_class_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::NotFound(format!(
            "Class directory not found: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| Error::Dataset(format!("Failed to walk {}: {e}", dir.display())))?;
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Decodes an image as RGB and resizes it to `size`x`size` (nearest neighbour)
pub fn load_rgb(path: &Path, size: u32) -> Result<RgbImage> {
    let img = ImageReader::open(path)
        .map_err(|e| Error::Image(format!("Failed to open {}: {e}", path.display())))?
        .with_guessed_format()?
        .decode()
        .map_err(|e| Error::Image(format!("Failed to decode {}: {e}", path.display())))?;

    if img.width() == size && img.height() == size {
        return Ok(img.to_rgb8());
    }
    Ok(img.resize_exact(size, size, FilterType::Nearest).to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::fs;
    use tempfile::TempDir;

    fn write_image(path: &Path, size: u32) {
        let img: RgbImage = ImageBuffer::from_fn(size, size, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("patch.PNG")));
        assert!(is_image_file(Path::new("a/b/patch.tiff")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("no_extension")));
    }

    #[test]
    fn test_scan_labels_and_recursion() -> Result<()> {
        let dir = TempDir::new()?;
        let normal = dir.path().join("normal");
        let tumor = dir.path().join("tumor").join("slide_01");
        fs::create_dir_all(&normal)?;
        fs::create_dir_all(&tumor)?;

        write_image(&normal.join("b.png"), 8);
        write_image(&normal.join("a.png"), 8);
        write_image(&tumor.join("c.jpg"), 8);
        fs::write(normal.join("readme.txt"), "ignored")?;

        let folder = ImageFolder::scan(dir.path(), ClassMapping::default())?;
        assert_eq!(folder.len(), 3);
        assert_eq!(folder.class_counts(), vec![2, 1]);
        assert!(folder.samples()[0].path.ends_with("a.png"));
        assert_eq!(folder.samples()[2].label, 1);
        assert_eq!(folder.samples()[2].class_name, "tumor");
        Ok(())
    }

    #[test]
    fn test_scan_missing_class_directory() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("normal"))?;
        let result = ImageFolder::scan(dir.path(), ClassMapping::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_scan_missing_root() {
        let result = ImageFolder::scan("/nonexistent/train", ClassMapping::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_load_rgb_resizes() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("patch.png");
        write_image(&path, 12);

        let img = load_rgb(&path, 20)?;
        assert_eq!(img.dimensions(), (20, 20));
        Ok(())
    }

    #[test]
    fn test_load_rgb_corrupt_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not an image")?;
        assert!(matches!(load_rgb(&path, 20), Err(Error::Image(_))));
        Ok(())
    }
}

//! Image-folder dataset scanning.
//!
//! A split directory holds one sub-directory per class; class indices follow
//! the sorted directory names.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{Error, Result};

/// File extensions accepted as images
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "pgm"];

/// A single image file with its label
#[derive(Debug, Clone)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
}

/// The files of one split, grouped by class folder
#[derive(Debug, Clone)]
pub struct ImageFolder {
    /// Root directory of the split
    pub root_dir: PathBuf,
    /// Class names, index = label
    pub classes: Vec<String>,
    /// All samples, class by class
    pub samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// Scan `root_dir`.
    ///
    /// ```text
    /// root_dir/
    /// ├── angry/
    /// │   ├── 0001.png
    /// │   └── ...
    /// ├── disgust/
    /// └── ...
    /// ```
    ///
    /// Fails when the directory is missing, has no class folders or holds
    /// no images at all.
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Scanning image folder {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(Error::PathNotFound(root_dir));
        }

        let mut classes: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    classes.push(name.to_string());
                }
            }
        }
        classes.sort();

        if classes.is_empty() {
            return Err(Error::Dataset(format!(
                "no class folders found in {}",
                root_dir.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in classes.iter().enumerate() {
            let mut files: Vec<PathBuf> = WalkDir::new(root_dir.join(class_name))
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            files.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, files.len());
            samples.extend(files.into_iter().map(|path| ImageSample { path, label }));
        }

        if samples.is_empty() {
            return Err(Error::Dataset(format!(
                "no images found under {}",
                root_dir.display()
            )));
        }

        info!("Found {} images in {} classes", samples.len(), classes.len());

        Ok(Self {
            root_dir,
            classes,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per class, index = label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for s in &self.samples {
            counts[s.label] += 1;
        }
        counts
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

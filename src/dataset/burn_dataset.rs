//! Burn Dataset Integration
//!
//! Faces are decoded and preprocessed once when the split is loaded; only
//! the flip augmentation is applied per epoch. [`FaceDataset::plan_epoch`]
//! fixes the batch order and the flip decisions up front from a seeded
//! `ChaCha8Rng`, so a run is reproducible for a given seed.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{GrayImage, ImageReader};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use super::loader::ImageFolder;
use super::transform::{flip_horizontal, preprocess_face, to_unit_floats};
use crate::utils::error::{Error, Result, ResultExt};
use crate::IMAGE_SIZE;

/// A single preprocessed face ready for batching
#[derive(Clone, Debug)]
pub struct FaceItem {
    /// Pixels as a flattened `[1 * H * W]` array in `[0, 1]`
    pub image: Vec<f32>,
    /// Class label
    pub label: usize,
}

/// One sample of an epoch plan: dataset index and whether to mirror it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedSample {
    pub index: usize,
    pub flip: bool,
}

/// A loaded split of equalized 48x48 faces
#[derive(Debug, Clone)]
pub struct FaceDataset {
    faces: Vec<GrayImage>,
    labels: Vec<usize>,
    classes: Vec<String>,
    /// Random flip + shuffling (training split only)
    augment: bool,
}

impl FaceDataset {
    /// Scan and decode a split directory
    pub fn load(root: &Path, augment: bool) -> Result<Self> {
        let folder = ImageFolder::new(root)?;
        Self::from_folder(&folder, augment)
    }

    /// Decode and preprocess every image of `folder`.
    ///
    /// Any unreadable image aborts the load.
    pub fn from_folder(folder: &ImageFolder, augment: bool) -> Result<Self> {
        let pb = ProgressBar::new(folder.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
                .context("invalid progress bar template")?
                .progress_chars("=> "),
        );
        pb.set_message(format!("Loading {}", folder.root_dir.display()));

        // Parallel decoding with rayon; order follows `folder.samples`
        let decoded: Vec<(GrayImage, usize)> = folder
            .samples
            .par_iter()
            .map(|sample| {
                let img = ImageReader::open(&sample.path)
                    .map_err(|e| Error::ImageLoad(sample.path.clone(), e.to_string()))?
                    .decode()
                    .map_err(|e| Error::ImageLoad(sample.path.clone(), e.to_string()))?;
                pb.inc(1);
                Ok((preprocess_face(&img), sample.label))
            })
            .collect::<Result<_>>()?;
        let (faces, labels): (Vec<_>, Vec<_>) = decoded.into_iter().unzip();
        pb.finish_and_clear();

        info!(
            "Loaded {} faces from {:?} (augment = {})",
            faces.len(),
            folder.root_dir,
            augment
        );

        Ok(Self {
            faces,
            labels,
            classes: folder.classes.clone(),
            augment,
        })
    }

    /// Build from already preprocessed faces
    pub fn from_faces(faces: Vec<(GrayImage, usize)>, classes: Vec<String>, augment: bool) -> Self {
        let (faces, labels) = faces.into_iter().unzip();
        Self {
            faces,
            labels,
            classes,
            augment,
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Item at `index`, mirrored when `flip` is set
    pub fn item(&self, index: usize, flip: bool) -> Option<FaceItem> {
        let face = self.faces.get(index)?;
        let image = if flip {
            to_unit_floats(&flip_horizontal(face))
        } else {
            to_unit_floats(face)
        };

        Some(FaceItem {
            image,
            label: self.labels[index],
        })
    }

    /// Items of one planned batch
    pub fn batch_items(&self, plan: &[PlannedSample]) -> Vec<FaceItem> {
        plan.iter()
            .filter_map(|s| self.item(s.index, s.flip))
            .collect()
    }

    /// Split the dataset into batches for one epoch.
    ///
    /// Augmented datasets are shuffled and each sample is flipped with
    /// p = 0.5, drawn from an RNG seeded by `(seed, epoch)`. Otherwise the
    /// order is sequential and nothing is flipped. Only the last batch may
    /// be short.
    pub fn plan_epoch(&self, batch_size: usize, seed: u64, epoch: usize) -> Vec<Vec<PlannedSample>> {
        let batch_size = batch_size.max(1);
        let mut indices: Vec<usize> = (0..self.faces.len()).collect();

        let samples: Vec<PlannedSample> = if self.augment {
            let mut rng = ChaCha8Rng::seed_from_u64(epoch_seed(seed, epoch));
            indices.shuffle(&mut rng);
            indices
                .into_iter()
                .map(|index| PlannedSample {
                    index,
                    flip: rng.gen_bool(0.5),
                })
                .collect()
        } else {
            indices
                .into_iter()
                .map(|index| PlannedSample { index, flip: false })
                .collect()
        };

        samples.chunks(batch_size).map(|c| c.to_vec()).collect()
    }
}

/// RNG seed of one epoch; distinct `(seed, epoch)` pairs get distinct streams
fn epoch_seed(seed: u64, epoch: usize) -> u64 {
    seed ^ (epoch as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl Dataset<FaceItem> for FaceDataset {
    fn get(&self, index: usize) -> Option<FaceItem> {
        self.item(index, false)
    }

    fn len(&self) -> usize {
        self.faces.len()
    }
}

/// Batch of faces for training or evaluation
#[derive(Clone, Debug)]
pub struct FaceBatch<B: Backend> {
    /// Images with shape `[batch_size, 1, H, W]`
    pub images: Tensor<B, 4>,
    /// Labels with shape `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher stacking [`FaceItem`]s into a [`FaceBatch`]
#[derive(Clone, Debug)]
pub struct FaceBatcher {
    image_size: usize,
}

impl Default for FaceBatcher {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
        }
    }
}

impl FaceBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_size(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, FaceItem, FaceBatch<B>> for FaceBatcher {
    fn batch(&self, items: Vec<FaceItem>, device: &B::Device) -> FaceBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 1, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        FaceBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::Luma;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn gradient_face(offset: u8) -> GrayImage {
        GrayImage::from_fn(IMAGE_SIZE as u32, IMAGE_SIZE as u32, |x, _| {
            Luma([(x as u8).wrapping_mul(5).wrapping_add(offset)])
        })
    }

    fn small_dataset(n: usize, augment: bool) -> FaceDataset {
        let faces = (0..n).map(|i| (gradient_face(i as u8), i % 3)).collect();
        FaceDataset::from_faces(faces, vec!["a".into(), "b".into(), "c".into()], augment)
    }

    #[test]
    fn test_plan_covers_every_sample_once() {
        let ds = small_dataset(10, true);
        let plan = ds.plan_epoch(4, 7, 0);

        assert_eq!(plan.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![4, 4, 2]);

        let mut seen: Vec<usize> = plan.iter().flatten().map(|s| s.index).collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_plan_is_reproducible_per_seed_and_epoch() {
        let ds = small_dataset(32, true);

        assert_eq!(ds.plan_epoch(8, 42, 3), ds.plan_epoch(8, 42, 3));
        assert_ne!(ds.plan_epoch(8, 42, 3), ds.plan_epoch(8, 42, 4));
    }

    #[test]
    fn test_neighbouring_seeds_do_not_share_epoch_plans() {
        let ds = small_dataset(32, true);

        assert_ne!(ds.plan_epoch(8, 42, 1), ds.plan_epoch(8, 43, 0));
        assert_ne!(ds.plan_epoch(8, 0, 2), ds.plan_epoch(8, 2, 0));
        assert_ne!(epoch_seed(42, 1), epoch_seed(43, 0));
    }

    #[test]
    fn test_evaluation_plan_is_sequential_without_flips() {
        let ds = small_dataset(5, false);
        let plan: Vec<PlannedSample> = ds.plan_epoch(2, 42, 9).into_iter().flatten().collect();

        assert!(plan.iter().all(|s| !s.flip));
        assert_eq!(plan.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_flipped_item_is_mirrored() {
        let ds = small_dataset(1, true);
        let plain = ds.item(0, false).unwrap();
        let flipped = ds.item(0, true).unwrap();

        assert_eq!(plain.image[0], flipped.image[IMAGE_SIZE - 1]);
        assert_eq!(ds.get(0).unwrap().image, plain.image);
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn test_batcher_shapes_single_item() {
        let ds = small_dataset(1, false);
        let device = Default::default();
        let batch: FaceBatch<TestBackend> = FaceBatcher::new().batch(ds.batch_items(&ds.plan_epoch(15, 0, 0)[0]), &device);

        assert_eq!(batch.images.dims(), [1, 1, IMAGE_SIZE, IMAGE_SIZE]);
        assert_eq!(batch.targets.dims(), [1]);
    }

    #[test]
    fn test_load_from_disk() -> Result<()> {
        let dir = TempDir::new()?;
        for (i, class) in ["angry", "happy"].iter().enumerate() {
            std::fs::create_dir(dir.path().join(class))?;
            gradient_face(i as u8 * 40)
                .save(dir.path().join(class).join("face.png"))
                .map_err(|e| Error::InvalidInput(e.to_string()))?;
        }

        let ds = FaceDataset::load(dir.path(), false)?;
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.num_classes(), 2);
        assert_eq!(ds.get(1).unwrap().label, 1);
        Ok(())
    }

    #[test]
    fn test_unreadable_image_fails_fast() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("angry"))?;
        std::fs::write(dir.path().join("angry").join("broken.png"), b"not a png")?;

        assert!(matches!(FaceDataset::load(dir.path(), true), Err(Error::ImageLoad(_, _))));
        Ok(())
    }
}

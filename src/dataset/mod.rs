//! Dataset Module
//!
//! Loading of image-folder face datasets and their conversion into Burn
//! batches:
//! - `loader`: class-folder scanning
//! - `transform`: grayscale, equalization, flip
//! - `burn_dataset`: cached faces, epoch plans, `Batcher` implementation

pub mod burn_dataset;
pub mod loader;
pub mod transform;

use serde::{Deserialize, Serialize};

pub use burn_dataset::{FaceBatch, FaceBatcher, FaceDataset, FaceItem, PlannedSample};
pub use loader::{ImageFolder, ImageSample};

/// Split validated in evaluation-only mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EvalSplit {
    Val,
    Test,
    Train,
}

impl std::fmt::Display for EvalSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalSplit::Val => write!(f, "val"),
            EvalSplit::Test => write!(f, "test"),
            EvalSplit::Train => write!(f, "train"),
        }
    }
}

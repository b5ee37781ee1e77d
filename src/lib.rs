//! # Mini Xception
//!
//! Facial emotion (7 classes) and age (5 bands) classification with a
//! Mini Xception network on the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: image-folder loading, equalization, flip augmentation, batching
//! - `model`: the `Classifier` capability, Mini Xception, parameter state
//! - `training`: training/validation passes, plateau scheduler, checkpoints
//! - `inference`: face detectors, frame sources and the two-head predictor
//! - `utils`: errors, logging, metrics and the epoch log / scalar sinks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mini_xception::backend::{default_device, TrainingBackend};
//! use mini_xception::config::TrainConfig;
//!
//! let config = TrainConfig::from_toml_file("configs/train.toml".as_ref())?;
//! mini_xception::training::run::<TrainingBackend>(&config, &default_device())?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use config::{RunTag, TrainConfig};
pub use dataset::{EvalSplit, FaceBatch, FaceBatcher, FaceDataset};
pub use inference::{DemoConfig, Predictor};
pub use model::{Classifier, MiniXception, MiniXceptionConfig, ModelState, Task};
pub use training::{Checkpoint, CheckpointManager, PlateauScheduler, Trainer, ValidationReport};
pub use utils::error::{Error, Result};
pub use utils::metrics::{ClassificationMetrics, ConfusionMatrix};
pub use utils::sinks::EpochRecord;

/// Side of the square grayscale face crops
pub const IMAGE_SIZE: usize = 48;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Run configuration.
//!
//! A [`TrainConfig`] is built once in `main` (defaults, then an optional
//! TOML file, then command-line overrides) and handed by reference to the
//! data pipeline, the training loop and the checkpoint manager.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::EvalSplit;
use crate::model::Task;
use crate::utils::error::{Error, Result};

/// Hyperparameters and paths for one training or evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Last epoch (exclusive) to train up to
    pub epochs: usize,

    /// Samples per batch
    pub batch_size: usize,

    /// Initial Adam learning rate
    pub learning_rate: f64,

    /// L2 penalty added by Adam
    pub weight_decay: f64,

    /// Epochs without validation-loss improvement tolerated before the
    /// learning rate is reduced
    pub lr_patience: usize,

    /// Multiplier applied on every reduction
    pub lr_factor: f64,

    /// Relative improvement required to count as a new best loss
    pub lr_threshold: f64,

    /// Floor for the learning rate
    pub min_lr: f64,

    /// Save a checkpoint every `save_freq` epochs
    pub save_freq: usize,

    /// Root holding the `Train` split
    pub data_path: PathBuf,

    /// Root holding the evaluation splits
    pub test_data_path: PathBuf,

    /// Checkpoint loaded when resuming or evaluating
    pub pretrained: PathBuf,

    /// Continue training from `pretrained`
    pub resume: bool,

    /// Directory receiving checkpoints
    pub save_path: PathBuf,

    /// Prefix of the epoch log file
    pub log_dir: PathBuf,

    /// Directory of the scalar summary store
    pub summary_dir: PathBuf,

    /// Validate `pretrained` once on `eval_split` and exit
    pub evaluate: bool,

    /// Split used in evaluation-only mode
    pub eval_split: EvalSplit,

    /// Emotion (7 classes) or age (5 classes)
    pub task: Task,

    /// Seed for shuffling and flip augmentation
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 300,
            batch_size: 15,
            learning_rate: 0.001,
            weight_decay: 1e-6,
            lr_patience: 40,
            lr_factor: 0.1,
            lr_threshold: 1e-4,
            min_lr: 0.0,
            save_freq: 1,
            data_path: PathBuf::from("data"),
            test_data_path: PathBuf::from("data"),
            pretrained: PathBuf::from("checkpoint/model_weights/train_original.ckpt.json"),
            resume: false,
            save_path: PathBuf::from("checkpoint/model_weights"),
            log_dir: PathBuf::from("checkpoint/logging"),
            summary_dir: PathBuf::from("checkpoint/tensorboard"),
            evaluate: false,
            eval_split: EvalSplit::Val,
            task: Task::Emotion,
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// Load a config from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
    }

    /// Check the invariants that can be checked without touching the disk
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        if self.save_freq == 0 {
            return Err(Error::Config("save_freq must be greater than 0".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::Config("learning_rate must be positive".to_string()));
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return Err(Error::Config("lr_factor must be in (0, 1)".to_string()));
        }
        Ok(())
    }

    pub fn run_tag(&self) -> RunTag {
        RunTag {
            dataset: dataset_name(&self.data_path),
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            patience: self.lr_patience,
            weight_decay: self.weight_decay,
        }
    }

    /// Where the checkpoint for `epoch` is written
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.save_path.join(self.run_tag().checkpoint_file_name(epoch))
    }

    /// Epoch log path: `<log_dir>_y_<tag>`
    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(format!("{}_y_{}", self.log_dir.display(), self.run_tag()))
    }

    /// Directory of the training split
    pub fn train_dir(&self) -> PathBuf {
        self.data_path.join("Train")
    }

    /// Directory validated after every training epoch
    pub fn val_dir(&self) -> PathBuf {
        self.test_data_path.join("Test")
    }

    /// Directory validated in evaluation-only mode
    pub fn eval_dir(&self) -> PathBuf {
        match self.eval_split {
            EvalSplit::Val | EvalSplit::Test => self.test_data_path.join("Test"),
            EvalSplit::Train => self.test_data_path.join("Train"),
        }
    }
}

/// Last path component, as used in run names
fn dataset_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// The hyperparameter tuple that names a run's checkpoints and log
#[derive(Debug, Clone, PartialEq)]
pub struct RunTag {
    pub dataset: String,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub patience: usize,
    pub weight_decay: f64,
}

impl RunTag {
    const CHECKPOINT_PREFIX: &'static str = "y_";
    const CHECKPOINT_SUFFIX: &'static str = ".ckpt.json";

    /// `y_<epoch>_<dataset>_<batch>_<lr>_<patience>_<wd>.ckpt.json`
    pub fn checkpoint_file_name(&self, epoch: usize) -> String {
        format!(
            "{}{}_{}{}",
            Self::CHECKPOINT_PREFIX,
            epoch,
            self,
            Self::CHECKPOINT_SUFFIX
        )
    }

    /// Recover `(epoch, tag)` from a checkpoint file name.
    ///
    /// Dataset names may contain underscores; the numeric fields are taken
    /// from both ends.
    pub fn parse_checkpoint_file_name(name: &str) -> Option<(usize, RunTag)> {
        let body = name
            .strip_prefix(Self::CHECKPOINT_PREFIX)?
            .strip_suffix(Self::CHECKPOINT_SUFFIX)?;

        let mut tail = body.rsplitn(5, '_');
        let weight_decay = tail.next()?.parse().ok()?;
        let patience = tail.next()?.parse().ok()?;
        let learning_rate = tail.next()?.parse().ok()?;
        let batch_size = tail.next()?.parse().ok()?;
        let head = tail.next()?;

        let (epoch, dataset) = head.split_once('_')?;

        Some((
            epoch.parse().ok()?,
            RunTag {
                dataset: dataset.to_string(),
                batch_size,
                learning_rate,
                patience,
                weight_decay,
            },
        ))
    }
}

impl std::fmt::Display for RunTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.dataset, self.batch_size, self.learning_rate, self.patience, self.weight_decay
        )
    }
}

//! Model checkpointing.
//!
//! A checkpoint file is a JSON object holding the full parameter mapping
//! under `mini_xception`, the epoch it was written after and a timestamp.
//! Optimizer statistics are not stored; a resumed run starts Adam afresh.
//! File names encode the epoch and the run's hyperparameters (see
//! [`RunTag`]), so every save point gets its own file.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::tensor::backend::Backend;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{RunTag, TrainConfig};
use crate::model::{LoadReport, ModelState};
use crate::utils::error::{Error, Result};

/// Parameters plus the epoch they belong to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "mini_xception")]
    pub model: ModelState,
    pub epoch: usize,
    #[serde(default)]
    pub saved_at: Option<String>,
}

impl Checkpoint {
    pub fn new(model: ModelState, epoch: usize) -> Self {
        Self {
            model,
            epoch,
            saved_at: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Capture `model` as a checkpoint for `epoch`
    pub fn capture<B: Backend, M: Module<B>>(model: &M, epoch: usize) -> Result<Self> {
        Ok(Self::new(ModelState::capture(model)?, epoch))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)
            .map_err(|e| Error::checkpoint(path, format!("failed to serialize: {}", e)))?;
        writer.flush()?;

        info!("Saved checkpoint in {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::checkpoint(path, e.to_string()))?;
        let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::checkpoint(path, format!("failed to deserialize: {}", e)))?;

        info!("Loaded checkpoint from {:?} (epoch {})", path, checkpoint.epoch);
        Ok(checkpoint)
    }

    /// First epoch to train when resuming from this checkpoint
    pub fn resume_epoch(&self) -> usize {
        self.epoch + 1
    }

    /// Restore the parameters into `model`.
    ///
    /// Non-strict loads tolerate missing and unexpected parameters and log
    /// them; strict loads reject them.
    pub fn restore<B: Backend, M: Module<B>>(
        &self,
        model: M,
        device: &B::Device,
        strict: bool,
    ) -> Result<(M, LoadReport)> {
        let (model, report) = self.model.apply(model, device, strict)?;

        if !report.missing.is_empty() {
            warn!("Parameters missing from checkpoint: {:?}", report.missing);
        }
        if !report.unexpected.is_empty() {
            warn!("Unexpected parameters in checkpoint: {:?}", report.unexpected);
        }

        Ok((model, report))
    }
}

/// Decides when to save and where checkpoints go
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    save_dir: PathBuf,
    tag: RunTag,
    save_freq: usize,
}

impl CheckpointManager {
    pub fn new(save_dir: PathBuf, tag: RunTag, save_freq: usize) -> Self {
        Self {
            save_dir,
            tag,
            save_freq: save_freq.max(1),
        }
    }

    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(config.save_path.clone(), config.run_tag(), config.save_freq)
    }

    pub fn should_save(&self, epoch: usize) -> bool {
        epoch % self.save_freq == 0
    }

    pub fn path_for(&self, epoch: usize) -> PathBuf {
        self.save_dir.join(self.tag.checkpoint_file_name(epoch))
    }

    /// Save `model` if `epoch` is a save point; returns the written path
    pub fn maybe_save<B: Backend, M: Module<B>>(&self, model: &M, epoch: usize) -> Result<Option<PathBuf>> {
        if !self.should_save(epoch) {
            return Ok(None);
        }

        let path = self.path_for(epoch);
        Checkpoint::capture(model, epoch)?.save(&path)?;
        Ok(Some(path))
    }

    /// Checkpoints of this run found on disk, sorted by epoch
    pub fn list_checkpoints(&self) -> Result<Vec<(usize, PathBuf)>> {
        if !self.save_dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&self.save_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some((epoch, tag)) = RunTag::parse_checkpoint_file_name(name) {
                if tag == self.tag {
                    found.push((epoch, path));
                }
            }
        }

        found.sort_by_key(|(epoch, _)| *epoch);
        Ok(found)
    }

    /// Most recent checkpoint of this run, if any
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list_checkpoints()?.pop().map(|(_, path)| path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MiniXception, MiniXceptionConfig, Task};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn emotion_model() -> MiniXception<TestBackend> {
        MiniXception::new(&MiniXceptionConfig::for_task(Task::Emotion), &Default::default())
    }

    fn manager(dir: &Path, save_freq: usize) -> CheckpointManager {
        let config = TrainConfig {
            save_path: dir.to_path_buf(),
            data_path: PathBuf::from("data/fer2013"),
            save_freq,
            ..Default::default()
        };
        CheckpointManager::from_config(&config)
    }

    #[test]
    fn test_save_load_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let device = Default::default();
        let trained = emotion_model();
        let manager = manager(dir.path(), 1);

        let path = manager.maybe_save(&trained, 12)?.expect("epoch 12 is a save point");
        assert!(path.ends_with("y_12_fer2013_15_0.001_40_0.000001.ckpt.json"));

        let checkpoint = Checkpoint::load(&path)?;
        assert_eq!(checkpoint.epoch, 12);
        assert_eq!(checkpoint.resume_epoch(), 13);

        let (restored, report) = checkpoint.restore(emotion_model(), &device, false)?;
        assert!(report.is_exact());
        assert_eq!(ModelState::capture(&restored)?, ModelState::capture(&trained)?);
        Ok(())
    }

    #[test]
    fn test_save_frequency() -> Result<()> {
        let dir = TempDir::new()?;
        let manager = manager(dir.path(), 3);
        let model = emotion_model();

        let saved: Vec<usize> = (0..7)
            .filter_map(|epoch| manager.maybe_save(&model, epoch).transpose().map(|_| epoch))
            .collect();
        assert_eq!(saved, vec![0, 3, 6]);

        let listed: Vec<usize> = manager.list_checkpoints()?.into_iter().map(|(e, _)| e).collect();
        assert_eq!(listed, vec![0, 3, 6]);
        assert_eq!(manager.latest()?, Some(manager.path_for(6)));
        Ok(())
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let result = Checkpoint::load(Path::new("/no/such/y_1_x_1_1_1_1.ckpt.json"));
        assert!(matches!(result, Err(Error::Checkpoint { .. })));
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("broken.ckpt.json");
        fs::write(&path, "{\"epoch\": 3")?;

        assert!(matches!(Checkpoint::load(&path), Err(Error::Checkpoint { .. })));
        Ok(())
    }

    #[test]
    fn test_file_layout_has_stable_keys() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("ckpt.json");
        Checkpoint::capture(&emotion_model(), 4)?.save(&path)?;

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(raw["epoch"], 4);
        assert!(raw["mini_xception"].is_object());
        Ok(())
    }
}

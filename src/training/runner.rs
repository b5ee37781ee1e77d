//! Training driver
//!
//! Wires the config, datasets, model, optimizer, plateau scheduler,
//! checkpoint manager and metric sinks into one sequential run.

use std::path::PathBuf;
use std::time::Instant;

use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use chrono::Utc;
use colored::Colorize;
use tracing::{info, warn};

use crate::config::TrainConfig;
use crate::dataset::FaceDataset;
use crate::model::{Classifier, MiniXception, MiniXceptionConfig};
use crate::training::checkpoint::{Checkpoint, CheckpointManager};
use crate::training::scheduler::{PlateauConfig, PlateauScheduler};
use crate::training::trainer::{build_optimizer, validate, Trainer, ValidationReport};
use crate::utils::error::{Error, Result};
use crate::utils::format_duration;
use crate::utils::sinks::{EpochLogWriter, EpochRecord, LogHeader, MetricsSink, ScalarStore};

/// What a call to [`run`] did
#[derive(Debug)]
pub enum RunOutcome {
    /// Evaluation-only pass over one split
    Evaluated(ValidationReport),
    Trained {
        /// First epoch trained in this run
        start_epoch: usize,
        /// Records of the epochs trained in this run
        records: Vec<EpochRecord>,
        log_path: PathBuf,
        final_lr: f64,
    },
}

/// Train (or evaluate) a Mini Xception according to `config`
pub fn run<B: AutodiffBackend>(config: &TrainConfig, device: &B::Device) -> Result<RunOutcome> {
    config.validate()?;

    let model_config = MiniXceptionConfig::for_task(config.task);
    let mut model = MiniXception::<B>::new(&model_config, device);
    let mut start_epoch = 0;

    if config.resume || config.evaluate {
        let checkpoint = Checkpoint::load(&config.pretrained)?;
        let (restored, report) = checkpoint.restore(model, device, false)?;
        model = restored;
        start_epoch = checkpoint.resume_epoch();
        info!(
            "Restored {} parameters from epoch {}",
            report.loaded.len(),
            checkpoint.epoch
        );
    } else {
        info!("Start training from scratch");
    }

    if config.evaluate {
        return evaluate(config, &model, device);
    }

    println!("{}", "Loading Dataset...".cyan());
    let train_data = FaceDataset::load(&config.train_dir(), true)?;
    let val_data = FaceDataset::load(&config.val_dir(), false)?;
    check_classes(&train_data, model.num_classes())?;
    check_classes(&val_data, model.num_classes())?;
    println!(
        "  Train: {} faces, validation: {} faces, {} classes",
        train_data.len(),
        val_data.len(),
        train_data.num_classes()
    );

    let optimizer = build_optimizer::<B, MiniXception<B>>(config.weight_decay);
    let mut trainer = Trainer::new(model, optimizer, config, device.clone());
    let mut scheduler = PlateauScheduler::new(
        config.learning_rate,
        PlateauConfig {
            factor: config.lr_factor,
            patience: config.lr_patience,
            threshold: config.lr_threshold,
            min_lr: config.min_lr,
            ..Default::default()
        },
    );
    let checkpoints = CheckpointManager::from_config(config);
    if !config.resume {
        if let Some(existing) = checkpoints.latest()? {
            warn!("Checkpoints of this run already exist and will be overwritten (latest {:?})", existing);
        }
    }

    let header = LogHeader {
        run: config.run_tag().to_string(),
        task: config.task.to_string(),
        num_classes: model_config.num_classes,
        start_epoch,
        started_at: Utc::now(),
    };
    let mut sink = MetricsSink::new(
        EpochLogWriter::create(config.log_path(), &header)?,
        ScalarStore::open(&config.summary_dir)?,
    );

    println!(
        "{} epochs {}..{} on {}",
        "Training".green().bold(),
        start_epoch,
        config.epochs,
        config.task
    );

    let mut records = Vec::new();
    for epoch in start_epoch..config.epochs {
        let started = Instant::now();
        let train_loss = trainer.train_one_epoch(&train_data, epoch)?;
        let report = trainer.validate(&val_data, false);

        let lr = scheduler.step(report.loss);
        trainer.set_learning_rate(lr);

        let record = report.to_record(epoch, train_loss);
        for line in record.to_lines() {
            info!("{}", line);
        }
        sink.record(&record)?;

        if let Some(path) = checkpoints.maybe_save(trainer.model(), epoch)? {
            info!("Checkpoint for epoch {} at {:?}", epoch, path);
        }

        info!(
            "Epoch {} done in {}",
            epoch,
            format_duration(started.elapsed().as_secs_f64())
        );
        records.push(record);
    }

    if records.is_empty() {
        warn!(
            "Nothing to train: start epoch {} is not below {} epochs",
            start_epoch, config.epochs
        );
    }

    Ok(RunOutcome::Trained {
        start_epoch,
        records,
        log_path: sink.log_path().to_path_buf(),
        final_lr: scheduler.get_lr(),
    })
}

fn evaluate<B: AutodiffBackend>(
    config: &TrainConfig,
    model: &MiniXception<B>,
    device: &B::Device,
) -> Result<RunOutcome> {
    let dir = config.eval_dir();
    println!("{} {} split at {:?}", "Evaluating".green().bold(), config.eval_split, dir);

    let data = FaceDataset::load(&dir, false)?;
    check_classes(&data, model.num_classes())?;

    let report = validate::<B::InnerBackend, _>(&model.valid(), &data, config.batch_size, device, true);

    println!("{}", report);
    if let Some(confusion) = &report.confusion {
        println!("{}", confusion.display_normalized(Some(config.task.labels())));
    }

    Ok(RunOutcome::Evaluated(report))
}

/// Labels beyond the head's width cannot be scored
fn check_classes(data: &FaceDataset, num_classes: usize) -> Result<()> {
    if data.num_classes() > num_classes {
        return Err(Error::Dataset(format!(
            "dataset has {} classes but the model predicts {}",
            data.num_classes(),
            num_classes
        )));
    }
    if data.num_classes() < num_classes {
        warn!(
            "dataset has {} classes, model predicts {}",
            data.num_classes(),
            num_classes
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::EvalSplit;
    use crate::model::Task;
    use crate::utils::sinks::read_epoch_log;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{GrayImage, Luma};
    use std::path::Path;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn write_split(root: &Path, split: &str, classes: usize, per_class: usize) {
        for class in 0..classes {
            let dir = root.join(split).join(format!("{}", class));
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let img = GrayImage::from_fn(48, 48, |x, y| Luma([((x * (class as u32 + 1) + y + i as u32) % 256) as u8]));
                img.save(dir.join(format!("{}.png", i))).unwrap();
            }
        }
    }

    fn tiny_config(tmp: &TempDir) -> TrainConfig {
        let data = tmp.path().join("faces");
        write_split(&data, "Train", 5, 2);
        write_split(&data, "Test", 5, 1);

        TrainConfig {
            epochs: 2,
            batch_size: 4,
            data_path: data.clone(),
            test_data_path: data,
            save_path: tmp.path().join("weights"),
            log_dir: tmp.path().join("logging"),
            summary_dir: tmp.path().join("summary"),
            task: Task::Age,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_writes_log_scalars_and_checkpoints() -> Result<()> {
        let tmp = TempDir::new()?;
        let config = tiny_config(&tmp);
        let device = Default::default();

        let outcome = run::<TestBackend>(&config, &device)?;

        let RunOutcome::Trained { records, log_path, start_epoch, .. } = outcome else {
            panic!("expected a training run");
        };
        assert_eq!(start_epoch, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(read_epoch_log(&log_path)?, records);
        assert!(config.checkpoint_path(0).exists());
        assert!(config.checkpoint_path(1).exists());

        let scalars = ScalarStore::read(config.summary_dir.join("scalars.jsonl"))?;
        assert_eq!(scalars["val_loss"].len(), 2);
        Ok(())
    }

    #[test]
    fn test_resume_continues_after_saved_epoch() -> Result<()> {
        let tmp = TempDir::new()?;
        let mut config = tiny_config(&tmp);
        let device = Default::default();
        run::<TestBackend>(&config, &device)?;

        config.pretrained = config.checkpoint_path(1);
        config.resume = true;
        config.epochs = 3;

        match run::<TestBackend>(&config, &device)? {
            RunOutcome::Trained { start_epoch, records, .. } => {
                assert_eq!(start_epoch, 2);
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].epoch, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_evaluate_only_reports_confusion() -> Result<()> {
        let tmp = TempDir::new()?;
        let mut config = tiny_config(&tmp);
        config.epochs = 1;
        let device = Default::default();
        run::<TestBackend>(&config, &device)?;

        config.pretrained = config.checkpoint_path(0);
        config.evaluate = true;
        config.eval_split = EvalSplit::Test;

        match run::<TestBackend>(&config, &device)? {
            RunOutcome::Evaluated(report) => {
                assert_eq!(report.num_samples, 5);
                assert_eq!(report.confusion.map(|c| c.total()), Some(5));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_missing_checkpoint_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut config = tiny_config(&tmp);
        config.resume = true;
        config.pretrained = tmp.path().join("nope.ckpt.json");

        let result = run::<TestBackend>(&config, &Default::default());
        assert!(matches!(result, Err(Error::Checkpoint { .. })));
    }

    #[test]
    fn test_too_many_classes_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = tiny_config(&tmp);
        write_split(&config.data_path, "Train", 6, 1);
        config.epochs = 1;

        let result = run::<TestBackend>(&config, &Default::default());
        assert!(matches!(result, Err(Error::Dataset(_))));
    }
}

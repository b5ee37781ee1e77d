//! Mini Xception CLI
//!
//! `train` runs (or resumes, or evaluates) a training run, `demo` labels
//! the faces of an image with emotion and age, and `log` prints an epoch
//! log written by `train`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use mini_xception::backend::{backend_name, default_device, InferenceBackend, TrainingBackend};
use mini_xception::config::TrainConfig;
use mini_xception::dataset::EvalSplit;
use mini_xception::inference::{run_demo, DemoConfig, DetectorKind};
use mini_xception::model::Task;
use mini_xception::training::{run, RunOutcome};
use mini_xception::utils::logging::{init_logging, LogConfig};
use mini_xception::utils::sinks::read_epoch_log;

/// Mini Xception emotion and age classifier
#[derive(Parser, Debug)]
#[command(name = "mini_xception")]
#[command(version)]
#[command(about = "Train and run a Mini Xception emotion/age classifier with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, default_value = "false", global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train, resume or evaluate a model
    Train(TrainArgs),

    /// Predict emotion and age for the faces of an image
    Demo {
        /// Face detector
        #[arg(long, value_enum, default_value = "full-frame")]
        detector: DetectorKind,

        /// Emotion checkpoint
        #[arg(long, default_value = "custom_models/73_dataset_hybrid_64_0.001_40_0.000001.ckpt.json")]
        pretrained: PathBuf,

        /// Age checkpoint
        #[arg(long, default_value = "custom_models/69_dataset_age_15_0.001_40_0.000001.ckpt.json")]
        pretrained_age: PathBuf,

        /// Image or video file; the camera when absent
        #[arg(long)]
        path: Option<PathBuf>,

        /// Treat --path as a still image
        #[arg(long, default_value = "false")]
        image: bool,

        /// Write the predictions as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the epochs recorded in an epoch log
    Log {
        /// Epoch log written by `train`
        file: PathBuf,
    },
}

/// Flags of `train`; each one overrides the config file (or the defaults)
#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Initial learning rate
    #[arg(long)]
    lr: Option<f64>,

    #[arg(long)]
    weight_decay: Option<f64>,

    /// Training dataset root (contains `Train/`)
    #[arg(long)]
    datapath: Option<PathBuf>,

    /// Validation dataset root (contains `Test/`)
    #[arg(long)]
    test_datapath: Option<PathBuf>,

    /// Checkpoint loaded by --resume and --evaluate
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Resume training from --pretrained
    #[arg(long, default_value = "false")]
    resume: bool,

    /// Checkpoint directory
    #[arg(long)]
    savepath: Option<PathBuf>,

    /// Save a checkpoint every N epochs
    #[arg(long)]
    savefreq: Option<usize>,

    /// Epoch log path prefix
    #[arg(long)]
    logdir: Option<PathBuf>,

    /// Scalar summary directory
    #[arg(long)]
    tensorboard: Option<PathBuf>,

    /// Epochs without improvement before the learning rate drops
    #[arg(long)]
    lr_patience: Option<usize>,

    /// Only evaluate --pretrained on the split chosen with --mode
    #[arg(long, default_value = "false")]
    evaluate: bool,

    /// Split evaluated with --evaluate
    #[arg(long, value_enum)]
    mode: Option<EvalSplit>,

    /// Train the 5-class age head instead of the emotion head
    #[arg(long, default_value = "false")]
    age_mode: bool,

    #[arg(long)]
    seed: Option<u64>,
}

impl TrainArgs {
    fn into_config(self) -> Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => TrainConfig::default(),
        };

        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.lr {
            config.learning_rate = v;
        }
        if let Some(v) = self.weight_decay {
            config.weight_decay = v;
        }
        if let Some(v) = self.datapath {
            config.data_path = v;
        }
        if let Some(v) = self.test_datapath {
            config.test_data_path = v;
        }
        if let Some(v) = self.pretrained {
            config.pretrained = v;
        }
        if let Some(v) = self.savepath {
            config.save_path = v;
        }
        if let Some(v) = self.savefreq {
            config.save_freq = v;
        }
        if let Some(v) = self.logdir {
            config.log_dir = v;
        }
        if let Some(v) = self.tensorboard {
            config.summary_dir = v;
        }
        if let Some(v) = self.lr_patience {
            config.lr_patience = v;
        }
        if let Some(v) = self.mode {
            config.eval_split = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        config.resume |= self.resume;
        config.evaluate |= self.evaluate;
        if self.age_mode {
            config.task = Task::Age;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train(args) => cmd_train(args.into_config()?),
        Commands::Demo {
            detector,
            pretrained,
            pretrained_age,
            path,
            image,
            output,
        } => cmd_demo(DemoConfig {
            detector,
            pretrained,
            pretrained_age,
            path,
            image,
            output,
        }),
        Commands::Log { file } => cmd_log(&file),
    }
}

fn print_banner() {
    println!(
        "{}",
        format!("Mini Xception {} .. {}", mini_xception::VERSION, backend_name())
            .green()
            .bold()
    );
}

fn cmd_train(config: TrainConfig) -> Result<()> {
    info!("Run tag: {}", config.run_tag());

    let outcome = run::<TrainingBackend>(&config, &default_device()).context("Training run failed")?;

    match outcome {
        RunOutcome::Evaluated(report) => {
            println!(
                "{} {} faces, accuracy {:.1}%",
                "Evaluation done:".green().bold(),
                report.num_samples,
                report.accuracy * 100.0
            );
        }
        RunOutcome::Trained {
            records,
            log_path,
            final_lr,
            ..
        } => {
            if let Some(last) = records.last() {
                println!(
                    "{} {} epochs, last val_loss {:.3}, accuracy {:.1}%, lr {:.1e}",
                    "Training done:".green().bold(),
                    records.len(),
                    last.val_loss,
                    last.accuracy * 100.0,
                    final_lr
                );
            }
            println!("  Epoch log: {:?}", log_path);
        }
    }

    Ok(())
}

fn cmd_demo(config: DemoConfig) -> Result<()> {
    let reports = run_demo::<InferenceBackend>(&config, default_device()).context("Demo failed")?;

    if reports.is_empty() {
        println!("{} no frames to process", "Note:".yellow());
    }
    Ok(())
}

fn cmd_log(file: &Path) -> Result<()> {
    let records = read_epoch_log(file).with_context(|| format!("Failed to read epoch log {:?}", file))?;

    println!(
        "{}",
        format!(
            "{:>6} {:>11} {:>9} {:>9} {:>10} {:>8}",
            "epoch", "train_loss", "val_loss", "accuracy", "percision", "recall"
        )
        .bold()
    );
    for r in &records {
        println!(
            "{:>6} {:>11.3} {:>9.3} {:>8.1}% {:>9.1}% {:>7.1}%",
            r.epoch,
            r.train_loss,
            r.val_loss,
            r.accuracy * 100.0,
            r.precision * 100.0,
            r.recall * 100.0
        );
    }

    if let Some(best) = records
        .iter()
        .min_by(|a, b| a.val_loss.total_cmp(&b.val_loss))
    {
        println!(
            "{} epoch {} (val_loss {:.3})",
            "Best:".cyan(),
            best.epoch,
            best.val_loss
        );
    }
    Ok(())
}

//! Training Module
//!
//! - `trainer`: per-epoch training pass and validation with macro metrics
//! - `scheduler`: reduce-on-plateau learning rate
//! - `checkpoint`: parameter snapshots and resume
//! - `runner`: the end-to-end driver used by the `train` command

pub mod checkpoint;
pub mod runner;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use runner::{run, RunOutcome};
pub use scheduler::{PlateauConfig, PlateauScheduler};
pub use trainer::{build_optimizer, validate, Trainer, ValidationReport};

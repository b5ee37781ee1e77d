//! Plateau learning-rate scheduler
//!
//! Watches a metric that should decrease (the validation loss) and cuts
//! the learning rate when it stops improving. A value counts as an
//! improvement when it beats the best value seen so far by the relative
//! threshold. After more than `patience` consecutive epochs without
//! improvement the rate is multiplied by `factor` (never below `min_lr`)
//! and the counter starts again from zero.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Settings for [`PlateauScheduler`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    /// Relative improvement needed to reset the counter
    pub threshold: f64,
    pub min_lr: f64,
    /// Reductions smaller than this are skipped
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.1,
            patience: 10,
            threshold: 1e-4,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

/// Reduce-on-plateau state
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    config: PlateauConfig,
    best: f64,
    num_bad_epochs: usize,
    current_lr: f64,
    num_reductions: usize,
}

impl PlateauScheduler {
    pub fn new(initial_lr: f64, config: PlateauConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            num_bad_epochs: 0,
            current_lr: initial_lr,
            num_reductions: 0,
        }
    }

    fn is_improvement(&self, metric: f64) -> bool {
        metric < self.best * (1.0 - self.config.threshold)
    }

    /// Feed one epoch's validation loss; returns the learning rate to use next
    pub fn step(&mut self, metric: f64) -> f64 {
        if self.is_improvement(metric) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > self.config.patience {
            let new_lr = (self.current_lr * self.config.factor).max(self.config.min_lr);
            if self.current_lr - new_lr > self.config.eps {
                info!(
                    "Reducing learning rate from {:.3e} to {:.3e} after {} epochs without improvement",
                    self.current_lr, new_lr, self.num_bad_epochs
                );
                self.current_lr = new_lr;
                self.num_reductions += 1;
            }
            self.num_bad_epochs = 0;
        }

        self.current_lr
    }

    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn num_bad_epochs(&self) -> usize {
        self.num_bad_epochs
    }

    /// How many times the rate has been cut so far
    pub fn num_reductions(&self) -> usize {
        self.num_reductions
    }
}

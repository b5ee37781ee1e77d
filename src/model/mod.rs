//! Model Module
//!
//! The training and evaluation code only sees a [`Classifier`]: something
//! that maps `[batch, 1, 48, 48]` images to `[batch, num_classes]` logits.
//! Behaviour modes map onto Burn's autodiff split: a module on an
//! `AutodiffBackend` is in training mode (batch-norm batch statistics,
//! gradients tracked) and `AutodiffModule::valid()` yields the evaluation
//! copy on the inner backend. Parameters are read and written through
//! [`ModelState`].

pub mod state;
pub mod xception;

use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

pub use state::{LoadReport, ModelState};
pub use xception::{MiniXception, MiniXceptionConfig};

/// Image classifier consumed by the training loop, validation and demo
pub trait Classifier<B: Backend>: Module<B> {
    /// Per-class logits, shape `[batch_size, num_classes]`
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;
}

/// Emotion labels, index = class
pub const EMOTION_LABELS: [&str; 7] = ["Angry", "Disgust", "Fear", "Happy", "Sad", "Surprise", "Neutral"];

/// Age bands, index = class
pub const AGE_LABELS: [&str; 5] = ["Child", "Teen", "Young adult", "Adult", "Senior"];

/// What a classifier head predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Emotion,
    Age,
}

impl Task {
    pub fn num_classes(&self) -> usize {
        self.labels().len()
    }

    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Task::Emotion => &EMOTION_LABELS,
            Task::Age => &AGE_LABELS,
        }
    }

    /// Label for a class index, `"Unknown"` when out of range
    pub fn label(&self, class: usize) -> &'static str {
        self.labels().get(class).copied().unwrap_or("Unknown")
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Emotion => write!(f, "emotion"),
            Task::Age => write!(f, "age"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_heads() {
        assert_eq!(Task::Emotion.num_classes(), 7);
        assert_eq!(Task::Age.num_classes(), 5);
        assert_eq!(Task::Emotion.label(3), "Happy");
        assert_eq!(Task::Age.label(9), "Unknown");
    }
}

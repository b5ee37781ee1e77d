//! Inference module for the emotion and age demo
//!
//! - `detector`: face box proposals
//! - `source`: still images (video and camera are reported unavailable)
//! - `predictor`: both heads on one preprocessed crop
//! - `demo`: the `demo` command

pub mod demo;
pub mod detector;
pub mod predictor;
pub mod source;

pub use demo::{run_demo, DemoConfig};
pub use detector::{CenterCropDetector, DetectorKind, FaceBox, FaceDetector, FullFrameDetector};
pub use predictor::{FacePrediction, FrameReport, HeadPrediction, Predictor};
pub use source::FrameSource;

//! Emotion and age prediction for face crops

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::tensor::{activation::softmax, backend::Backend, Tensor, TensorData};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::transform::{preprocess_face, to_unit_floats};
use crate::inference::detector::{FaceBox, FaceDetector};
use crate::model::{Classifier, MiniXception, MiniXceptionConfig, Task};
use crate::training::Checkpoint;
use crate::utils::error::Result;
use crate::utils::metrics::round_to;
use crate::IMAGE_SIZE;

/// Output of one classifier head
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadPrediction {
    pub class: usize,
    pub label: String,
    /// Probability of `class`, rounded to 2 decimals
    pub confidence: f64,
    /// Softmax over all classes, rounded to 3 decimals
    pub probabilities: Vec<f64>,
}

impl HeadPrediction {
    /// Round, pick the most likely class and label it
    pub fn from_probabilities(probs: &[f64], task: Task) -> Self {
        let class = probs
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
            .0;

        let probabilities: Vec<f64> = probs.iter().map(|&p| round_to(p, 3)).collect();
        let confidence = probabilities.get(class).map(|&p| round_to(p, 2)).unwrap_or(0.0);

        Self {
            class,
            label: task.label(class).to_string(),
            confidence,
            probabilities,
        }
    }
}

/// Both heads' predictions for one detected face
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacePrediction {
    pub face: FaceBox,
    pub emotion: HeadPrediction,
    pub age: HeadPrediction,
    pub inference_time_ms: f64,
}

/// Every face found in one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame: usize,
    pub source: Option<PathBuf>,
    pub faces: Vec<FacePrediction>,
}

/// Emotion and age models in evaluation mode
pub struct Predictor<B: Backend> {
    emotion: MiniXception<B>,
    age: MiniXception<B>,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(emotion: MiniXception<B>, age: MiniXception<B>, device: B::Device) -> Self {
        Self { emotion, age, device }
    }

    /// Load both heads from their checkpoints; every parameter must match
    pub fn load(emotion_path: &Path, age_path: &Path, device: B::Device) -> Result<Self> {
        let emotion = load_head(Task::Emotion, emotion_path, &device)?;
        let age = load_head(Task::Age, age_path, &device)?;
        Ok(Self::new(emotion, age, device))
    }

    /// Predict emotion and age of an already cropped face
    pub fn predict_face(&self, face: &DynamicImage) -> (HeadPrediction, HeadPrediction) {
        let pixels = to_unit_floats(&preprocess_face(face));
        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(pixels, [1, 1, IMAGE_SIZE, IMAGE_SIZE]),
            &self.device,
        );

        let emotion = self.head(&self.emotion, input.clone(), Task::Emotion);
        let age = self.head(&self.age, input, Task::Age);
        (emotion, age)
    }

    /// Detect faces in `frame` and predict each one
    pub fn predict_frame(&self, frame: &DynamicImage, detector: &dyn FaceDetector) -> Vec<FacePrediction> {
        detector
            .detect(frame)
            .into_iter()
            .filter_map(|face| {
                let crop = face.crop(frame)?;
                let start = Instant::now();
                let (emotion, age) = self.predict_face(&crop);
                let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;
                debug!("face {:?}: {} / {}", face, emotion.label, age.label);
                Some(FacePrediction {
                    face,
                    emotion,
                    age,
                    inference_time_ms,
                })
            })
            .collect()
    }

    fn head(&self, model: &MiniXception<B>, input: Tensor<B, 4>, task: Task) -> HeadPrediction {
        let num_classes = model.num_classes();
        let probs = softmax(model.forward(input).reshape([1, num_classes]), 1);
        let probs: Vec<f64> = probs.into_data().iter::<f32>().map(|p| p as f64).collect();
        HeadPrediction::from_probabilities(&probs, task)
    }
}

fn load_head<B: Backend>(task: Task, path: &Path, device: &B::Device) -> Result<MiniXception<B>> {
    let model = MiniXception::new(&MiniXceptionConfig::for_task(task), device);
    let checkpoint = Checkpoint::load(path)?;
    let (model, _) = checkpoint.restore(model, device, true)?;
    info!("{} model loaded from {:?}", task, path);
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::detector::{CenterCropDetector, FullFrameDetector};
    use crate::model::{AGE_LABELS, EMOTION_LABELS};
    use burn_ndarray::NdArray;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn predictor() -> Predictor<TestBackend> {
        let device = Default::default();
        Predictor::new(
            MiniXception::new(&MiniXceptionConfig::for_task(Task::Emotion), &device),
            MiniXception::new(&MiniXceptionConfig::for_task(Task::Age), &device),
            device,
        )
    }

    fn face(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| Luma([((x * 3 + y) % 256) as u8])))
    }

    #[test]
    fn test_uniform_probabilities() {
        let p = HeadPrediction::from_probabilities(&[0.2; 5], Task::Age);
        assert_eq!(p.class, 0);
        assert_eq!(p.label, AGE_LABELS[0]);
        assert_eq!(p.probabilities, vec![0.2; 5]);
        assert_eq!(p.confidence, 0.2);
    }

    #[test]
    fn test_rounding() {
        // softmax of [0, 0, 0, 0, 0, 0, 5]
        let mut probs = [0.006476; 7];
        probs[6] = 0.961143;
        let p = HeadPrediction::from_probabilities(&probs, Task::Emotion);
        assert_eq!(p.class, 6);
        assert_eq!(p.label, "Neutral");
        assert_eq!(p.probabilities[6], 0.961);
        assert_eq!(p.probabilities[0], 0.006);
        assert_eq!(p.confidence, 0.96);
    }

    #[test]
    fn test_each_head_uses_its_own_logits() {
        let (emotion, age) = predictor().predict_face(&face(48, 48));

        assert_eq!(emotion.probabilities.len(), EMOTION_LABELS.len());
        assert_eq!(age.probabilities.len(), AGE_LABELS.len());
        assert!(AGE_LABELS.contains(&age.label.as_str()));
        let total: f64 = age.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_predict_frame_per_detector() {
        let predictor = predictor();
        let frame = face(64, 40);

        let full = predictor.predict_frame(&frame, &FullFrameDetector);
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].face.width, 64);

        let centred = predictor.predict_frame(&frame, &CenterCropDetector);
        assert_eq!(centred[0].face, FaceBox { x: 12, y: 0, width: 40, height: 40 });
    }

    #[test]
    fn test_load_is_strict() -> Result<()> {
        let tmp = TempDir::new()?;
        let device = Default::default();
        let emotion_path = tmp.path().join("emotion.ckpt.json");
        let age_path = tmp.path().join("age.ckpt.json");

        let p = predictor();
        Checkpoint::capture(&p.emotion, 3)?.save(&emotion_path)?;
        Checkpoint::capture(&p.age, 4)?.save(&age_path)?;

        let loaded = Predictor::<TestBackend>::load(&emotion_path, &age_path, device)?;
        assert_eq!(loaded.predict_face(&face(48, 48)), p.predict_face(&face(48, 48)));

        // heads swapped: the classifier widths disagree
        assert!(Predictor::<TestBackend>::load(&age_path, &emotion_path, Default::default()).is_err());
        Ok(())
    }
}

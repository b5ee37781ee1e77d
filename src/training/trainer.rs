//! Training and validation passes
//!
//! One call to [`Trainer::train_one_epoch`] runs forward, cross-entropy,
//! backward and an Adam step for every batch of the epoch plan.
//! [`validate`] runs the evaluation copy of a model (no autodiff, batch
//! norm on running statistics) over a split and reduces the accumulated
//! predictions to macro metrics.

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use tracing::{debug, info};

use crate::config::TrainConfig;
use crate::dataset::{FaceBatch, FaceBatcher, FaceDataset};
use crate::model::Classifier;
use crate::utils::error::{Error, Result};
use crate::utils::metrics::{round_to, ClassificationMetrics, ConfusionMatrix, RunningAverage};
use crate::utils::sinks::EpochRecord;

/// Adam with L2 weight decay
pub fn build_optimizer<B, M>(weight_decay: f64) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(weight_decay as f32)))
        .init()
}

/// Result of one validation pass, rounded to 3 decimals
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Mean batch loss
    pub loss: f64,
    pub accuracy: f64,
    /// Macro precision
    pub precision: f64,
    /// Macro recall
    pub recall: f64,
    pub num_samples: usize,
    /// Filled on request (evaluation-only runs)
    pub confusion: Option<ConfusionMatrix>,
}

impl ValidationReport {
    /// Epoch log record combining this report with the epoch's training loss
    pub fn to_record(&self, epoch: usize, train_loss: f64) -> EpochRecord {
        EpochRecord::new(
            epoch,
            train_loss,
            self.loss,
            self.accuracy,
            self.precision,
            self.recall,
        )
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Val loss = {} .. Accuracy = {} .. Percision = {} .. Recall = {}",
            self.loss, self.accuracy, self.precision, self.recall
        )
    }
}

/// Evaluate `model` on every sample of `dataset`, in order.
///
/// Pass the evaluation copy of a model (`model.valid()`); nothing here
/// writes to its parameters.
pub fn validate<B, M>(
    model: &M,
    dataset: &FaceDataset,
    batch_size: usize,
    device: &B::Device,
    with_confusion: bool,
) -> ValidationReport
where
    B: Backend,
    M: Classifier<B>,
{
    let batcher = FaceBatcher::new();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let num_classes = model.num_classes();

    let mut losses = RunningAverage::new();
    let mut labels: Vec<usize> = Vec::new();
    let mut predictions: Vec<usize> = Vec::new();

    for plan in dataset.plan_epoch(batch_size, 0, 0) {
        let batch: FaceBatch<B> = batcher.batch(dataset.batch_items(&plan), device);
        let n = batch.targets.dims()[0];

        let logits = model.forward(batch.images).reshape([n, num_classes]);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        let loss_value: f64 = loss.into_scalar().elem();
        losses.add(loss_value);
        debug!("validation loss = {:.3}", loss_value);

        let batch_predictions = logits.argmax(1).reshape([n]);
        predictions.extend(batch_predictions.into_data().iter::<i64>().map(|p| p as usize));
        labels.extend(batch.targets.into_data().iter::<i64>().map(|t| t as usize));
    }

    let metrics = ClassificationMetrics::from_labels(&labels, &predictions, num_classes);

    let report = ValidationReport {
        loss: round_to(losses.average(), 3),
        accuracy: round_to(metrics.accuracy, 3),
        precision: round_to(metrics.macro_precision, 3),
        recall: round_to(metrics.macro_recall, 3),
        num_samples: metrics.total_samples,
        confusion: with_confusion.then_some(metrics.confusion_matrix),
    };
    info!("{}", report);

    report
}

/// Owns the model and optimizer during training
pub struct Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: Classifier<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    model: M,
    optimizer: O,
    learning_rate: f64,
    batch_size: usize,
    seed: u64,
    batcher: FaceBatcher,
    device: B::Device,
}

impl<B, M, O> Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: Classifier<B> + AutodiffModule<B>,
    M::InnerModule: Classifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    pub fn new(model: M, optimizer: O, config: &TrainConfig, device: B::Device) -> Self {
        Self {
            model,
            optimizer,
            learning_rate: config.learning_rate,
            batch_size: config.batch_size,
            seed: config.seed,
            batcher: FaceBatcher::new(),
            device,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    /// Train over every batch of `dataset` once.
    ///
    /// Returns the mean batch loss rounded to 3 decimals.
    pub fn train_one_epoch(&mut self, dataset: &FaceDataset, epoch: usize) -> Result<f64> {
        let plan = dataset.plan_epoch(self.batch_size, self.seed, epoch);
        if plan.is_empty() {
            return Err(Error::Dataset("training split is empty".to_string()));
        }

        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let num_classes = self.model.num_classes();
        let mut losses = RunningAverage::new();

        info!(
            "Training epoch {} with {} batches (lr = {:.3e})",
            epoch,
            plan.len(),
            self.learning_rate
        );

        for batch_plan in &plan {
            let batch: FaceBatch<B> = self.batcher.batch(dataset.batch_items(batch_plan), &self.device);
            let n = batch.targets.dims()[0];

            // logits stay [n, C] and targets [n] even when n == 1
            let logits = self.model.forward(batch.images).reshape([n, num_classes]);
            let targets = batch.targets.reshape([n]);

            let loss = loss_fn.forward(logits, targets);
            let loss_value: f64 = loss.clone().into_scalar().elem();
            losses.add(loss_value);
            info!("training @ epoch {} .. loss = {:.3}", epoch, loss_value);

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);
        }

        Ok(round_to(losses.average(), 3))
    }

    /// Validate the current parameters without touching them
    pub fn validate(&self, dataset: &FaceDataset, with_confusion: bool) -> ValidationReport {
        let model = self.model.valid();
        validate::<B::InnerBackend, _>(&model, dataset, self.batch_size, &self.device, with_confusion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MiniXception, MiniXceptionConfig, ModelState, Task};
    use crate::IMAGE_SIZE;
    use burn::backend::Autodiff;
    use burn::module::Module;
    use burn::nn::{Linear, LinearConfig};
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use image::{GrayImage, Luma};

    type TestBackend = Autodiff<NdArray<f32>>;

    /// Single linear layer over the flattened image
    #[derive(Module, Debug)]
    struct TinyClassifier<B: Backend> {
        linear: Linear<B>,
        num_classes: usize,
    }

    impl<B: Backend> TinyClassifier<B> {
        fn new(num_classes: usize, device: &B::Device) -> Self {
            Self {
                linear: LinearConfig::new(IMAGE_SIZE * IMAGE_SIZE, num_classes).init(device),
                num_classes,
            }
        }
    }

    impl<B: Backend> Classifier<B> for TinyClassifier<B> {
        fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
            let [n, _, h, w] = images.dims();
            self.linear.forward(images.reshape([n, h * w]))
        }

        fn num_classes(&self) -> usize {
            self.num_classes
        }
    }

    fn faces(n: usize, num_classes: usize, augment: bool) -> FaceDataset {
        let items = (0..n)
            .map(|i| {
                let label = i % num_classes;
                let face = GrayImage::from_fn(IMAGE_SIZE as u32, IMAGE_SIZE as u32, |x, y| {
                    Luma([((x * (label as u32 + 1) + y) % 256) as u8])
                });
                (face, label)
            })
            .collect();
        let classes = (0..num_classes).map(|c| c.to_string()).collect();
        FaceDataset::from_faces(items, classes, augment)
    }

    fn config(batch_size: usize) -> TrainConfig {
        TrainConfig {
            batch_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_sample_batch_trains() -> Result<()> {
        let device = Default::default();
        let model = MiniXception::<TestBackend>::new(&MiniXceptionConfig::for_task(Task::Emotion), &device);
        let optimizer = build_optimizer::<TestBackend, MiniXception<TestBackend>>(1e-6);
        let mut trainer = Trainer::new(model, optimizer, &config(1), device);

        let loss = trainer.train_one_epoch(&faces(1, 7, true), 0)?;

        assert!(loss.is_finite());
        assert!(loss > 0.0);
        Ok(())
    }

    #[test]
    fn test_short_last_batch() -> Result<()> {
        let device = Default::default();
        let model = TinyClassifier::<TestBackend>::new(5, &device);
        let optimizer = build_optimizer::<TestBackend, TinyClassifier<TestBackend>>(1e-6);
        let mut trainer = Trainer::new(model, optimizer, &config(4), device);

        // 4 + 4 + 1
        let loss = trainer.train_one_epoch(&faces(9, 5, true), 2)?;

        assert!(loss.is_finite());
        assert_eq!(loss, round_to(loss, 3));
        Ok(())
    }

    #[test]
    fn test_training_changes_parameters() -> Result<()> {
        let device = Default::default();
        let model = TinyClassifier::<TestBackend>::new(3, &device);
        let before = ModelState::capture(&model)?;
        let optimizer = build_optimizer::<TestBackend, TinyClassifier<TestBackend>>(0.0);
        let mut trainer = Trainer::new(model, optimizer, &config(2), device);

        trainer.train_one_epoch(&faces(6, 3, true), 0)?;

        assert_ne!(ModelState::capture(trainer.model())?, before);
        Ok(())
    }

    #[test]
    fn test_validation_leaves_parameters_untouched() -> Result<()> {
        let device = Default::default();
        let model = MiniXception::<TestBackend>::new(&MiniXceptionConfig::for_task(Task::Age), &device);
        let optimizer = build_optimizer::<TestBackend, MiniXception<TestBackend>>(1e-6);
        let trainer = Trainer::new(model, optimizer, &config(3), device);
        let before = ModelState::capture(trainer.model())?;

        let report = trainer.validate(&faces(7, 5, false), true);

        assert_eq!(ModelState::capture(trainer.model())?, before);
        assert_eq!(report.num_samples, 7);
        assert!(report.confusion.is_some());
        assert!((0.0..=1.0).contains(&report.accuracy));
        Ok(())
    }

    #[test]
    fn test_validate_single_sample_batches() {
        let device = Default::default();
        let model = TinyClassifier::<NdArray<f32>>::new(7, &device);

        let report = validate(&model, &faces(3, 7, false), 1, &device, false);

        assert_eq!(report.num_samples, 3);
        assert!(report.loss.is_finite());
        assert!(report.confusion.is_none());
    }

    #[test]
    fn test_report_to_record() {
        let report = ValidationReport {
            loss: 1.2345,
            accuracy: 0.5,
            precision: 0.33333,
            recall: 0.25,
            num_samples: 4,
            confusion: None,
        };

        let record = report.to_record(3, 1.5);
        assert_eq!(record.epoch, 3);
        assert_eq!(record.val_loss, 1.235);
        assert_eq!(record.precision, 0.333);
    }
}

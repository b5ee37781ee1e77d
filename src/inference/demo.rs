//! Demo driver: frames in, labelled faces out

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use burn::tensor::backend::Backend;
use colored::Colorize;
use tracing::info;

use crate::inference::detector::DetectorKind;
use crate::inference::predictor::{FrameReport, Predictor};
use crate::inference::source::FrameSource;
use crate::utils::error::Result;

/// Options of the `demo` command
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub detector: DetectorKind,
    /// Emotion checkpoint
    pub pretrained: PathBuf,
    /// Age checkpoint
    pub pretrained_age: PathBuf,
    /// Image or video file; the camera when absent
    pub path: Option<PathBuf>,
    /// Treat `path` as a still image
    pub image: bool,
    /// Write the reports as JSON here
    pub output: Option<PathBuf>,
}

/// Run both heads over every face of every frame
pub fn run_demo<B: Backend>(config: &DemoConfig, device: B::Device) -> Result<Vec<FrameReport>> {
    let source = FrameSource::from_args(config.path.as_deref(), config.image)?;
    let predictor = Predictor::<B>::load(&config.pretrained, &config.pretrained_age, device)?;
    let detector = config.detector.build();
    info!("Using the {} detector", detector.name());

    let reports: Vec<FrameReport> = source
        .frames()?
        .iter()
        .enumerate()
        .map(|(frame, image)| FrameReport {
            frame,
            source: source.path().map(|p| p.to_path_buf()),
            faces: predictor.predict_frame(image, detector.as_ref()),
        })
        .collect();

    for report in &reports {
        print_report(report);
    }

    if let Some(output) = &config.output {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(BufWriter::new(File::create(output)?), &reports)?;
        info!("Predictions written to {:?}", output);
    }

    Ok(reports)
}

fn print_report(report: &FrameReport) {
    println!(
        "{} {} ({} faces)",
        "Frame".cyan().bold(),
        report.frame,
        report.faces.len()
    );
    for face in &report.faces {
        println!(
            "  [{}, {}, {}x{}] {} {}  {} {}  ({:.1} ms)",
            face.face.x,
            face.face.y,
            face.face.width,
            face.face.height,
            face.emotion.label.green().bold(),
            face.emotion.confidence.to_string().yellow(),
            face.age.label.green(),
            face.age.confidence.to_string().yellow(),
            face.inference_time_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MiniXception, MiniXceptionConfig, Task};
    use crate::training::Checkpoint;
    use burn_ndarray::NdArray;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn write_checkpoints(tmp: &TempDir) -> (PathBuf, PathBuf) {
        let device = Default::default();
        let emotion = tmp.path().join("emotion.ckpt.json");
        let age = tmp.path().join("age.ckpt.json");
        let model = MiniXception::<TestBackend>::new(&MiniXceptionConfig::for_task(Task::Emotion), &device);
        Checkpoint::capture(&model, 0).unwrap().save(&emotion).unwrap();
        let model = MiniXception::<TestBackend>::new(&MiniXceptionConfig::for_task(Task::Age), &device);
        Checkpoint::capture(&model, 0).unwrap().save(&age).unwrap();
        (emotion, age)
    }

    #[test]
    fn test_image_demo_writes_json() {
        let tmp = TempDir::new().unwrap();
        let (pretrained, pretrained_age) = write_checkpoints(&tmp);
        let image = tmp.path().join("face.png");
        GrayImage::from_fn(120, 90, |x, y| Luma([(x + y) as u8])).save(&image).unwrap();
        let output = tmp.path().join("out").join("predictions.json");

        let config = DemoConfig {
            detector: DetectorKind::CenterCrop,
            pretrained,
            pretrained_age,
            path: Some(image),
            image: true,
            output: Some(output.clone()),
        };
        let reports = run_demo::<TestBackend>(&config, Default::default()).unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].faces.len(), 1);
        let written: Vec<FrameReport> =
            serde_json::from_reader(File::open(output).unwrap()).unwrap();
        assert_eq!(written[0].faces[0].age.label, reports[0].faces[0].age.label);
    }

    #[test]
    fn test_camera_demo_has_no_frames() {
        let tmp = TempDir::new().unwrap();
        let (pretrained, pretrained_age) = write_checkpoints(&tmp);

        let config = DemoConfig {
            detector: DetectorKind::FullFrame,
            pretrained,
            pretrained_age,
            path: None,
            image: false,
            output: None,
        };
        assert!(run_demo::<TestBackend>(&config, Default::default()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_checkpoint_fails() {
        let config = DemoConfig {
            detector: DetectorKind::FullFrame,
            pretrained: "missing.ckpt.json".into(),
            pretrained_age: "missing_age.ckpt.json".into(),
            path: None,
            image: false,
            output: None,
        };
        assert!(run_demo::<TestBackend>(&config, Default::default()).is_err());
    }
}

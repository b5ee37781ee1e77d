//! Face detectors used by the demo.
//!
//! A detector only proposes boxes; cropping and preprocessing happen in
//! the predictor.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned face box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    /// Clip the box to a `width` x `height` frame.
    ///
    /// Returns `None` when nothing of the box is inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceBox> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceBox {
            x: self.x,
            y: self.y,
            width: w,
            height: h,
        })
    }

    /// Cut this box out of `frame`
    pub fn crop(&self, frame: &DynamicImage) -> Option<DynamicImage> {
        let b = self.clamp_to(frame.width(), frame.height())?;
        Some(frame.crop_imm(b.x, b.y, b.width, b.height))
    }
}

/// Proposes face boxes for a frame
pub trait FaceDetector {
    fn detect(&self, frame: &DynamicImage) -> Vec<FaceBox>;

    fn name(&self) -> &'static str;
}

/// Treats the whole frame as one pre-cropped face
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrameDetector;

impl FaceDetector for FullFrameDetector {
    fn detect(&self, frame: &DynamicImage) -> Vec<FaceBox> {
        if frame.width() == 0 || frame.height() == 0 {
            return Vec::new();
        }
        vec![FaceBox {
            x: 0,
            y: 0,
            width: frame.width(),
            height: frame.height(),
        }]
    }

    fn name(&self) -> &'static str {
        "full-frame"
    }
}

/// Largest square centred in the frame
#[derive(Debug, Clone, Copy, Default)]
pub struct CenterCropDetector;

impl FaceDetector for CenterCropDetector {
    fn detect(&self, frame: &DynamicImage) -> Vec<FaceBox> {
        let (w, h) = (frame.width(), frame.height());
        let side = w.min(h);
        if side == 0 {
            return Vec::new();
        }
        vec![FaceBox {
            x: (w - side) / 2,
            y: (h - side) / 2,
            width: side,
            height: side,
        }]
    }

    fn name(&self) -> &'static str {
        "center-crop"
    }
}

/// Detector selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    #[default]
    FullFrame,
    CenterCrop,
}

impl DetectorKind {
    pub fn build(self) -> Box<dyn FaceDetector> {
        match self {
            DetectorKind::FullFrame => Box::new(FullFrameDetector),
            DetectorKind::CenterCrop => Box::new(CenterCropDetector),
        }
    }
}

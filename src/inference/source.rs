//! Frame sources for the demo

use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage};
use tracing::{info, warn};

use crate::utils::error::{Error, Result};

/// Frames loaded from a file are scaled to this size
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Where demo frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSource {
    /// A single still image
    Image(PathBuf),
    /// A video file
    Video(PathBuf),
    /// The default camera
    Camera,
}

impl FrameSource {
    /// `--image` reads `path` as a still image; otherwise `path` is a video
    /// and no path means the camera.
    pub fn from_args(path: Option<&Path>, image: bool) -> Result<Self> {
        match (path, image) {
            (Some(p), true) => Ok(FrameSource::Image(p.to_path_buf())),
            (None, true) => Err(Error::InvalidInput("--image needs --path".to_string())),
            (Some(p), false) => Ok(FrameSource::Video(p.to_path_buf())),
            (None, false) => Ok(FrameSource::Camera),
        }
    }

    /// Load every frame this source yields.
    ///
    /// Video decoding and camera capture are not part of this build: those
    /// sources report that they could not be opened and yield nothing.
    pub fn frames(&self) -> Result<Vec<DynamicImage>> {
        match self {
            FrameSource::Image(path) => {
                let frame = image::open(path).map_err(|e| Error::ImageLoad(path.clone(), e.to_string()))?;
                info!("Loaded frame {:?} ({}x{})", path, frame.width(), frame.height());
                Ok(vec![frame.resize_exact(FRAME_WIDTH, FRAME_HEIGHT, FilterType::Triangle)])
            }
            FrameSource::Video(path) => {
                warn!("video.isOpened: false ({:?}: video decoding is not available)", path);
                Ok(Vec::new())
            }
            FrameSource::Camera => {
                warn!("video.isOpened: false (camera capture is not available)");
                Ok(Vec::new())
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            FrameSource::Image(p) | FrameSource::Video(p) => Some(p),
            FrameSource::Camera => None,
        }
    }
}

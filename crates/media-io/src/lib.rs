//! Media collaborators for the thumbnail pipeline.
//!
//! Frame extraction, rotation metadata and the still-image codec sit behind small traits so
//! the cache layer never talks to ffmpeg or `image` directly.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

mod codec;
mod ffmpeg;

pub use codec::JpegCodec;
pub use ffmpeg::FfmpegTools;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found on PATH")]
    ToolMissing(&'static str),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} killed after {after:?}")]
    Timeout { tool: &'static str, after: std::time::Duration },
    #[error("{tool} exited with {status}: {stderr}")]
    Tool { tool: &'static str, status: i32, stderr: String },
    #[error("probe: {0}")]
    Probe(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// A video as the catalog hands it out. Size and mtime are part of its cache identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoRef {
    pub id: String,
    /// Absolute path or content locator understood by the extractor.
    pub locator: String,
    pub size: u64,
    pub duration_ms: u64,
    pub modified_ms: i64,
}

impl VideoRef {
    pub fn duration_secs(&self) -> f64 { self.duration_ms as f64 / 1000.0 }
}

/// Tightly packed RGBA8 pixels. Clones share the pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, MediaError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(MediaError::InvalidFrame(format!("{}x{} needs {} bytes, got {}", width, height, expected, pixels.len())));
        }
        Ok(Self { width, height, pixels: Arc::from(pixels.into_boxed_slice()) })
    }

    pub fn byte_len(&self) -> usize { self.pixels.len() }

    pub fn to_image(&self) -> image::RgbaImage {
        // new() checked the length, so from_raw cannot fail here
        image::RgbaImage::from_raw(self.width, self.height, self.pixels.to_vec())
            .unwrap_or_else(|| image::RgbaImage::new(self.width, self.height))
    }

    pub fn from_image(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self { width, height, pixels: Arc::from(img.into_raw().into_boxed_slice()) }
    }

    /// Rotate clockwise. Anything other than 90/180/270 leaves the frame as is.
    pub fn rotated(&self, degrees: u32) -> Self {
        use image::imageops::{rotate180, rotate270, rotate90};
        match degrees {
            90 => Self::from_image(rotate90(&self.to_image())),
            180 => Self::from_image(rotate180(&self.to_image())),
            270 => Self::from_image(rotate270(&self.to_image())),
            _ => self.clone(),
        }
    }
}

/// Pulls a single still out of a video. Implementations may block.
pub trait FrameExtractor: Send + Sync {
    /// Extract the frame nearest `position_secs`, fitted into a `dimension` square.
    /// `Ok(None)` means the file decoded but produced no picture.
    fn extract_frame(&self, locator: &str, position_secs: f64, dimension: u32, prefer_hardware: bool) -> Result<Option<RgbaFrame>, MediaError>;
}

pub trait RotationLookup: Send + Sync {
    /// Clockwise display rotation: 0, 90, 180 or 270.
    fn rotation_degrees(&self, locator: &str) -> Result<u32, MediaError>;
}

pub trait ImageCodec: Send + Sync {
    fn encode(&self, frame: &RgbaFrame, quality: u8) -> Result<Vec<u8>, MediaError>;
    fn decode(&self, bytes: &[u8]) -> Result<RgbaFrame, MediaError>;
}

/// Fold any angle onto 0/90/180/270, snapping to the nearest quarter turn.
pub fn normalize_rotation(degrees: i64) -> u32 {
    let snapped = ((degrees as f64 / 90.0).round() as i64) * 90;
    snapped.rem_euclid(360) as u32
}

use media_io::{FrameExtractor, RgbaFrame, RotationLookup, VideoRef};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, ThumbnailError};

const PREFERRED_POSITION_SECS: f64 = 2.5;
const POSITION_FRACTION: f64 = 0.1;
const END_MARGIN_SECS: f64 = 0.1;

/// Where to grab the still: 2.5s in, or 10% of the way for short clips, never within the
/// last 100ms. Zero or unknown durations use the first frame.
pub fn seek_position(duration_ms: u64) -> f64 {
    let duration = duration_ms as f64 / 1000.0;
    if duration <= 0.0 {
        return 0.0;
    }
    let latest = (duration - END_MARGIN_SECS).max(0.0);
    PREFERRED_POSITION_SECS.min(duration * POSITION_FRACTION).clamp(0.0, latest)
}

/// Turns a video into a canonical-size, upright still. Nothing is retried here.
///
/// Extraction and rotation lookup each get `timeout`. A step that overruns is abandoned;
/// the blocking call itself is left to the collaborator to cut short.
pub struct ThumbnailGenerator {
    extractor: Arc<dyn FrameExtractor>,
    rotation: Arc<dyn RotationLookup>,
    dimension: u32,
    timeout: Duration,
}

impl ThumbnailGenerator {
    pub fn new(extractor: Arc<dyn FrameExtractor>, rotation: Arc<dyn RotationLookup>, dimension: u32, timeout: Duration) -> Self {
        Self { extractor, rotation, dimension, timeout }
    }

    pub fn dimension(&self) -> u32 { self.dimension }

    pub async fn generate(&self, video: &VideoRef) -> Result<RgbaFrame> {
        let position = seek_position(video.duration_ms);
        let (extractor, locator, dimension) = (self.extractor.clone(), video.locator.clone(), self.dimension);
        // software decode: hardware paths are too device/file dependent for thumbnails
        let extracted = self.bounded(&video.locator, "extraction", move || extractor.extract_frame(&locator, position, dimension, false)).await?;
        let frame = match extracted {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!(locator = %video.locator, position, "no frame extracted");
                return Err(ThumbnailError::NoFrame);
            }
            Err(e) => {
                warn!(locator = %video.locator, position, error = %e, "frame extraction failed");
                return Err(ThumbnailError::extraction(e));
            }
        };

        let (rotation, locator) = (self.rotation.clone(), video.locator.clone());
        let degrees = self.bounded(&video.locator, "rotation lookup", move || rotation.rotation_degrees(&locator)).await?
            .map_err(|e| {
                warn!(locator = %video.locator, error = %e, "rotation lookup failed");
                ThumbnailError::rotation(e)
            })?;
        if degrees == 0 {
            return Ok(frame);
        }
        debug!(locator = %video.locator, degrees, "rotating thumbnail");
        Ok(tokio::task::spawn_blocking(move || frame.rotated(degrees)).await?)
    }

    fn bounded<T, F>(&self, locator: &str, step: &'static str, f: F) -> impl Future<Output = Result<T>> + Send
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (limit, locator) = (self.timeout, locator.to_string());
        async move {
            match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
                Ok(joined) => Ok(joined?),
                Err(_) => {
                    warn!(locator = %locator, step, after = ?limit, "thumbnail step timed out");
                    Err(ThumbnailError::Timeout(limit))
                }
            }
        }
    }
}

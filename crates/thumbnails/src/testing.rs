//! Fake collaborators shared by the unit tests.

use media_io::{FrameExtractor, ImageCodec, MediaError, RgbaFrame, RotationLookup, VideoRef};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) fn video(locator: &str, size: u64, mtime: i64) -> VideoRef {
    VideoRef { id: locator.into(), locator: locator.into(), size, duration_ms: 120_000, modified_ms: mtime }
}

pub(crate) fn frame(side: u32, fill: u8) -> RgbaFrame {
    RgbaFrame::new(side, side, vec![fill; (side * side * 4) as usize]).unwrap()
}

/// Top-left pixel of every extracted frame, so orientation is observable.
pub(crate) const MARKER: [u8; 4] = [255, 0, 0, 255];

/// Lossless codec: 8 byte header (width, height) followed by the raw pixels.
pub(crate) struct RawCodec;

impl ImageCodec for RawCodec {
    fn encode(&self, frame: &RgbaFrame, _quality: u8) -> Result<Vec<u8>, MediaError> {
        let mut out = Vec::with_capacity(8 + frame.byte_len());
        out.extend_from_slice(&frame.width.to_le_bytes());
        out.extend_from_slice(&frame.height.to_le_bytes());
        out.extend_from_slice(&frame.pixels);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RgbaFrame, MediaError> {
        if bytes.len() < 8 {
            return Err(MediaError::Codec("short header".into()));
        }
        let w = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let h = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        RgbaFrame::new(w, h, bytes[8..].to_vec()).map_err(|e| MediaError::Codec(e.to_string()))
    }
}

/// Extractor that counts calls, remembers requests and can be told to fail.
/// Pixels encode the number of the call so two generations are distinguishable, except
/// for the top-left one which is always `MARKER`.
#[derive(Default)]
pub(crate) struct CountingExtractor {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Mutex<Duration>,
    pub requests: Mutex<Vec<(String, f64, u32, bool)>>,
}

impl CountingExtractor {
    pub fn with_delay(delay: Duration) -> Self {
        let e = Self::default();
        *e.delay.lock() = delay;
        e
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    pub fn locators(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.0.clone()).collect()
    }
}

impl FrameExtractor for CountingExtractor {
    fn extract_frame(&self, locator: &str, position_secs: f64, dimension: u32, prefer_hardware: bool) -> Result<Option<RgbaFrame>, MediaError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push((locator.to_string(), position_secs, dimension, prefer_hardware));
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut pixels = vec![n as u8; (dimension * dimension * 4) as usize];
        pixels[..4].copy_from_slice(&MARKER);
        Ok(Some(RgbaFrame::new(dimension, dimension, pixels)?))
    }
}

pub(crate) struct FixedRotation(pub Result<u32, ()>);

impl RotationLookup for FixedRotation {
    fn rotation_degrees(&self, _locator: &str) -> Result<u32, MediaError> {
        self.0.map_err(|_| MediaError::Probe("no metadata".into()))
    }
}

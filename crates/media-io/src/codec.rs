use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

use crate::{ImageCodec, MediaError, RgbaFrame};

/// Lossy JPEG on top of the `image` crate. Alpha is dropped on encode.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn encode(&self, frame: &RgbaFrame, quality: u8) -> Result<Vec<u8>, MediaError> {
        let rgb = DynamicImage::ImageRgba8(frame.to_image()).to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|e| MediaError::Codec(e.to_string()))?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RgbaFrame, MediaError> {
        let img = image::load_from_memory(bytes).map_err(|e| MediaError::Codec(e.to_string()))?;
        Ok(RgbaFrame::from_image(img.to_rgba8()))
    }
}

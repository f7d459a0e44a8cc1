//! Frame encoding for the wire.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::MlResult;

const JPEG_QUALITY: u8 = 90;

/// Encode one frame as base64 JPEG.
pub fn encode_jpeg_base64(image: &RgbImage) -> MlResult<String> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(image)?;
    Ok(STANDARD.encode(buf))
}

/// Encode a batch, preserving order.
pub fn encode_batch(images: &[RgbImage]) -> MlResult<Vec<String>> {
    images.iter().map(encode_jpeg_base64).collect()
}

// src/parse/image.rs

use image::RgbImage;

use super::ParseError;

/// Decode any supported format into 8-bit RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::EmptyUpload);
    }
    let decoded = image::load_from_memory(bytes)?.to_rgb8();
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(ParseError::EmptyImage);
    }
    Ok(decoded)
}

//! Image decoding and grayscale conversion.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the
//! decoded image plus the single-channel grayscale copy that the
//! detection stages work on. The decoded colour image is kept for the
//! final rectification.

use image::{DynamicImage, GrayImage};

use crate::types::PipelineError;

/// Decode raw image bytes.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
/// Returns [`PipelineError::ZeroDimensions`] if the decoded image has
/// no pixels.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    ensure_non_empty(&img)?;
    Ok(img)
}

/// Reject images with zero width or height.
///
/// # Errors
///
/// Returns [`PipelineError::ZeroDimensions`] when either side is zero.
pub fn ensure_non_empty(image: &DynamicImage) -> Result<(), PipelineError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(PipelineError::ZeroDimensions { width, height });
    }
    Ok(())
}

/// Convert a decoded image to 8-bit grayscale.
///
/// Uses the `image` crate's luminance weighting
/// (`0.2126*R + 0.7152*G + 0.0722*B`).
#[must_use = "returns the grayscale image"]
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

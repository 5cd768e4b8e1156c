//! Downscaling to the fixed-width analysis image.
//!
//! Detection runs on a small working copy of the input: the image is
//! resized so its width equals `analysis_width` and its height follows
//! the aspect ratio. The returned [`ScaleFactors`] map analysis-space
//! coordinates back to the full-resolution original.
//!
//! An image that is already exactly `analysis_width` wide is returned
//! unchanged, so running detection on a pre-scaled image gives the same
//! analysis image the pipeline would have produced itself.

use std::fmt;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::geometry::{Dimensions, ScaleFactors};

/// Resampling filter used when downscaling.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownscaleFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom): moderate speed, good quality.
    CatmullRom,
    /// Gaussian: moderate speed, smooth output.
    Gaussian,
    /// Lanczos with 3 lobes: slowest, sharpest.
    Lanczos3,
}

impl DownscaleFilter {
    /// Convert to the `image` crate's `FilterType`.
    const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Gaussian => image::imageops::FilterType::Gaussian,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for DownscaleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Height of the analysis image: `round(target_width * height / width)`,
/// never below one row.
///
/// `width` must be non-zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn analysis_height(source: Dimensions, target_width: u32) -> u32 {
    let height =
        (f64::from(target_width) * f64::from(source.height) / f64::from(source.width)).round();
    (height as u32).max(1)
}

/// Resize a grayscale image to `target_width` pixels wide, preserving
/// aspect ratio.
///
/// Returns the analysis image and the factors mapping it back to the
/// source. Both source dimensions must be non-zero.
#[must_use]
pub fn downscale(
    image: &GrayImage,
    target_width: u32,
    filter: DownscaleFilter,
) -> (GrayImage, ScaleFactors) {
    let source = Dimensions::of(image);
    if source.width == target_width {
        return (image.clone(), ScaleFactors::identity());
    }

    let target = Dimensions {
        width: target_width,
        height: analysis_height(source, target_width),
    };
    let resized = image::imageops::resize(
        image,
        target.width,
        target.height,
        filter.to_image_filter(),
    );
    (resized, ScaleFactors::between(source, target))
}

//! Median filtering of the binary image.
//!
//! The pipeline runs the filter twice (see [`MEDIAN_RADII`]): radius 1
//! removes isolated speckle, radius 5 closes small gaps along the
//! document border before gradients are taken.
//!
//! Windows are clamped to the image rather than padded, so border
//! pixels use a smaller window. Even-sized windows take the lower
//! median.
//!
//! [`MEDIAN_RADII`]: crate::types::MEDIAN_RADII

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Selects which noise filter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DenoiserKind {
    /// Square-window median with a sliding histogram.
    #[default]
    Median,
}

/// Trait for denoising strategies.
pub trait Denoiser {
    /// Filter `image` with a square window of the given radius.
    fn denoise(&self, image: &GrayImage, radius: u32) -> GrayImage;
}

impl Denoiser for DenoiserKind {
    fn denoise(&self, image: &GrayImage, radius: u32) -> GrayImage {
        match *self {
            Self::Median => median_filter(image, radius),
        }
    }
}

/// Apply `denoiser` once per radius, in order.
#[must_use = "returns the filtered image"]
pub fn denoise_passes(denoiser: &impl Denoiser, image: &GrayImage, radii: &[u32]) -> GrayImage {
    radii
        .iter()
        .fold(image.clone(), |current, &radius| denoiser.denoise(&current, radius))
}

/// Running histogram of the pixels inside the current window.
struct Histogram {
    bins: [u32; 256],
    count: u32,
}

impl Histogram {
    const fn new() -> Self {
        Self {
            bins: [0; 256],
            count: 0,
        }
    }

    /// Add (or with `remove`, subtract) column `x` rows `y0..=y1`.
    fn update_column(&mut self, image: &GrayImage, x: u32, y0: u32, y1: u32, remove: bool) {
        for y in y0..=y1 {
            let value = usize::from(image.get_pixel(x, y).0[0]);
            if remove {
                self.bins[value] -= 1;
                self.count -= 1;
            } else {
                self.bins[value] += 1;
                self.count += 1;
            }
        }
    }

    /// Lower median of the window.
    #[allow(clippy::cast_possible_truncation)]
    fn median(&self) -> u8 {
        let target = (self.count.saturating_sub(1)) / 2;
        let mut seen = 0u32;
        for (value, &n) in self.bins.iter().enumerate() {
            seen += n;
            if seen > target {
                return value as u8;
            }
        }
        u8::MAX
    }
}

/// Median filter with a `(2 * radius + 1)`-square window clamped to the
/// image bounds.
///
/// A radius of zero returns a copy of the input.
#[must_use = "returns the filtered image"]
pub fn median_filter(image: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || radius == 0 {
        return image.clone();
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let y0 = y.saturating_sub(radius);
        let y1 = y.saturating_add(radius).min(height - 1);

        let mut hist = Histogram::new();
        for x in 0..=radius.min(width - 1) {
            hist.update_column(image, x, y0, y1, false);
        }

        for x in 0..width {
            if x > 0 {
                let entering = x.saturating_add(radius);
                if entering < width {
                    hist.update_column(image, entering, y0, y1, false);
                }
                if x > radius {
                    hist.update_column(image, x - radius - 1, y0, y1, true);
                }
            }
            out.put_pixel(x, y, image::Luma([hist.median()]));
        }
    }
    out
}

//! Adaptive binarization: classify pixels against a local mean.
//!
//! A single global threshold breaks down when lighting varies across
//! the photographed page. Instead, each pixel is compared with the mean
//! of a square window around it. Window means and variances come from
//! two summed-area tables (intensities and squared intensities), so
//! every query is O(1) regardless of window size.
//!
//! Windows whose variance is too low carry no contrast to threshold
//! against (e.g. a stretch of plain background). Those windows grow in
//! fixed steps until they reach some structure or half the smaller image
//! dimension, and the mean is then taken from a window two steps
//! smaller than the one that stopped the search.
//!
//! Output pixels are 0 (foreground) or 255 (background).

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::types::PipelineConfig;

/// Foreground value in binary images.
pub const FOREGROUND: u8 = 0;

/// Background value in binary images.
pub const BACKGROUND: u8 = 255;

/// Per-call parameters for adaptive thresholding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdParams {
    /// Pixel multiplier applied before comparing to the local mean.
    pub bias: f64,
    /// Initial window side length (rounded up to odd).
    pub window_size: u32,
    /// Variance a window must exceed to be trusted.
    pub variance_threshold: f64,
    /// Radius increment for flat windows.
    pub growth_step: u32,
}

impl ThresholdParams {
    /// Extract the thresholding parameters from a pipeline config.
    #[must_use]
    pub const fn from_config(config: &PipelineConfig) -> Self {
        Self {
            bias: config.threshold_bias,
            window_size: config.window_size,
            variance_threshold: config.variance_threshold,
            growth_step: config.window_growth_step,
        }
    }

    /// Radius of the initial window: half the odd-rounded window size.
    #[must_use]
    pub const fn initial_radius(&self) -> u32 {
        (self.window_size | 1) / 2
    }
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Selects which binarization algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BinarizerKind {
    /// Local-mean threshold with variance-driven window growth.
    #[default]
    AdaptiveMean,
}

/// Trait for binarization strategies.
///
/// Input: a grayscale image. Output: a binary image of the same
/// dimensions, [`FOREGROUND`] or [`BACKGROUND`] per pixel.
pub trait Binarizer {
    /// Binarize `image` using the given per-call parameters.
    fn binarize(&self, image: &GrayImage, params: &ThresholdParams) -> GrayImage;
}

impl Binarizer for BinarizerKind {
    fn binarize(&self, image: &GrayImage, params: &ThresholdParams) -> GrayImage {
        match *self {
            Self::AdaptiveMean => adaptive_threshold(image, params),
        }
    }
}

/// Mean and variance of one window.
#[derive(Debug, Clone, Copy)]
struct WindowStats {
    mean: f64,
    variance: f64,
}

/// Summed-area tables over intensities and squared intensities.
///
/// Both tables are `(width + 1) x (height + 1)` with a zero first row
/// and column, so `table[y * stride + x]` holds the sum over the
/// rectangle `[0, x) x [0, y)`.
struct IntegralTables {
    width: u32,
    height: u32,
    stride: usize,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl IntegralTables {
    fn new(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut sum = vec![0u64; stride * (height as usize + 1)];
        let mut sum_sq = vec![0u64; sum.len()];

        for y in 0..height as usize {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width as usize {
                #[allow(clippy::cast_possible_truncation)]
                let value = u64::from(image.get_pixel(x as u32, y as u32).0[0]);
                row += value;
                row_sq += value * value;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row;
                sum_sq[idx] = sum_sq[idx - stride] + row_sq;
            }
        }

        Self {
            width,
            height,
            stride,
            sum,
            sum_sq,
        }
    }

    /// Sum of `table` over the inclusive pixel rectangle
    /// `[x0, x1] x [y0, y1]`.
    fn rect(&self, table: &[u64], x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let s = self.stride;
        table[(y1 + 1) * s + x1 + 1] + table[y0 * s + x0]
            - table[y0 * s + x1 + 1]
            - table[(y1 + 1) * s + x0]
    }

    /// Statistics of the window of `radius` centred on `(x, y)`,
    /// clamped to the image.
    #[allow(clippy::cast_precision_loss)]
    fn window(&self, x: u32, y: u32, radius: u32) -> WindowStats {
        let x0 = x.saturating_sub(radius) as usize;
        let y0 = y.saturating_sub(radius) as usize;
        let x1 = x.saturating_add(radius).min(self.width - 1) as usize;
        let y1 = y.saturating_add(radius).min(self.height - 1) as usize;

        let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
        let mean = self.rect(&self.sum, x0, y0, x1, y1) as f64 / count;
        let mean_sq = self.rect(&self.sum_sq, x0, y0, x1, y1) as f64 / count;
        WindowStats {
            mean,
            variance: mean.mul_add(-mean, mean_sq).max(0.0),
        }
    }
}

/// Adaptive local-mean threshold.
///
/// A pixel is foreground when `pixel * bias < local_mean`, background
/// otherwise. Empty images are returned as-is.
#[must_use = "returns the binary image"]
pub fn adaptive_threshold(image: &GrayImage, params: &ThresholdParams) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tables = IntegralTables::new(image);
    let initial = params.initial_radius();
    let max_radius = (width.min(height) / 2).max(initial);
    let step = params.growth_step.max(1);

    GrayImage::from_fn(width, height, |x, y| {
        let mut radius = initial;
        let mut stats = tables.window(x, y, radius);

        if stats.variance <= params.variance_threshold {
            while stats.variance <= params.variance_threshold && radius < max_radius {
                radius = (radius + step).min(max_radius);
                stats = tables.window(x, y, radius);
            }
            let backed_off = radius.saturating_sub(2 * step).max(initial);
            stats = tables.window(x, y, backed_off);
        }

        let value = f64::from(image.get_pixel(x, y).0[0]);
        if value * params.bias < stats.mean {
            image::Luma([FOREGROUND])
        } else {
            image::Luma([BACKGROUND])
        }
    })
}

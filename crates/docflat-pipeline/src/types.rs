//! Shared types for the docflat rectification pipeline.

use serde::{Deserialize, Serialize};

use crate::binarize::BinarizerKind;
use crate::blur::MAX_ANTIALIAS_SIGMA;
use crate::border::BorderDetectorKind;
use crate::corners::CornerResolverKind;
use crate::downscale::DownscaleFilter;
use crate::geometry::{Dimensions, LineEquation, Original, Quadrilateral, ScaleFactors};
use crate::lines::LineExtractorKind;
use crate::median::DenoiserKind;
use crate::rectify::RectifierKind;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference the
/// rectified output without depending on `image` directly.
pub use image::RgbaImage;

/// Median filter radii, applied in this order.
///
/// The first pass strips single-pixel speckle, the second closes small
/// gaps along detected borders.
pub const MEDIAN_RADII: [u32; 2] = [1, 5];

/// Number of lines requested from the line extractor.
///
/// A quadrilateral needs exactly four sides.
pub const LINE_COUNT: usize = 4;

/// Configuration for the rectification pipeline.
///
/// Every field has a default matching the tuned behavior; the
/// `DEFAULT_*` constants expose those values to front ends (CLI flag
/// defaults) so the two cannot drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Width of the downscaled analysis image. Height follows the
    /// input aspect ratio.
    pub analysis_width: u32,

    /// Resampling filter used by the downscaler.
    pub downscale_filter: DownscaleFilter,

    /// Multiplier applied to each pixel before comparing it to the local
    /// mean. Values above 1.0 bias classification toward background,
    /// which usually outnumbers foreground.
    pub threshold_bias: f64,

    /// Side length of the initial adaptive-threshold window. Even values
    /// are rounded up to the next odd size.
    pub window_size: u32,

    /// Minimum window variance for the local mean to be trusted. The
    /// default of 169 corresponds to a standard deviation of 13 gray
    /// levels.
    pub variance_threshold: f64,

    /// Radius increment used when a window is too flat.
    pub window_growth_step: u32,

    /// Gradient magnitude a pixel must exceed to count as a border
    /// point.
    pub edge_strength_threshold: f32,

    /// Two extracted lines closer than this many degrees (and closer
    /// than `line_distance_separation`) are treated as the same edge.
    pub line_angle_separation: u32,

    /// Two extracted lines closer than this many pixels (and closer
    /// than `line_angle_separation`) are treated as the same edge.
    pub line_distance_separation: u32,

    /// Minimum Gaussian sigma applied to the source before resampling.
    /// Zero disables smoothing unless the output is a reduction.
    pub antialias_sigma: f32,

    /// Which binarization algorithm to use.
    pub binarizer: BinarizerKind,

    /// Which noise filter to use.
    pub denoiser: DenoiserKind,

    /// Which border detector to use.
    pub border_detector: BorderDetectorKind,

    /// Which line extractor to use.
    pub line_extractor: LineExtractorKind,

    /// Which corner resolver to use.
    pub corner_resolver: CornerResolverKind,

    /// Which perspective rectifier to use.
    pub rectifier: RectifierKind,
}

impl PipelineConfig {
    /// Default analysis width in pixels.
    pub const DEFAULT_ANALYSIS_WIDTH: u32 = 300;
    /// Default downscale filter.
    pub const DEFAULT_DOWNSCALE_FILTER: DownscaleFilter = DownscaleFilter::Triangle;
    /// Default adaptive-threshold bias.
    pub const DEFAULT_THRESHOLD_BIAS: f64 = 1.1;
    /// Default adaptive-threshold window size.
    pub const DEFAULT_WINDOW_SIZE: u32 = 25;
    /// Default variance threshold (13² gray levels).
    pub const DEFAULT_VARIANCE_THRESHOLD: f64 = 169.0;
    /// Default window growth step in pixels.
    pub const DEFAULT_WINDOW_GROWTH_STEP: u32 = 5;
    /// Default border gradient threshold.
    ///
    /// A clean 0→255 step produces a magnitude of 1020 under the 3×3
    /// kernels; half of that still rejects the soft shoulders left by
    /// median filtering.
    pub const DEFAULT_EDGE_STRENGTH_THRESHOLD: f32 = 510.0;
    /// Default angular separation between distinct lines, in degrees.
    pub const DEFAULT_LINE_ANGLE_SEPARATION: u32 = 10;
    /// Default distance separation between distinct lines, in pixels.
    pub const DEFAULT_LINE_DISTANCE_SEPARATION: u32 = 20;
    /// Default minimum anti-aliasing sigma.
    pub const DEFAULT_ANTIALIAS_SIGMA: f32 = 0.7;

    /// Check that every parameter is usable.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.analysis_width == 0 {
            return Err(PipelineError::InvalidConfig(
                "analysis_width must be at least 1".to_owned(),
            ));
        }
        if !self.threshold_bias.is_finite() || self.threshold_bias <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "threshold_bias must be positive and finite, got {}",
                self.threshold_bias
            )));
        }
        if self.window_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "window_size must be at least 1".to_owned(),
            ));
        }
        if !self.variance_threshold.is_finite() || self.variance_threshold < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "variance_threshold must be non-negative and finite, got {}",
                self.variance_threshold
            )));
        }
        if self.window_growth_step == 0 {
            return Err(PipelineError::InvalidConfig(
                "window_growth_step must be at least 1".to_owned(),
            ));
        }
        if !self.edge_strength_threshold.is_finite() || self.edge_strength_threshold < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "edge_strength_threshold must be non-negative and finite, got {}",
                self.edge_strength_threshold
            )));
        }
        if self.line_angle_separation >= 90 {
            return Err(PipelineError::InvalidConfig(format!(
                "line_angle_separation must be below 90 degrees, got {}",
                self.line_angle_separation
            )));
        }
        if !(0.0..=MAX_ANTIALIAS_SIGMA).contains(&self.antialias_sigma) {
            return Err(PipelineError::InvalidConfig(format!(
                "antialias_sigma must be between 0 and {MAX_ANTIALIAS_SIGMA}, got {}",
                self.antialias_sigma
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_width: Self::DEFAULT_ANALYSIS_WIDTH,
            downscale_filter: Self::DEFAULT_DOWNSCALE_FILTER,
            threshold_bias: Self::DEFAULT_THRESHOLD_BIAS,
            window_size: Self::DEFAULT_WINDOW_SIZE,
            variance_threshold: Self::DEFAULT_VARIANCE_THRESHOLD,
            window_growth_step: Self::DEFAULT_WINDOW_GROWTH_STEP,
            edge_strength_threshold: Self::DEFAULT_EDGE_STRENGTH_THRESHOLD,
            line_angle_separation: Self::DEFAULT_LINE_ANGLE_SEPARATION,
            line_distance_separation: Self::DEFAULT_LINE_DISTANCE_SEPARATION,
            antialias_sigma: Self::DEFAULT_ANTIALIAS_SIGMA,
            binarizer: BinarizerKind::default(),
            denoiser: DenoiserKind::default(),
            border_detector: BorderDetectorKind::default(),
            line_extractor: LineExtractorKind::default(),
            corner_resolver: CornerResolverKind::default(),
            rectifier: RectifierKind::default(),
        }
    }
}

/// Result of running the full rectification pipeline.
#[derive(Debug, Clone)]
pub struct RectifyResult {
    /// The flattened, cropped document.
    pub image: RgbaImage,

    /// Document corners in the original image, canonically ordered.
    pub quad: Quadrilateral<Original>,

    /// Dimensions of the source image in pixels.
    pub source_dimensions: Dimensions,
}

/// Result of running the pipeline with all intermediate stage outputs
/// preserved.
///
/// Front ends use the raster intermediates for debug output; none of
/// them feed back into the pipeline.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Stage 1: grayscale analysis image at `analysis_width`.
    pub analysis: GrayImage,
    /// Mapping from analysis space back to the original image.
    pub scale: ScaleFactors,
    /// Stage 2: adaptive-threshold binary image.
    pub binarized: GrayImage,
    /// Stage 3: binary image after both median passes.
    pub denoised: GrayImage,
    /// Stage 4: border pixels painted white on black.
    pub borders: GrayImage,
    /// Stage 4: number of border points found.
    pub border_point_count: usize,
    /// Stage 5: the extracted line equations (analysis space).
    pub lines: Vec<LineEquation>,
    /// Stage 5: the line equations drawn as a pixel mask.
    pub line_mask: GrayImage,
    /// Stage 6: document corners in original space.
    pub quad: Quadrilateral<Original>,
    /// Stage 7: the rectified document.
    pub rectified: RgbaImage,
    /// Source image dimensions in pixels.
    pub source_dimensions: Dimensions,
}

impl StagedResult {
    /// Drop the intermediates and keep only the final output.
    #[must_use]
    pub fn into_result(self) -> RectifyResult {
        RectifyResult {
            image: self.rectified,
            quad: self.quad,
            source_dimensions: self.source_dimensions,
        }
    }
}

/// Errors that can occur during pipeline processing.
///
/// Every failure is terminal: the algorithms are deterministic, so
/// retrying on the same input cannot succeed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The image has zero width or height.
    #[error("image has zero width or height ({width}x{height})")]
    ZeroDimensions {
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
    },

    /// Too few distinct border points to fit the document's sides.
    #[error("found {found} distinct border points, need at least {needed}")]
    InsufficientBorderPoints {
        /// Distinct border points found.
        found: usize,
        /// Minimum required.
        needed: usize,
    },

    /// The accumulator did not yield enough distinct lines.
    #[error("extracted {found} distinct lines, need {needed}")]
    InsufficientLines {
        /// Lines extracted.
        found: usize,
        /// Lines requested.
        needed: usize,
    },

    /// No pairing of the extracted lines intersects in four usable
    /// corners (all candidate pairs parallel or far outside the image).
    #[error("could not resolve four document corners from the extracted lines")]
    UnresolvableCorners,

    /// The corner quadrilateral is degenerate and admits no projective
    /// transform.
    #[error("document corners do not define a valid perspective transform")]
    SingularTransform,
}

impl PipelineError {
    /// Whether this error belongs to the invalid-input category (the
    /// image cannot be rectified), as opposed to decode or
    /// configuration problems.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::ZeroDimensions { .. }
                | Self::InsufficientBorderPoints { .. }
                | Self::InsufficientLines { .. }
                | Self::UnresolvableCorners
                | Self::SingularTransform
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.analysis_width, 300);
        assert!((config.threshold_bias - 1.1).abs() < f64::EPSILON);
        assert_eq!(config.window_size, 25);
        assert!((config.variance_threshold - 169.0).abs() < f64::EPSILON);
        assert_eq!(config.window_growth_step, 5);
        assert_eq!(config.downscale_filter, DownscaleFilter::Triangle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_json_fills_missing_fields_with_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"analysis_width": 200, "threshold_bias": 1.2}"#).unwrap();
        assert_eq!(config.analysis_width, 200);
        assert!((config.threshold_bias - 1.2).abs() < f64::EPSILON);
        assert_eq!(config.window_size, PipelineConfig::DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn validate_rejects_zero_width() {
        let config = PipelineConfig {
            analysis_width: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_non_positive_bias() {
        for bias in [0.0, -1.0, f64::NAN] {
            let config = PipelineConfig {
                threshold_bias: bias,
                ..PipelineConfig::default()
            };
            assert!(config.validate().is_err(), "bias {bias} accepted");
        }
    }

    #[test]
    fn validate_bounds_antialias_sigma() {
        for sigma in [-0.5, 1e30, f32::INFINITY, f32::NAN, MAX_ANTIALIAS_SIGMA + 1.0] {
            let config = PipelineConfig {
                antialias_sigma: sigma,
                ..PipelineConfig::default()
            };
            assert!(config.validate().is_err(), "sigma {sigma} accepted");
        }
        let config = PipelineConfig {
            antialias_sigma: MAX_ANTIALIAS_SIGMA,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_growth_step() {
        let config = PipelineConfig {
            window_growth_step: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_input_category() {
        assert!(PipelineError::UnresolvableCorners.is_invalid_input());
        assert!(
            PipelineError::InsufficientLines {
                found: 2,
                needed: 4
            }
            .is_invalid_input()
        );
        assert!(!PipelineError::EmptyInput.is_invalid_input());
        assert!(!PipelineError::InvalidConfig(String::new()).is_invalid_input());
    }
}

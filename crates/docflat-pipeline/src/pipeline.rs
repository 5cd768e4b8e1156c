//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process_staged`] which runs the entire pipeline in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use docflat_pipeline::{Pipeline, PipelineConfig, PipelineError};
//! # fn run(jpeg: Vec<u8>) -> Result<(), PipelineError> {
//! let config = PipelineConfig::default();
//! let pipeline = Pipeline::new(jpeg, config)
//!     .decode()?
//!     .downscale()
//!     .binarize()
//!     .denoise()
//!     .detect_borders()
//!     .extract_lines()?
//!     .resolve_corners()?
//!     .rectify()?;
//!
//! let staged = pipeline.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages), carrying all previously computed
//! intermediates. Stages that can reject the input (too few border
//! points, unresolvable corners, degenerate quad) are exactly the ones
//! returning `Result`.
//!
//! # Memory
//!
//! Every stage retains the decoded full-resolution RGBA source, which
//! the final rectification samples from. For a 12 MP photo that is
//! 48 MB held until [`Rectified::into_result`]. The analysis-space
//! rasters are small by comparison (the analysis image is 300 px wide
//! by default). Callers that only need the rectified document should
//! prefer [`crate::rectify()`], which drops the intermediates.

use image::DynamicImage;

use crate::binarize::{Binarizer, FOREGROUND, ThresholdParams};
use crate::border::{BorderDetector, BorderMap};
use crate::corners::{CornerResolver, to_original_quad};
use crate::diagnostics::StageMetrics;
use crate::geometry::{
    Analysis, Dimensions, LineEquation, Original, Quadrilateral, ScaleFactors, SubpixelPoint,
};
use crate::lines::{LineExtractor, LineParams, render_line_mask};
use crate::median::denoise_passes;
use crate::rectify::Rectifier;
use crate::types::{
    GrayImage, MEDIAN_RADII, PipelineConfig, PipelineError, RgbaImage, StagedResult,
};

/// Entry point of the typestate pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline from encoded image bytes.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(source: Vec<u8>, config: PipelineConfig) -> Pending {
        Pending { config, source }
    }

    /// Start a pipeline from an already decoded image, skipping the
    /// [`Pending`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// [`PipelineConfig::validate`] and [`PipelineError::ZeroDimensions`]
    /// if the image has no pixels.
    pub fn from_image(
        image: &DynamicImage,
        config: PipelineConfig,
    ) -> Result<Decoded, PipelineError> {
        config.validate()?;
        crate::grayscale::ensure_non_empty(image)?;
        Ok(Decoded::new(config, image, 0))
    }
}

/// Count foreground pixels in a binary image.
fn count_foreground(image: &GrayImage) -> u64 {
    image
        .pixels()
        .map(|p| u64::from(u8::from(p.0[0] == FOREGROUND)))
        .sum()
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// The source image bytes and config are stored but not yet touched.
/// Call [`decode`](Self::decode) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing, call .decode() to continue"]
pub struct Pending {
    config: PipelineConfig,
    source: Vec<u8>,
}

impl Pending {
    /// The raw source image bytes.
    #[must_use]
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Decode the source image and advance to the [`Decoded`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the config fails
    /// [`PipelineConfig::validate`], [`PipelineError::EmptyInput`] if the
    /// source bytes are empty, [`PipelineError::ImageDecode`] if the image format is
    /// unrecognized or the data is corrupt, and
    /// [`PipelineError::ZeroDimensions`] for an image without pixels.
    pub fn decode(self) -> Result<Decoded, PipelineError> {
        self.config.validate()?;
        let image = crate::grayscale::decode(&self.source)?;
        Ok(Decoded::new(self.config, &image, self.source.len()))
    }
}

// ───────────────────────── Stage 1: Decoded ──────────────────────────

/// Pipeline state after decoding the source image.
///
/// Holds the full-resolution colour original (used only by the final
/// rectification) and its grayscale copy. Call
/// [`downscale`](Self::downscale) to advance.
#[must_use = "pipeline stages are consumed by advancing, call .downscale() to continue"]
pub struct Decoded {
    config: PipelineConfig,
    original: RgbaImage,
    gray: GrayImage,
    source_len: usize,
}

impl Decoded {
    fn new(config: PipelineConfig, image: &DynamicImage, source_len: usize) -> Self {
        let gray = crate::grayscale::to_gray(image);
        tracing::debug!(
            width = gray.width(),
            height = gray.height(),
            source_len,
            "decoded source image"
        );
        Self {
            config,
            original: image.to_rgba8(),
            gray,
            source_len,
        }
    }

    /// The decoded full-resolution colour image.
    #[must_use]
    pub const fn original(&self) -> &RgbaImage {
        &self.original
    }

    /// Full-resolution grayscale copy.
    #[must_use]
    pub const fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Advance to the downscale stage.
    pub fn downscale(self) -> Downscaled {
        let (analysis, scale) = crate::downscale::downscale(
            &self.gray,
            self.config.analysis_width,
            self.config.downscale_filter,
        );
        tracing::debug!(
            width = analysis.width(),
            height = analysis.height(),
            dx = scale.dx,
            dy = scale.dy,
            "downscaled to analysis size"
        );
        Downscaled {
            source_dimensions: Dimensions::of(&self.original),
            config: self.config,
            original: self.original,
            analysis,
            scale,
        }
    }
}

// ───────────────────────── Stage 2: Downscaled ───────────────────────

/// Pipeline state after downscaling to the analysis width.
///
/// Call [`binarize`](Self::binarize) to advance.
#[must_use = "pipeline stages are consumed by advancing, call .binarize() to continue"]
pub struct Downscaled {
    config: PipelineConfig,
    original: RgbaImage,
    analysis: GrayImage,
    scale: ScaleFactors,
    source_dimensions: Dimensions,
}

impl Downscaled {
    /// The grayscale analysis image.
    #[must_use]
    pub const fn analysis(&self) -> &GrayImage {
        &self.analysis
    }

    /// Factors mapping analysis coordinates back to the original.
    #[must_use]
    pub const fn scale(&self) -> ScaleFactors {
        self.scale
    }

    /// Advance to the binarization stage.
    pub fn binarize(self) -> Binarized {
        let params = ThresholdParams::from_config(&self.config);
        let binarized = self.config.binarizer.binarize(&self.analysis, &params);
        tracing::debug!(
            foreground = count_foreground(&binarized),
            "adaptive threshold applied"
        );
        Binarized {
            config: self.config,
            original: self.original,
            analysis: self.analysis,
            scale: self.scale,
            source_dimensions: self.source_dimensions,
            binarized,
        }
    }
}

// ───────────────────────── Stage 3: Binarized ────────────────────────

/// Pipeline state after adaptive thresholding.
///
/// Call [`denoise`](Self::denoise) to advance.
#[must_use = "pipeline stages are consumed by advancing, call .denoise() to continue"]
pub struct Binarized {
    config: PipelineConfig,
    original: RgbaImage,
    analysis: GrayImage,
    scale: ScaleFactors,
    source_dimensions: Dimensions,
    binarized: GrayImage,
}

impl Binarized {
    /// The binary image (foreground 0, background 255).
    #[must_use]
    pub const fn binarized(&self) -> &GrayImage {
        &self.binarized
    }

    /// Advance to the denoise stage: median filter with each radius in
    /// [`MEDIAN_RADII`].
    pub fn denoise(self) -> Denoised {
        let denoised = denoise_passes(&self.config.denoiser, &self.binarized, &MEDIAN_RADII);
        tracing::debug!(
            foreground = count_foreground(&denoised),
            "median passes applied"
        );
        Denoised {
            config: self.config,
            original: self.original,
            analysis: self.analysis,
            scale: self.scale,
            source_dimensions: self.source_dimensions,
            binarized: self.binarized,
            denoised,
        }
    }
}

// ───────────────────────── Stage 4: Denoised ─────────────────────────

/// Pipeline state after median filtering.
///
/// Call [`detect_borders`](Self::detect_borders) to advance.
#[must_use = "pipeline stages are consumed by advancing, call .detect_borders() to continue"]
pub struct Denoised {
    config: PipelineConfig,
    original: RgbaImage,
    analysis: GrayImage,
    scale: ScaleFactors,
    source_dimensions: Dimensions,
    binarized: GrayImage,
    denoised: GrayImage,
}

impl Denoised {
    /// The denoised binary image.
    #[must_use]
    pub const fn denoised(&self) -> &GrayImage {
        &self.denoised
    }

    /// Advance to the border detection stage.
    pub fn detect_borders(self) -> BordersDetected {
        let borders = self
            .config
            .border_detector
            .detect(&self.denoised, self.config.edge_strength_threshold);
        BordersDetected {
            config: self.config,
            original: self.original,
            analysis: self.analysis,
            scale: self.scale,
            source_dimensions: self.source_dimensions,
            binarized: self.binarized,
            denoised: self.denoised,
            borders,
        }
    }
}

// ───────────────────────── Stage 5: BordersDetected ──────────────────

/// Pipeline state after border detection.
///
/// Call [`extract_lines`](Self::extract_lines) to advance. This is a
/// fallible step.
#[must_use = "pipeline stages are consumed by advancing, call .extract_lines() to continue"]
pub struct BordersDetected {
    config: PipelineConfig,
    original: RgbaImage,
    analysis: GrayImage,
    scale: ScaleFactors,
    source_dimensions: Dimensions,
    binarized: GrayImage,
    denoised: GrayImage,
    borders: BorderMap,
}

impl BordersDetected {
    /// Detected border points and their visualization.
    #[must_use]
    pub const fn borders(&self) -> &BorderMap {
        &self.borders
    }

    /// Advance to the line extraction stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InsufficientBorderPoints`] or
    /// [`PipelineError::InsufficientLines`] when the border points do
    /// not support four distinct lines.
    pub fn extract_lines(self) -> Result<LinesExtracted, PipelineError> {
        let lines = self.config.line_extractor.extract(
            self.borders.points(),
            Dimensions::of(&self.analysis),
            &LineParams::from_config(&self.config),
        )?;
        Ok(LinesExtracted {
            config: self.config,
            original: self.original,
            analysis: self.analysis,
            scale: self.scale,
            source_dimensions: self.source_dimensions,
            binarized: self.binarized,
            denoised: self.denoised,
            borders: self.borders,
            lines,
        })
    }
}

// ───────────────────────── Stage 6: LinesExtracted ───────────────────

/// Pipeline state after line extraction.
///
/// Call [`resolve_corners`](Self::resolve_corners) to advance. This is a
/// fallible step.
#[must_use = "pipeline stages are consumed by advancing, call .resolve_corners() to continue"]
pub struct LinesExtracted {
    config: PipelineConfig,
    original: RgbaImage,
    analysis: GrayImage,
    scale: ScaleFactors,
    source_dimensions: Dimensions,
    binarized: GrayImage,
    denoised: GrayImage,
    borders: BorderMap,
    lines: Vec<LineEquation>,
}

impl LinesExtracted {
    /// The extracted lines, in analysis space, strongest first.
    #[must_use]
    pub fn lines(&self) -> &[LineEquation] {
        &self.lines
    }

    /// Advance to the corner resolution stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnresolvableCorners`] when no pairing of
    /// the lines gives four usable intersections.
    pub fn resolve_corners(self) -> Result<CornersResolved, PipelineError> {
        let analysis_corners = self
            .config
            .corner_resolver
            .resolve(&self.lines, Dimensions::of(&self.analysis))?;
        let quad = to_original_quad(analysis_corners, self.scale);
        tracing::debug!(?quad, "corners resolved");
        Ok(CornersResolved {
            config: self.config,
            original: self.original,
            analysis: self.analysis,
            scale: self.scale,
            source_dimensions: self.source_dimensions,
            binarized: self.binarized,
            denoised: self.denoised,
            borders: self.borders,
            lines: self.lines,
            analysis_corners,
            quad,
        })
    }
}

// ───────────────────────── Stage 7: CornersResolved ──────────────────

/// Pipeline state after corner resolution.
///
/// Call [`rectify`](Self::rectify) to advance to the final stage. This
/// is a fallible step.
#[must_use = "pipeline stages are consumed by advancing, call .rectify() to continue"]
pub struct CornersResolved {
    config: PipelineConfig,
    original: RgbaImage,
    analysis: GrayImage,
    scale: ScaleFactors,
    source_dimensions: Dimensions,
    binarized: GrayImage,
    denoised: GrayImage,
    borders: BorderMap,
    lines: Vec<LineEquation>,
    analysis_corners: [SubpixelPoint<Analysis>; 4],
    quad: Quadrilateral<Original>,
}

impl CornersResolved {
    /// Unrounded corners in analysis space, in resolver order.
    #[must_use]
    pub const fn analysis_corners(&self) -> &[SubpixelPoint<Analysis>; 4] {
        &self.analysis_corners
    }

    /// Canonically ordered corners in the original image.
    #[must_use]
    pub const fn quad(&self) -> &Quadrilateral<Original> {
        &self.quad
    }

    /// Advance to the rectification stage, the final pipeline step.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SingularTransform`] for a degenerate
    /// quadrilateral.
    pub fn rectify(self) -> Result<Rectified, PipelineError> {
        let rectified = self.config.rectifier.rectify(
            &self.original,
            &self.quad,
            self.config.antialias_sigma,
        )?;
        Ok(Rectified {
            analysis: self.analysis,
            scale: self.scale,
            source_dimensions: self.source_dimensions,
            binarized: self.binarized,
            denoised: self.denoised,
            borders: self.borders,
            lines: self.lines,
            quad: self.quad,
            rectified,
        })
    }
}

// ───────────────────────── Stage 8: Rectified ────────────────────────

/// Pipeline state after rectification, the final stage.
///
/// The colour original is released here. Call
/// [`into_result`](Self::into_result) to extract the [`StagedResult`].
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Rectified {
    analysis: GrayImage,
    scale: ScaleFactors,
    source_dimensions: Dimensions,
    binarized: GrayImage,
    denoised: GrayImage,
    borders: BorderMap,
    lines: Vec<LineEquation>,
    quad: Quadrilateral<Original>,
    rectified: RgbaImage,
}

impl Rectified {
    /// The rectified document.
    #[must_use]
    pub const fn rectified(&self) -> &RgbaImage {
        &self.rectified
    }

    /// Consume the pipeline and return the full [`StagedResult`].
    ///
    /// The line mask is rendered here, over a blank canvas the size of
    /// the analysis image.
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        let line_mask = render_line_mask(&self.lines, Dimensions::of(&self.analysis));
        let border_point_count = self.borders.points().len();
        let (borders, _) = self.borders.into_parts();
        StagedResult {
            analysis: self.analysis,
            scale: self.scale,
            binarized: self.binarized,
            denoised: self.denoised,
            borders,
            border_point_count,
            lines: self.lines,
            line_mask,
            quad: self.quad,
            rectified: self.rectified,
            source_dimensions: self.source_dimensions,
        }
    }
}

// ───────────────────────── Stage metadata ────────────────────────────

/// Total number of stages after [`Pending`].
pub const STAGE_COUNT: usize = 8;

/// Trait implemented by every processed stage, giving uniform access to
/// its name and metrics.
pub trait PipelineStage {
    /// Human-readable name of this stage (e.g. `"binarize"`).
    const NAME: &str;

    /// One-based index of this stage (`1` for [`Decoded`] through `8`
    /// for [`Rectified`]).
    const INDEX: usize;

    /// Metrics describing the work done to reach this state.
    fn metrics(&self) -> StageMetrics;
}

impl PipelineStage for Decoded {
    const NAME: &str = "decode";
    const INDEX: usize = 1;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Decode {
            input_bytes: self.source_len,
            width: self.original.width(),
            height: self.original.height(),
            pixel_count: u64::from(self.original.width()) * u64::from(self.original.height()),
        }
    }
}

impl PipelineStage for Downscaled {
    const NAME: &str = "downscale";
    const INDEX: usize = 2;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Downscale {
            original_width: self.source_dimensions.width,
            original_height: self.source_dimensions.height,
            width: self.analysis.width(),
            height: self.analysis.height(),
            filter: self.config.downscale_filter.to_string(),
            scale: self.scale,
        }
    }
}

impl PipelineStage for Binarized {
    const NAME: &str = "binarize";
    const INDEX: usize = 3;

    fn metrics(&self) -> StageMetrics {
        let params = ThresholdParams::from_config(&self.config);
        StageMetrics::Binarize {
            bias: params.bias,
            initial_radius: params.initial_radius(),
            foreground_pixels: count_foreground(&self.binarized),
            total_pixels: u64::from(self.binarized.width()) * u64::from(self.binarized.height()),
        }
    }
}

impl PipelineStage for Denoised {
    const NAME: &str = "denoise";
    const INDEX: usize = 4;

    fn metrics(&self) -> StageMetrics {
        let changed_pixels = self
            .binarized
            .pixels()
            .zip(self.denoised.pixels())
            .filter(|(a, b)| a != b)
            .count();
        StageMetrics::Denoise {
            radii: MEDIAN_RADII.to_vec(),
            foreground_pixels: count_foreground(&self.denoised),
            changed_pixels,
        }
    }
}

impl PipelineStage for BordersDetected {
    const NAME: &str = "borders";
    const INDEX: usize = 5;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::BorderDetection {
            threshold: self.config.edge_strength_threshold,
            border_points: self.borders.points().len(),
            distinct_points: self.borders.distinct_point_count(),
        }
    }
}

impl PipelineStage for LinesExtracted {
    const NAME: &str = "lines";
    const INDEX: usize = 6;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::LineExtraction {
            lines: self.lines.clone(),
        }
    }
}

impl PipelineStage for CornersResolved {
    const NAME: &str = "corners";
    const INDEX: usize = 7;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::CornerResolution { quad: self.quad }
    }
}

impl PipelineStage for Rectified {
    const NAME: &str = "rectify";
    const INDEX: usize = 8;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Rectify {
            width: self.rectified.width(),
            height: self.rectified.height(),
        }
    }
}

//! docflat-pipeline: Pure document rectification pipeline (sans-IO).
//!
//! Turns a photo of a document taken at an angle into a flat, cropped
//! image of just the document through:
//! decode -> downscale -> adaptive threshold -> median filter ->
//! border detection -> line extraction -> corner resolution ->
//! perspective rectification.
//!
//! Detection runs on a small *analysis* copy of the input; only the
//! final rectification touches the full-resolution original. The two
//! coordinate systems are kept apart at the type level (see
//! [`geometry`]).
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices and images and returns structured data. Reading files,
//! writing outputs and debug images live in `docflat-cli`.

pub mod binarize;
pub mod blur;
pub mod border;
pub mod corners;
pub mod diagnostics;
pub mod downscale;
pub mod geometry;
pub mod grayscale;
pub mod lines;
pub mod median;
pub mod pipeline;
pub mod rectify;
pub mod types;

use image::DynamicImage;

pub use binarize::{Binarizer, BinarizerKind};
pub use border::{BorderDetector, BorderDetectorKind, BorderMap};
pub use corners::{CornerResolver, CornerResolverKind};
pub use downscale::DownscaleFilter;
pub use geometry::{
    Analysis, Dimensions, LineEquation, Original, Point2D, Quadrilateral, ScaleFactors,
    SubpixelPoint,
};
pub use lines::{LineExtractor, LineExtractorKind};
pub use median::{Denoiser, DenoiserKind};
pub use pipeline::Pipeline;
pub use rectify::{Rectifier, RectifierKind};
pub use types::{PipelineConfig, PipelineError, RectifyResult, StagedResult};

/// Rectify the document in an encoded image.
///
/// Takes raw image bytes (PNG, JPEG, BMP, WebP) and a configuration and
/// returns the flattened document together with its corners in the
/// source image.
///
/// # Pipeline steps
///
/// 1. Decode and convert to grayscale
/// 2. Downscale to `analysis_width`
/// 3. Adaptive threshold
/// 4. Median filter (radius 1, then 5)
/// 5. Border detection
/// 6. Line extraction (four lines)
/// 7. Corner resolution and scaling to the original
/// 8. Perspective rectification of the colour original
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid `config`,
/// [`PipelineError::EmptyInput`] or [`PipelineError::ImageDecode`] when
/// the bytes cannot be decoded, and an invalid-input error (see
/// [`PipelineError::is_invalid_input`]) when no document can be found.
#[tracing::instrument(skip_all, fields(input_bytes = image_bytes.len()))]
pub fn rectify(
    image_bytes: &[u8],
    config: &PipelineConfig,
) -> Result<RectifyResult, PipelineError> {
    process_staged(image_bytes, config).map(StagedResult::into_result)
}

/// Rectify the document in an already decoded image.
///
/// # Errors
///
/// As [`rectify`], minus the decode errors.
#[tracing::instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn rectify_image(
    image: &DynamicImage,
    config: &PipelineConfig,
) -> Result<RectifyResult, PipelineError> {
    let result = Pipeline::from_image(image, config.clone())?
        .downscale()
        .binarize()
        .denoise()
        .detect_borders()
        .extract_lines()?
        .resolve_corners()?
        .rectify()?
        .into_result()
        .into_result();
    log_result(&result);
    Ok(result)
}

/// Run the full pipeline and keep every intermediate stage output.
///
/// The intermediates (binary image, denoised image, border and line
/// visualizations) are what a front end writes out in debug mode.
///
/// # Errors
///
/// As [`rectify`].
pub fn process_staged(
    image_bytes: &[u8],
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    let staged = Pipeline::new(image_bytes.to_vec(), config.clone())
        .decode()?
        .downscale()
        .binarize()
        .denoise()
        .detect_borders()
        .extract_lines()?
        .resolve_corners()?
        .rectify()?
        .into_result();
    tracing::info!(
        width = staged.rectified.width(),
        height = staged.rectified.height(),
        quad = ?staged.quad,
        "document rectified"
    );
    Ok(staged)
}

fn log_result(result: &RectifyResult) {
    tracing::info!(
        width = result.image.width(),
        height = result.image.height(),
        quad = ?result.quad,
        "document rectified"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A white page on a dark table, axis-aligned, encoded as PNG.
    fn page_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            let inside = (width / 5..width * 4 / 5).contains(&x)
                && (height / 5..height * 4 / 5).contains(&y);
            if inside {
                image::Rgba([250, 248, 240, 255])
            } else {
                image::Rgba([70, 60, 50, 255])
            }
        });
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn rectify_empty_input() {
        let result = rectify(&[], &PipelineConfig::default());
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn rectify_corrupt_input() {
        let result = rectify(&[0xFF, 0x00], &PipelineConfig::default());
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn rectify_rejects_invalid_config() {
        let config = PipelineConfig {
            analysis_width: 0,
            ..PipelineConfig::default()
        };
        let result = rectify(&page_png(100, 80), &config);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn rectify_image_rejects_huge_antialias_sigma() {
        let config = PipelineConfig {
            antialias_sigma: 1e30,
            ..PipelineConfig::default()
        };
        let decoded = image::load_from_memory(&page_png(100, 80)).unwrap();
        let result = rectify_image(&decoded, &config);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn uniform_image_is_invalid_input() {
        let img = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            320,
            240,
            image::Luma([128]),
        ));
        let err = rectify_image(&img, &PipelineConfig::default()).unwrap_err();
        assert!(err.is_invalid_input(), "unexpected error {err:?}");
    }

    #[test]
    fn page_is_cropped_out() {
        let result = rectify(&page_png(500, 400), &PipelineConfig::default()).unwrap();
        assert_eq!(
            result.source_dimensions,
            Dimensions {
                width: 500,
                height: 400
            }
        );
        // The page spans 300x240 pixels; allow for the dark rim the
        // threshold leaves around it.
        let (w, h) = result.image.dimensions();
        assert!((290..=350).contains(&w), "width {w}");
        assert!((230..=290).contains(&h), "height {h}");
        let centre = result.image.get_pixel(w / 2, h / 2);
        assert!(centre.0[0] > 240, "centre pixel {centre:?}");
    }

    #[test]
    fn bytes_and_decoded_image_agree() {
        let png = page_png(400, 300);
        let from_bytes = rectify(&png, &PipelineConfig::default()).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        let from_image = rectify_image(&decoded, &PipelineConfig::default()).unwrap();
        assert_eq!(from_bytes.quad, from_image.quad);
        assert_eq!(from_bytes.image, from_image.image);
    }

    #[test]
    fn results_can_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipelineConfig>();
        assert_send_sync::<PipelineError>();
        assert_send_sync::<RectifyResult>();
        assert_send_sync::<StagedResult>();
        assert_send_sync::<pipeline::Pending>();
        assert_send_sync::<pipeline::CornersResolved>();
    }

    #[test]
    fn staged_result_keeps_intermediates() {
        let staged = process_staged(&page_png(400, 300), &PipelineConfig::default()).unwrap();
        assert_eq!(staged.analysis.width(), 300);
        assert_eq!(staged.binarized.dimensions(), staged.analysis.dimensions());
        assert_eq!(staged.denoised.dimensions(), staged.analysis.dimensions());
        assert_eq!(staged.lines.len(), types::LINE_COUNT);
        assert!(staged.border_point_count > 0);
        assert!(staged.line_mask.pixels().any(|p| p.0[0] == 255));
    }
}

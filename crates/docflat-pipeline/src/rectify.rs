//! Perspective rectification of the full-resolution source.
//!
//! The output rectangle is sized from the quadrilateral itself (mean of
//! opposite side lengths), a projective transform mapping that rectangle
//! onto the quad is solved, and every output pixel is bilinearly sampled
//! from the anti-aliased source through it. Sample positions outside the
//! source are clamped to its edges.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::blur::{Region, antialias_sigma, blur_margin, smooth_region};
use crate::geometry::{Dimensions, Original, Quadrilateral};
use crate::types::{PipelineError, RgbaImage};

/// Quads with less area than this (in square pixels) cannot be
/// rectified.
const MIN_QUAD_AREA: f64 = 1.0;

/// Selects which rectifier to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RectifierKind {
    /// Four-point homography with bilinear resampling.
    #[default]
    Homography,
}

/// Trait for perspective rectification strategies.
pub trait Rectifier {
    /// Unwarp the region of `source` bounded by `quad`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SingularTransform`] when the quad is
    /// degenerate.
    fn rectify(
        &self,
        source: &RgbaImage,
        quad: &Quadrilateral<Original>,
        antialias_sigma: f32,
    ) -> Result<RgbaImage, PipelineError>;
}

impl Rectifier for RectifierKind {
    fn rectify(
        &self,
        source: &RgbaImage,
        quad: &Quadrilateral<Original>,
        antialias_sigma: f32,
    ) -> Result<RgbaImage, PipelineError> {
        match *self {
            Self::Homography => warp_perspective(source, quad, antialias_sigma),
        }
    }
}

/// Size of the rectified output.
///
/// Width spans the mean of the top and bottom sides, height the mean of
/// the left and right sides, each counted in pixel centres (so a quad
/// whose corners are the four corner pixels of an image reproduces that
/// image's size).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn output_dimensions(quad: &Quadrilateral<Original>) -> Dimensions {
    let width = f64::midpoint(quad.side_length(0), quad.side_length(2)).round() as u32 + 1;
    let height = f64::midpoint(quad.side_length(1), quad.side_length(3)).round() as u32 + 1;
    Dimensions { width, height }
}

/// Source-to-output reduction ratio: the longest side of the quad
/// against the output extent it is mapped onto.
fn shrink_ratio(quad: &Quadrilateral<Original>, output: Dimensions) -> f64 {
    let span = |pixels: u32| f64::from(pixels.saturating_sub(1).max(1));
    let horizontal = quad.side_length(0).max(quad.side_length(2)) / span(output.width);
    let vertical = quad.side_length(1).max(quad.side_length(3)) / span(output.height);
    horizontal.max(vertical)
}

/// Whether every turn along the quad's outline goes the same way.
fn is_convex(quad: &Quadrilateral<Original>) -> bool {
    let c = quad.corners();
    let turns: Vec<i64> = (0..4)
        .map(|i| {
            let (a, b, d) = (c[i], c[(i + 1) % 4], c[(i + 2) % 4]);
            let (ex, ey) = (i64::from(b.x - a.x), i64::from(b.y - a.y));
            let (fx, fy) = (i64::from(d.x - b.x), i64::from(d.y - b.y));
            ex * fy - ey * fx
        })
        .collect();
    turns.iter().all(|&t| t >= 0) || turns.iter().all(|&t| t <= 0)
}

/// Signed area of the quad (shoelace formula).
fn signed_area(quad: &Quadrilateral<Original>) -> f64 {
    let c = quad.corners();
    (0..4)
        .map(|i| {
            let (a, b) = (c[i], c[(i + 1) % 4]);
            f64::from(a.x).mul_add(f64::from(b.y), -(f64::from(b.x) * f64::from(a.y)))
        })
        .sum::<f64>()
        / 2.0
}

/// A projective transform from output pixel coordinates to source
/// pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    /// Solve the transform taking output corners `(0,0)`, `(w-1,0)`,
    /// `(w-1,h-1)`, `(0,h-1)` onto quad corners 0 to 3.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SingularTransform`] if the quad has
    /// (near) zero area or the system has no unique solution.
    pub fn from_rectangle(
        output: Dimensions,
        quad: &Quadrilateral<Original>,
    ) -> Result<Self, PipelineError> {
        if signed_area(quad).abs() < MIN_QUAD_AREA {
            return Err(PipelineError::SingularTransform);
        }

        let right = f64::from(output.width.saturating_sub(1));
        let bottom = f64::from(output.height.saturating_sub(1));
        let rectangle = [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)];

        // Unknowns h0..h7 with h8 = 1:
        //   x = (h0 u + h1 v + h2) / (h6 u + h7 v + 1)
        //   y = (h3 u + h4 v + h5) / (h6 u + h7 v + 1)
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for (i, (&(u, v), corner)) in rectangle.iter().zip(quad.corners()).enumerate() {
            let (x, y) = (f64::from(corner.x), f64::from(corner.y));
            let row = 2 * i;
            a[(row, 0)] = u;
            a[(row, 1)] = v;
            a[(row, 2)] = 1.0;
            a[(row, 6)] = -u * x;
            a[(row, 7)] = -v * x;
            b[row] = x;

            a[(row + 1, 3)] = u;
            a[(row + 1, 4)] = v;
            a[(row + 1, 5)] = 1.0;
            a[(row + 1, 6)] = -u * y;
            a[(row + 1, 7)] = -v * y;
            b[row + 1] = y;
        }

        let h = a.lu().solve(&b).ok_or(PipelineError::SingularTransform)?;
        let matrix = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        let det = matrix.determinant();
        if !det.is_finite()
            || det.abs() < f64::MIN_POSITIVE
            || matrix.iter().any(|v| !v.is_finite())
        {
            return Err(PipelineError::SingularTransform);
        }
        Ok(Self { matrix })
    }

    /// Map an output coordinate into the source.
    ///
    /// Returns `None` for points the transform sends to infinity.
    #[must_use]
    pub fn apply(&self, u: f64, v: f64) -> Option<(f64, f64)> {
        let p = self.matrix * Vector3::new(u, v, 1.0);
        if p[2].abs() < 1e-12 {
            return None;
        }
        Some((p[0] / p[2], p[1] / p[2]))
    }
}

/// Bilinear sample at `(x, y)` with coordinates and neighbours clamped
/// to the image. The image must be non-empty.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names
)]
pub fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> image::Rgba<u8> {
    let max_x = f64::from(image.width().saturating_sub(1));
    let max_y = f64::from(image.height().saturating_sub(1));
    let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, max_x) };
    let y = if y.is_nan() { 0.0 } else { y.clamp(0.0, max_y) };

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as u32, y0 as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);

    let p00 = image.get_pixel(x0, y0).0;
    let p10 = image.get_pixel(x1, y0).0;
    let p01 = image.get_pixel(x0, y1).0;
    let p11 = image.get_pixel(x1, y1).0;

    image::Rgba(std::array::from_fn(|c| {
        let top = f64::from(p00[c]).mul_add(1.0 - fx, f64::from(p10[c]) * fx);
        let bottom = f64::from(p01[c]).mul_add(1.0 - fx, f64::from(p11[c]) * fx);
        top.mul_add(1.0 - fy, bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Homography rectification.
///
/// # Errors
///
/// Returns [`PipelineError::SingularTransform`] for degenerate quads and
/// [`PipelineError::ZeroDimensions`] for an empty source.
#[tracing::instrument(skip(source), fields(width = source.width(), height = source.height()))]
pub fn warp_perspective(
    source: &RgbaImage,
    quad: &Quadrilateral<Original>,
    antialias: f32,
) -> Result<RgbaImage, PipelineError> {
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::ZeroDimensions { width, height });
    }

    let output = output_dimensions(quad);
    let homography = Homography::from_rectangle(output, quad)?;
    let sigma = antialias_sigma(antialias, shrink_ratio(quad, output));
    tracing::debug!(
        output_width = output.width,
        output_height = output.height,
        sigma,
        "rectifying"
    );

    // A convex quad maps the output inside its bounding box; anything
    // else may sample anywhere in the source.
    let region = if is_convex(quad) {
        Region::around(quad, blur_margin(sigma), Dimensions::of(source))
    } else {
        Region::full(Dimensions::of(source))
    };
    let smoothed = smooth_region(source, region, sigma);
    let (ox, oy) = (f64::from(region.x), f64::from(region.y));
    Ok(RgbaImage::from_fn(output.width, output.height, |u, v| {
        homography
            .apply(f64::from(u), f64::from(v))
            .map_or_else(
                || sample_bilinear(&smoothed, 0.0, 0.0),
                |(x, y)| sample_bilinear(&smoothed, x - ox, y - oy),
            )
    }))
}

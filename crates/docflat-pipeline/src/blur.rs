//! Gaussian pre-filtering of the colour source before resampling.
//!
//! Resampling samples the source at scattered positions; any detail
//! finer than the output grid aliases into jaggies and moiré. Smoothing
//! the source first with a Gaussian whose width follows the local
//! reduction ratio removes that detail.
//!
//! Only the part of the photo under the document is ever sampled, so
//! only that [`Region`] (plus enough margin for the kernel) is blurred.

use crate::geometry::{Dimensions, Original, Point2D, Quadrilateral};
use crate::types::RgbaImage;

/// Largest sigma ever applied, in pixels.
///
/// The kernel grows linearly with sigma; past this point the blur wipes
/// out the document anyway.
pub const MAX_ANTIALIAS_SIGMA: f32 = 64.0;

/// Sigma used for a given minimum and source-to-output shrink ratio.
///
/// The configured value is a floor. When the output is smaller than the
/// source region it samples (`shrink > 1`), sigma grows to
/// `(shrink - 1) / 2` so that a 3× reduction is smoothed with sigma 1.
/// The result never exceeds [`MAX_ANTIALIAS_SIGMA`]; a NaN anywhere
/// counts as no smoothing.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn antialias_sigma(configured: f32, shrink: f64) -> f32 {
    let from_shrink = ((shrink - 1.0) / 2.0).max(0.0) as f32;
    let sigma = configured.max(from_shrink);
    if sigma.is_nan() {
        0.0
    } else {
        sigma.clamp(0.0, MAX_ANTIALIAS_SIGMA)
    }
}

/// Pixels of context a blur with `sigma` needs around the sampled area.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn blur_margin(sigma: f32) -> u32 {
    if sigma.is_nan() || sigma <= 0.0 {
        return 1;
    }
    (4.0 * sigma.min(MAX_ANTIALIAS_SIGMA)).ceil() as u32 + 1
}

/// Axis-aligned pixel rectangle inside a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Left column.
    pub x: u32,
    /// Top row.
    pub y: u32,
    /// Width in pixels, at least 1.
    pub width: u32,
    /// Height in pixels, at least 1.
    pub height: u32,
}

impl Region {
    /// The whole of an image with the given (non-zero) dimensions.
    #[must_use]
    pub const fn full(bounds: Dimensions) -> Self {
        Self {
            x: 0,
            y: 0,
            width: bounds.width,
            height: bounds.height,
        }
    }

    /// Bounding box of `quad` grown by `margin`, clipped to `bounds`.
    ///
    /// A quad lying partly or wholly outside the image still yields a
    /// non-empty region touching the nearest image edge, so clamping a
    /// sample to the region agrees with clamping it to the image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn around(quad: &Quadrilateral<Original>, margin: u32, bounds: Dimensions) -> Self {
        let corners = quad.corners();
        let span = |coord: fn(&Point2D<Original>) -> i32, extent: u32| {
            let last = i64::from(extent) - 1;
            let lo = corners.iter().map(coord).min().map_or(0, i64::from);
            let hi = corners.iter().map(coord).max().map_or(last, i64::from);
            let start = (lo - i64::from(margin)).clamp(0, last);
            let end = (hi + i64::from(margin)).clamp(0, last);
            (start as u32, (end - start) as u32 + 1)
        };
        let (x, width) = span(|p| p.x, bounds.width);
        let (y, height) = span(|p| p.y, bounds.height);
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Crop `region` out of `source` and blur it with `sigma`.
#[must_use = "returns the smoothed region"]
pub fn smooth_region(source: &RgbaImage, region: Region, sigma: f32) -> RgbaImage {
    let crop =
        image::imageops::crop_imm(source, region.x, region.y, region.width, region.height)
            .to_image();
    gaussian_blur_rgba(&crop, sigma)
}

/// Gaussian blur of an RGBA image, one channel at a time.
///
/// `imageproc::filter::gaussian_blur_f32` only handles single-channel
/// images. Alpha is left alone when every pixel is opaque, which is the
/// case for any decoded photo. Non-positive or NaN sigma returns a copy;
/// sigma is capped at [`MAX_ANTIALIAS_SIGMA`].
#[must_use = "returns the blurred RGBA image"]
pub fn gaussian_blur_rgba(image: &RgbaImage, sigma: f32) -> RgbaImage {
    if sigma.is_nan() || sigma <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let sigma = sigma.min(MAX_ANTIALIAS_SIGMA);

    let opaque = image.pixels().all(|p| p.0[3] == u8::MAX);
    let channels = if opaque { 3 } else { 4 };

    let mut out = image.clone();
    for c in 0..channels {
        let plane = imageproc::map::map_pixels(image, move |p: image::Rgba<u8>| {
            image::Luma([p.0[c]])
        });
        let blurred = imageproc::filter::gaussian_blur_f32(&plane, sigma);
        for (dst, src) in out.pixels_mut().zip(blurred.pixels()) {
            dst.0[c] = src.0[0];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(points: [(i32, i32); 4]) -> Quadrilateral<Original> {
        Quadrilateral::from_unordered(points.map(|(x, y)| Point2D::new(x, y)))
    }

    const BOUNDS: Dimensions = Dimensions {
        width: 100,
        height: 80,
    };

    #[test]
    fn configured_sigma_is_a_floor() {
        assert!((antialias_sigma(0.7, 1.0) - 0.7).abs() < f32::EPSILON);
        assert!((antialias_sigma(0.7, 0.5) - 0.7).abs() < f32::EPSILON);
        assert!((antialias_sigma(0.7, 3.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_sigma_only_smooths_reductions() {
        assert!(antialias_sigma(0.0, 1.0).abs() < f32::EPSILON);
        assert!(antialias_sigma(0.0, 2.0) > 0.0);
    }

    #[test]
    fn sigma_is_capped() {
        assert!((antialias_sigma(1e30, 1.0) - MAX_ANTIALIAS_SIGMA).abs() < f32::EPSILON);
        let infinite = antialias_sigma(f32::INFINITY, 1.0);
        assert!((infinite - MAX_ANTIALIAS_SIGMA).abs() < f32::EPSILON);
        assert!((antialias_sigma(0.7, 1e12) - MAX_ANTIALIAS_SIGMA).abs() < f32::EPSILON);
        assert!(antialias_sigma(f32::NAN, 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn huge_sigma_does_not_panic() {
        let img = RgbaImage::from_fn(6, 6, |x, _| {
            image::Rgba([u8::from(x > 2) * 255, 0, 0, 255])
        });
        for sigma in [1e30, f32::INFINITY, f32::MAX] {
            assert_eq!(gaussian_blur_rgba(&img, sigma).dimensions(), (6, 6));
        }
        assert_eq!(gaussian_blur_rgba(&img, f32::NAN), img);
    }

    #[test]
    fn zero_sigma_returns_identical_image() {
        let img = RgbaImage::from_fn(4, 4, |x, _| {
            image::Rgba([100, 150, 200, if x < 2 { 0 } else { 255 }])
        });
        assert_eq!(gaussian_blur_rgba(&img, 0.0), img);
        assert_eq!(gaussian_blur_rgba(&img, -1.0), img);
    }

    #[test]
    fn sharp_colour_edge_is_softened() {
        let img = RgbaImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 0, 255, 255])
            }
        });
        let blurred = gaussian_blur_rgba(&img, 2.0);
        assert!(blurred.get_pixel(4, 5).0[0] < 255);
        assert!(blurred.get_pixel(5, 5).0[0] > 0);
        assert_eq!(blurred.get_pixel(5, 5).0[3], 255);
    }

    #[test]
    fn translucent_alpha_is_blurred_too() {
        let img = RgbaImage::from_fn(10, 10, |x, _| {
            image::Rgba([50, 50, 50, if x < 5 { 0 } else { 255 }])
        });
        let blurred = gaussian_blur_rgba(&img, 2.0);
        assert!(blurred.get_pixel(4, 5).0[3] > 0);
        assert!(blurred.get_pixel(5, 5).0[3] < 255);
    }

    #[test]
    fn uniform_image_is_unchanged() {
        let img = RgbaImage::from_pixel(10, 10, image::Rgba([100, 150, 200, 250]));
        let blurred = gaussian_blur_rgba(&img, 1.4);
        for pixel in blurred.pixels() {
            for (c, &expected) in [100u8, 150, 200, 250].iter().enumerate() {
                let diff = i16::from(pixel.0[c]) - i16::from(expected);
                assert!(diff.abs() <= 1, "channel {c}: got {}", pixel.0[c]);
            }
        }
    }

    #[test]
    fn region_pads_bounding_box() {
        let page = quad([(20, 10), (60, 12), (58, 50), (22, 48)]);
        let region = Region::around(&page, 3, BOUNDS);
        assert_eq!(
            region,
            Region {
                x: 17,
                y: 7,
                width: 47,
                height: 47
            }
        );
    }

    #[test]
    fn region_is_clipped_to_image() {
        let page = quad([(-30, -5), (140, 0), (130, 95), (-10, 90)]);
        let region = Region::around(&page, 5, BOUNDS);
        assert_eq!(region, Region::full(BOUNDS));
    }

    #[test]
    fn region_of_quad_outside_image_touches_edge() {
        let page = quad([(150, 10), (170, 10), (170, 30), (150, 30)]);
        let region = Region::around(&page, 2, BOUNDS);
        assert_eq!((region.x, region.width), (99, 1));
        assert_eq!((region.y, region.height), (8, 25));
    }

    #[test]
    fn smoothed_region_matches_full_blur_inside_box() {
        let img = RgbaImage::from_fn(60, 40, |x, y| {
            let v = u8::try_from((x * 7 + y * 13) % 256).unwrap_or(0);
            image::Rgba([v, 255 - v, v / 2, 255])
        });
        let sigma = 1.5;
        let bounds = Dimensions {
            width: 60,
            height: 40,
        };
        let page = quad([(20, 10), (40, 10), (40, 30), (20, 30)]);
        let region = Region::around(&page, blur_margin(sigma), bounds);
        let cropped = smooth_region(&img, region, sigma);
        let full = gaussian_blur_rgba(&img, sigma);
        for y in 10..=30 {
            for x in 20..=40 {
                assert_eq!(
                    cropped.get_pixel(x - region.x, y - region.y),
                    full.get_pixel(x, y),
                    "pixel ({x}, {y})"
                );
            }
        }
    }
}

//! Border detection: gradient magnitude over the denoised binary image.
//!
//! The denoised image is correlated with two fixed 3×3 directional
//! kernels (samples outside the image are clamped to the nearest edge
//! pixel). Pixels whose combined gradient magnitude exceeds the
//! configured threshold become border points. On a clean binary image
//! this marks the two pixel columns either side of every
//! foreground/background transition.

use image::GrayImage;
use imageproc::definitions::Image;
use imageproc::filter::filter_clamped;
use imageproc::kernel::Kernel;
use serde::{Deserialize, Serialize};

use crate::geometry::{Analysis, Point2D};

/// Horizontal gradient kernel (responds to vertical edges).
pub const GRADIENT_X: [i32; 9] = [-1, 0, 1, -2, 0, 2, -1, 0, 1];

/// Vertical gradient kernel (responds to horizontal edges).
pub const GRADIENT_Y: [i32; 9] = [1, 2, 1, 0, 0, 0, -1, -2, -1];

/// Value of border pixels in the visualization image.
pub const BORDER_PIXEL: u8 = 255;

/// Border pixels found in the analysis image.
///
/// The point list and the visualization are independent: consumers
/// that only need coordinates use [`points`](Self::points) and never
/// touch the raster.
#[derive(Debug, Clone)]
pub struct BorderMap {
    visualization: GrayImage,
    points: Vec<Point2D<Analysis>>,
}

impl BorderMap {
    /// Border point coordinates in row-major order.
    #[must_use]
    pub fn points(&self) -> &[Point2D<Analysis>] {
        &self.points
    }

    /// Border pixels painted [`BORDER_PIXEL`] on a black canvas.
    #[must_use]
    pub const fn visualization(&self) -> &GrayImage {
        &self.visualization
    }

    /// Number of distinct border points.
    ///
    /// Points are produced once per pixel, but fakes and callers may
    /// supply duplicates.
    #[must_use]
    pub fn distinct_point_count(&self) -> usize {
        let mut unique: Vec<(i32, i32)> = self.points.iter().map(|p| (p.x, p.y)).collect();
        unique.sort_unstable();
        unique.dedup();
        unique.len()
    }

    /// Consume the map and return its parts.
    #[must_use]
    pub fn into_parts(self) -> (GrayImage, Vec<Point2D<Analysis>>) {
        (self.visualization, self.points)
    }
}

/// Selects which border detector to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BorderDetectorKind {
    /// Gradient magnitude of the two fixed 3×3 kernels.
    #[default]
    Gradient,
}

/// Trait for border detection strategies.
pub trait BorderDetector {
    /// Find border pixels whose edge strength exceeds `threshold`.
    fn detect(&self, image: &GrayImage, threshold: f32) -> BorderMap;
}

impl BorderDetector for BorderDetectorKind {
    fn detect(&self, image: &GrayImage, threshold: f32) -> BorderMap {
        match *self {
            Self::Gradient => detect_borders(image, threshold),
        }
    }
}

/// Gradient-magnitude border detection.
///
/// Magnitude is `hypot(gx, gy)`; a pixel is a border point when its
/// magnitude is strictly greater than `threshold`.
#[must_use = "returns the detected borders"]
#[allow(clippy::cast_possible_wrap)]
pub fn detect_borders(image: &GrayImage, threshold: f32) -> BorderMap {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return BorderMap {
            visualization: image.clone(),
            points: Vec::new(),
        };
    }

    let gx: Image<image::Luma<i16>> = filter_clamped(image, Kernel::new(&GRADIENT_X, 3, 3));
    let gy: Image<image::Luma<i16>> = filter_clamped(image, Kernel::new(&GRADIENT_Y, 3, 3));

    let mut visualization = GrayImage::new(width, height);
    let mut points = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let h = f32::from(gx.get_pixel(x, y).0[0]);
            let v = f32::from(gy.get_pixel(x, y).0[0]);
            if h.hypot(v) > threshold {
                visualization.put_pixel(x, y, image::Luma([BORDER_PIXEL]));
                points.push(Point2D::new(x as i32, y as i32));
            }
        }
    }

    tracing::debug!(
        border_points = points.len(),
        threshold,
        "border detection complete"
    );
    BorderMap {
        visualization,
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f32 = 510.0;

    /// Binary image: black (foreground) left of `edge`, white right of it.
    fn vertical_step(w: u32, h: u32, edge: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| {
            if x < edge {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn blank_image_has_no_border_points() {
        let img = GrayImage::from_pixel(20, 20, image::Luma([255]));
        let borders = detect_borders(&img, THRESHOLD);
        assert!(borders.points().is_empty());
        assert!(borders.visualization().pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn vertical_step_marks_both_sides_of_transition() {
        let borders = detect_borders(&vertical_step(20, 10, 8), THRESHOLD);
        let xs: Vec<i32> = borders.points().iter().map(|p| p.x).collect();
        assert!(!xs.is_empty());
        assert!(xs.iter().all(|&x| x == 7 || x == 8), "got columns {xs:?}");
        // Every row contributes both columns.
        assert_eq!(borders.points().len(), 20);
    }

    #[test]
    fn horizontal_step_is_detected_by_vertical_kernel() {
        let img = GrayImage::from_fn(12, 12, |_, y| image::Luma([if y < 6 { 255 } else { 0 }]));
        let borders = detect_borders(&img, THRESHOLD);
        assert!(borders.points().iter().all(|p| p.y == 5 || p.y == 6));
        assert_eq!(borders.points().len(), 24);
    }

    #[test]
    fn image_border_is_not_an_edge() {
        // Clamped sampling means a uniform image has zero gradient at the
        // image boundary.
        let img = GrayImage::from_pixel(9, 9, image::Luma([0]));
        assert!(detect_borders(&img, 0.0).points().is_empty());
    }

    #[test]
    fn visualization_matches_point_set() {
        let borders = detect_borders(&vertical_step(16, 16, 5), THRESHOLD);
        let marked = borders
            .visualization()
            .pixels()
            .filter(|p| p.0[0] == BORDER_PIXEL)
            .count();
        assert_eq!(marked, borders.points().len());
        for p in borders.points() {
            #[allow(clippy::cast_sign_loss)]
            let value = borders.visualization().get_pixel(p.x as u32, p.y as u32).0[0];
            assert_eq!(value, BORDER_PIXEL);
        }
    }

    #[test]
    fn higher_threshold_keeps_fewer_points() {
        let img = GrayImage::from_fn(20, 20, |x, y| {
            image::Luma([if x > 10 && y > 10 { 255 } else { 0 }])
        });
        let low = detect_borders(&img, 100.0).points().len();
        let high = detect_borders(&img, 1100.0).points().len();
        assert!(high < low);
    }

    #[test]
    fn distinct_count_ignores_duplicates() {
        let map = BorderMap {
            visualization: GrayImage::new(1, 1),
            points: vec![Point2D::new(1, 1), Point2D::new(1, 1), Point2D::new(2, 1)],
        };
        assert_eq!(map.distinct_point_count(), 2);
    }
}

//! Line extraction: a (θ, r) voting accumulator over the border points.
//!
//! Every border point votes once per candidate angle for the line in
//! normal form `x·cos θ + y·sin θ = r` passing through it. Buckets that
//! collect the most votes are the dominant straight edges.
//!
//! Discretization is fixed rather than derived from the image:
//! [`ANGLE_STEP_DEGREES`] (1°) over `[0, 180)` and [`DISTANCE_STEP`]
//! (1 px) over `[-D, D]` where `D` is the rounded-up diagonal of the
//! analysis image. At the default 300 px analysis width that is about
//! 180 × 750 buckets.
//!
//! The raw ranking is dominated by clusters of neighbouring buckets
//! around each physical edge, so selection is greedy: a bucket is
//! skipped when it lies within both the angular and the distance
//! separation of a line already accepted.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::geometry::{Analysis, Dimensions, LineEquation, Point2D};
use crate::types::{LINE_COUNT, PipelineConfig, PipelineError};

/// Angular resolution of the accumulator, in degrees.
pub const ANGLE_STEP_DEGREES: u32 = 1;

/// Distance resolution of the accumulator, in pixels.
pub const DISTANCE_STEP: u32 = 1;

/// Number of angle rows in the accumulator.
const ANGLE_BUCKETS: u32 = 180 / ANGLE_STEP_DEGREES;

/// Fewest distinct border points that can describe a quadrilateral.
pub const MIN_DISTINCT_POINTS: usize = 4;

/// Per-call parameters for line extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineParams {
    /// Number of lines to return.
    pub count: usize,
    /// Lines closer than this many degrees (and closer than
    /// `distance_separation`) are duplicates.
    pub angle_separation: u32,
    /// Lines closer than this many pixels (and closer than
    /// `angle_separation`) are duplicates.
    pub distance_separation: u32,
}

impl LineParams {
    /// Extraction parameters for the pipeline: always [`LINE_COUNT`]
    /// lines, separations from the config.
    #[must_use]
    pub const fn from_config(config: &PipelineConfig) -> Self {
        Self {
            count: LINE_COUNT,
            angle_separation: config.line_angle_separation,
            distance_separation: config.line_distance_separation,
        }
    }
}

impl Default for LineParams {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Selects which line extractor to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineExtractorKind {
    /// Hough transform with greedy near-duplicate suppression.
    #[default]
    Hough,
}

/// Trait for line extraction strategies.
pub trait LineExtractor {
    /// Find the `params.count` best supported lines through `points`.
    ///
    /// `bounds` is the size of the image the points were taken from.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InsufficientBorderPoints`] or
    /// [`PipelineError::InsufficientLines`] when the points cannot
    /// support `params.count` distinct lines.
    fn extract(
        &self,
        points: &[Point2D<Analysis>],
        bounds: Dimensions,
        params: &LineParams,
    ) -> Result<Vec<LineEquation>, PipelineError>;
}

impl LineExtractor for LineExtractorKind {
    fn extract(
        &self,
        points: &[Point2D<Analysis>],
        bounds: Dimensions,
        params: &LineParams,
    ) -> Result<Vec<LineEquation>, PipelineError> {
        match *self {
            Self::Hough => hough_lines(points, bounds, params),
        }
    }
}

/// A ranked accumulator bucket.
#[derive(Debug, Clone, Copy)]
struct Peak {
    theta_index: u32,
    r: i32,
    votes: u32,
}

impl Peak {
    fn line(self) -> LineEquation {
        LineEquation::new(
            f64::from(self.theta_index * ANGLE_STEP_DEGREES),
            f64::from(self.r) * f64::from(DISTANCE_STEP),
        )
    }
}

/// Vote table indexed by `theta_index * r_buckets + (r + max_r)`.
struct Accumulator {
    max_r: i32,
    r_buckets: usize,
    votes: Vec<u32>,
    trig: Vec<(f64, f64)>,
}

impl Accumulator {
    #[allow(clippy::cast_possible_wrap)]
    fn new(bounds: Dimensions) -> Self {
        let max_r = bounds.diagonal().div_ceil(DISTANCE_STEP) as i32;
        #[allow(clippy::cast_sign_loss)]
        let r_buckets = 2 * max_r as usize + 1;
        let trig = (0..ANGLE_BUCKETS)
            .map(|i| {
                let theta = f64::from(i * ANGLE_STEP_DEGREES).to_radians();
                (theta.cos(), theta.sin())
            })
            .collect();
        Self {
            max_r,
            r_buckets,
            votes: vec![0; ANGLE_BUCKETS as usize * r_buckets],
            trig,
        }
    }

    /// Cast one vote per angle for the lines through `point`.
    ///
    /// Points outside the bounds may fall off the distance range; those
    /// votes are dropped.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    fn vote(&mut self, point: Point2D<Analysis>) {
        let x = f64::from(point.x);
        let y = f64::from(point.y);
        let step = f64::from(DISTANCE_STEP);
        for (theta_index, &(cos, sin)) in self.trig.iter().enumerate() {
            let r = (x.mul_add(cos, y * sin) / step).round() as i64;
            if r.abs() > i64::from(self.max_r) {
                continue;
            }
            let offset = (r + i64::from(self.max_r)) as usize;
            self.votes[theta_index * self.r_buckets + offset] += 1;
        }
    }

    /// Non-empty buckets, most votes first. Equal counts keep scan order
    /// (θ ascending, then r ascending).
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn ranked(&self) -> Vec<Peak> {
        let mut peaks: Vec<Peak> = self
            .votes
            .iter()
            .enumerate()
            .filter(|&(_, &votes)| votes > 0)
            .map(|(index, &votes)| Peak {
                theta_index: (index / self.r_buckets) as u32,
                r: (index % self.r_buckets) as i32 - self.max_r,
                votes,
            })
            .collect();
        // Stable: ties stay in scan order.
        peaks.sort_by(|a, b| b.votes.cmp(&a.votes));
        peaks
    }
}

/// Whether two lines describe the same physical edge.
///
/// Angles wrap at 180°: `(178°, r)` and `(2°, -r)` are close.
#[must_use]
pub fn is_near_duplicate(a: LineEquation, b: LineEquation, params: &LineParams) -> bool {
    let mut angle_diff = (a.angle - b.angle).abs();
    let mut b_distance = b.distance;
    if angle_diff > 90.0 {
        angle_diff = 180.0 - angle_diff;
        b_distance = -b_distance;
    }
    angle_diff <= f64::from(params.angle_separation)
        && (a.distance - b_distance).abs() <= f64::from(params.distance_separation)
}

/// Hough line extraction.
///
/// # Errors
///
/// Returns [`PipelineError::InsufficientBorderPoints`] when fewer than
/// [`MIN_DISTINCT_POINTS`] distinct points are supplied, and
/// [`PipelineError::InsufficientLines`] when fewer than `params.count`
/// mutually distinct lines exist.
#[tracing::instrument(skip(points), fields(point_count = points.len()))]
pub fn hough_lines(
    points: &[Point2D<Analysis>],
    bounds: Dimensions,
    params: &LineParams,
) -> Result<Vec<LineEquation>, PipelineError> {
    let distinct = distinct_points(points);
    if distinct < MIN_DISTINCT_POINTS {
        return Err(PipelineError::InsufficientBorderPoints {
            found: distinct,
            needed: MIN_DISTINCT_POINTS,
        });
    }

    let mut accumulator = Accumulator::new(bounds);
    for &point in points {
        accumulator.vote(point);
    }

    let mut lines: Vec<LineEquation> = Vec::with_capacity(params.count);
    for peak in accumulator.ranked() {
        if lines.len() == params.count {
            break;
        }
        let candidate = peak.line();
        if lines
            .iter()
            .any(|&accepted| is_near_duplicate(accepted, candidate, params))
        {
            continue;
        }
        tracing::debug!(
            angle = candidate.angle,
            distance = candidate.distance,
            votes = peak.votes,
            "accepted line"
        );
        lines.push(candidate);
    }

    if lines.len() < params.count {
        return Err(PipelineError::InsufficientLines {
            found: lines.len(),
            needed: params.count,
        });
    }
    Ok(lines)
}

fn distinct_points(points: &[Point2D<Analysis>]) -> usize {
    let mut unique: Vec<(i32, i32)> = points.iter().map(|p| (p.x, p.y)).collect();
    unique.sort_unstable();
    unique.dedup();
    unique.len()
}

/// Draw line equations as a mask over a blank canvas.
///
/// A pixel is set to 255 when its centre lies within half a pixel of any
/// line.
#[must_use = "returns the rendered mask"]
pub fn render_line_mask(lines: &[LineEquation], dimensions: Dimensions) -> GrayImage {
    GrayImage::from_fn(dimensions.width, dimensions.height, |x, y| {
        let (fx, fy) = (f64::from(x), f64::from(y));
        if lines
            .iter()
            .any(|line| line.signed_offset(fx, fy).abs() < 0.5)
        {
            image::Luma([255])
        } else {
            image::Luma([0])
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const W: i32 = 120;
    const H: i32 = 80;

    fn rectangle_outline(w: i32, h: i32) -> Vec<Point2D<Analysis>> {
        let mut points = Vec::new();
        for x in 0..=w {
            points.push(Point2D::new(x, 0));
            points.push(Point2D::new(x, h));
        }
        for y in 1..h {
            points.push(Point2D::new(0, y));
            points.push(Point2D::new(w, y));
        }
        points
    }

    fn bounds() -> Dimensions {
        Dimensions {
            width: W.unsigned_abs() + 1,
            height: H.unsigned_abs() + 1,
        }
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1.0
    }

    #[test]
    fn rectangle_edges_are_recovered() {
        let lines = hough_lines(&rectangle_outline(W, H), bounds(), &LineParams::default()).unwrap();
        assert_eq!(lines.len(), 4);

        let expected = [
            (0.0, 0.0),
            (90.0, 0.0),
            (0.0, f64::from(W)),
            (90.0, f64::from(H)),
        ];
        for (angle, distance) in expected {
            assert!(
                lines
                    .iter()
                    .any(|l| approx_eq(l.angle, angle) && approx_eq(l.distance, distance)),
                "missing line ({angle}, {distance}) in {lines:?}",
            );
        }
    }

    #[test]
    fn longer_edges_rank_first() {
        let lines = hough_lines(&rectangle_outline(W, H), bounds(), &LineParams::default()).unwrap();
        // Horizontal edges have W + 1 points, vertical ones H - 1.
        assert!((lines[0].angle - 90.0).abs() < f64::EPSILON);
        assert!((lines[1].angle - 90.0).abs() < f64::EPSILON);
        assert!(lines[0].distance < lines[1].distance);
    }

    #[test]
    fn extraction_is_deterministic() {
        let points = rectangle_outline(W, H);
        let a = hough_lines(&points, bounds(), &LineParams::default()).unwrap();
        let b = hough_lines(&points, bounds(), &LineParams::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_points_is_invalid_input() {
        let points = vec![Point2D::new(1, 1), Point2D::new(1, 1), Point2D::new(5, 5)];
        let err = hough_lines(&points, bounds(), &LineParams::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientBorderPoints {
                found: 2,
                needed: 4
            }
        ));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn single_edge_cannot_yield_four_lines() {
        let points: Vec<Point2D<Analysis>> = (0..50).map(|x| Point2D::new(x, 10)).collect();
        let params = LineParams {
            angle_separation: 89,
            distance_separation: 500,
            ..LineParams::default()
        };
        let err = hough_lines(&points, bounds(), &params).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientLines { needed: 4, .. }));
    }

    #[test]
    fn requested_count_is_per_call() {
        let points = rectangle_outline(W, H);
        let params = LineParams {
            count: 2,
            ..LineParams::default()
        };
        assert_eq!(hough_lines(&points, bounds(), &params).unwrap().len(), 2);
        assert_eq!(
            hough_lines(&points, bounds(), &LineParams::default())
                .unwrap()
                .len(),
            4
        );
    }

    #[test]
    fn near_duplicate_wraps_around_180_degrees() {
        let params = LineParams::default();
        let a = LineEquation::new(178.0, -50.0);
        let b = LineEquation::new(2.0, 50.0);
        assert!(is_near_duplicate(a, b, &params));
        let c = LineEquation::new(2.0, -50.0);
        assert!(!is_near_duplicate(a, c, &params));
        let d = LineEquation::new(175.0, -30.0);
        assert!(is_near_duplicate(a, d, &params));
        let e = LineEquation::new(160.0, -50.0);
        assert!(!is_near_duplicate(a, e, &params));
    }

    #[test]
    fn line_mask_draws_axis_lines() {
        let lines = [LineEquation::new(0.0, 3.0), LineEquation::new(90.0, 5.0)];
        let mask = render_line_mask(
            &lines,
            Dimensions {
                width: 10,
                height: 8,
            },
        );
        assert_eq!(mask.dimensions(), (10, 8));
        for y in 0..8 {
            for x in 0..10 {
                let on_line = x == 3 || y == 5;
                let value = mask.get_pixel(x, y).0[0];
                assert_eq!(value == 255, on_line, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn line_mask_of_no_lines_is_blank() {
        let mask = render_line_mask(
            &[],
            Dimensions {
                width: 4,
                height: 4,
            },
        );
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }
}

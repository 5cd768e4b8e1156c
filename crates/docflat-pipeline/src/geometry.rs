//! Geometric primitives shared by the detection and rectification stages.
//!
//! The pipeline works in two coordinate systems: the downscaled
//! *analysis space* where borders, lines and corners are detected, and
//! the *original space* of the full-resolution input that gets
//! rectified. Every point type carries a zero-sized space marker so the
//! two cannot be mixed; the only bridge is [`ScaleFactors::to_original`].

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Marker trait for coordinate spaces.
pub trait CoordinateSpace: Copy + fmt::Debug + PartialEq + Eq + 'static {
    /// Short name used in `Debug` output.
    const NAME: &'static str;
}

/// Coordinates of the downscaled working image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Analysis {}

/// Coordinates of the full-resolution input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Original {}

impl CoordinateSpace for Analysis {
    const NAME: &'static str = "analysis";
}

impl CoordinateSpace for Original {
    const NAME: &'static str = "original";
}

/// An integer pixel coordinate in coordinate space `S`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Point2D<S: CoordinateSpace> {
    /// Horizontal position (pixels from left edge).
    pub x: i32,
    /// Vertical position (pixels from top edge).
    pub y: i32,
    #[serde(skip)]
    space: PhantomData<S>,
}

impl<S: CoordinateSpace> Point2D<S> {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            space: PhantomData,
        }
    }

    /// Euclidean distance to another point of the same space.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        dx.hypot(dy)
    }
}

impl<S: CoordinateSpace> fmt::Debug for Point2D<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point2D<{}>({}, {})", S::NAME, self.x, self.y)
    }
}

/// A sub-pixel coordinate in coordinate space `S`.
///
/// Line intersections land between pixels; they stay fractional until
/// they are scaled into original space and rounded once.
#[derive(Clone, Copy, PartialEq)]
pub struct SubpixelPoint<S: CoordinateSpace> {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    space: PhantomData<S>,
}

impl<S: CoordinateSpace> SubpixelPoint<S> {
    /// Create a new sub-pixel point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            space: PhantomData,
        }
    }

    /// Round to the nearest integer pixel in the same space.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn round(self) -> Point2D<S> {
        Point2D::new(self.x.round() as i32, self.y.round() as i32)
    }
}

impl<S: CoordinateSpace> fmt::Debug for SubpixelPoint<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubpixelPoint<{}>({:.3}, {:.3})", S::NAME, self.x, self.y)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of any `image` buffer.
    #[must_use]
    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Length of the diagonal, rounded up.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn diagonal(self) -> u32 {
        f64::from(self.width)
            .hypot(f64::from(self.height))
            .ceil() as u32
    }
}

/// Ratio of original to analysis dimensions.
///
/// Computed once by the downscaler. Multiplying an analysis-space
/// coordinate by these factors yields the original-space coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleFactors {
    /// `original_width / analysis_width`.
    pub dx: f64,
    /// `original_height / analysis_height`.
    pub dy: f64,
}

impl ScaleFactors {
    /// Scale factors mapping `analysis` dimensions back to `original`.
    #[must_use]
    pub fn between(original: Dimensions, analysis: Dimensions) -> Self {
        Self {
            dx: f64::from(original.width) / f64::from(analysis.width),
            dy: f64::from(original.height) / f64::from(analysis.height),
        }
    }

    /// The identity mapping (analysis image is the original).
    #[must_use]
    pub const fn identity() -> Self {
        Self { dx: 1.0, dy: 1.0 }
    }

    /// Map an analysis-space point into original space, rounding to the
    /// nearest pixel.
    #[must_use]
    pub fn to_original(self, point: SubpixelPoint<Analysis>) -> Point2D<Original> {
        SubpixelPoint::<Original>::new(point.x * self.dx, point.y * self.dy).round()
    }
}

/// A straight line in normal form: `x·cos θ + y·sin θ = r`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineEquation {
    /// θ in degrees, within `[0, 180)`.
    pub angle: f64,
    /// Signed distance `r` from the origin in pixels.
    pub distance: f64,
}

impl LineEquation {
    /// Create a line from its angle (degrees) and signed distance.
    #[must_use]
    pub const fn new(angle: f64, distance: f64) -> Self {
        Self { angle, distance }
    }

    /// Unit normal `(cos θ, sin θ)`.
    #[must_use]
    pub fn normal(self) -> (f64, f64) {
        let theta = self.angle.to_radians();
        (theta.cos(), theta.sin())
    }

    /// Signed distance from `(x, y)` to this line.
    #[must_use]
    pub fn signed_offset(self, x: f64, y: f64) -> f64 {
        let (cos, sin) = self.normal();
        x.mul_add(cos, y * sin) - self.distance
    }

    /// Smallest angle between the directions of two lines, in degrees
    /// (`0..=90`).
    #[must_use]
    pub fn angle_between(self, other: Self) -> f64 {
        let diff = (self.angle - other.angle).rem_euclid(180.0);
        diff.min(180.0 - diff)
    }
}

/// Four corners in canonical order.
///
/// The ordering rule is fixed so that output is deterministic:
///
/// 0. the point with minimal `x + y`,
/// 1. of the remaining points, the one with minimal `y`,
/// 2. of the remaining points, the one with maximal `x`,
/// 3. the point left over.
///
/// Ties always go to the point that came first in the input. For a
/// document photographed roughly upright this yields top-left,
/// top-right, bottom-right, bottom-left.
///
/// Serialized as a plain array of four points; deserializing reorders
/// them, so a decoded quad is always canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    bound = "",
    from = "[Point2D<S>; 4]",
    into = "[Point2D<S>; 4]"
)]
pub struct Quadrilateral<S: CoordinateSpace> {
    corners: [Point2D<S>; 4],
}

impl<S: CoordinateSpace> Quadrilateral<S> {
    /// Order four arbitrary points canonically.
    #[must_use]
    pub fn from_unordered(points: [Point2D<S>; 4]) -> Self {
        let mut remaining: Vec<Point2D<S>> = points.to_vec();

        let first = take_best(&mut remaining, |candidate, best| {
            candidate.x + candidate.y < best.x + best.y
        });
        let second = take_best(&mut remaining, |candidate, best| candidate.y < best.y);
        let third = take_best(&mut remaining, |candidate, best| candidate.x > best.x);
        let fourth = remaining[0];

        Self {
            corners: [first, second, third, fourth],
        }
    }

    /// The ordered corners.
    #[must_use]
    pub const fn corners(&self) -> &[Point2D<S>; 4] {
        &self.corners
    }

    /// Length of the side from corner `from` to the next corner.
    #[must_use]
    pub fn side_length(&self, from: usize) -> f64 {
        self.corners[from % 4].distance(self.corners[(from + 1) % 4])
    }
}

impl<S: CoordinateSpace> From<[Point2D<S>; 4]> for Quadrilateral<S> {
    fn from(points: [Point2D<S>; 4]) -> Self {
        Self::from_unordered(points)
    }
}

impl<S: CoordinateSpace> From<Quadrilateral<S>> for [Point2D<S>; 4] {
    fn from(quad: Quadrilateral<S>) -> Self {
        quad.corners
    }
}

/// Remove and return the element that wins every strict comparison,
/// scanning in order so earlier elements win ties.
///
/// `better(candidate, best)` returns `true` when `candidate` should
/// replace `best`. `points` must be non-empty.
fn take_best<S: CoordinateSpace>(
    points: &mut Vec<Point2D<S>>,
    better: impl Fn(&Point2D<S>, &Point2D<S>) -> bool,
) -> Point2D<S> {
    let mut best = 0;
    for (i, candidate) in points.iter().enumerate().skip(1) {
        if better(candidate, &points[best]) {
            best = i;
        }
    }
    points.remove(best)
}

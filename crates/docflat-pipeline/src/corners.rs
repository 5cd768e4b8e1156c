//! Corner resolution: intersect the four extracted lines.
//!
//! Four lines can be split into two pairs of opposite sides in three
//! ways. Pairings are tried from the most parallel (smallest angle
//! within each pair) to the least, and the four cross intersections of
//! the first usable pairing are the document corners. A pairing is
//! unusable when a cross pair is parallel within [`PARALLEL_EPSILON`]
//! or meets far outside the image, so near-parallel geometry falls back
//! to the next pairing instead of producing wild corners.
//!
//! Corners are found in analysis space, scaled into the original image
//! and only then rounded and canonically ordered.

use serde::{Deserialize, Serialize};

use crate::geometry::{
    Analysis, Dimensions, LineEquation, Original, Point2D, Quadrilateral, ScaleFactors,
    SubpixelPoint,
};
use crate::types::{LINE_COUNT, PipelineError};

/// Smallest `|sin(θ1 - θ2)|` for which two lines are intersected
/// (about 2°).
pub const PARALLEL_EPSILON: f64 = 0.035;

/// The three ways of splitting four lines into two opposite pairs.
const PAIRINGS: [[(usize, usize); 2]; 3] = [[(0, 1), (2, 3)], [(0, 2), (1, 3)], [(0, 3), (1, 2)]];

/// Selects which corner resolver to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CornerResolverKind {
    /// Cross intersections of the most parallel line pairing.
    #[default]
    PairedIntersections,
}

/// Trait for corner resolution strategies.
pub trait CornerResolver {
    /// Raw corner positions in analysis space, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InsufficientLines`] unless exactly four
    /// lines are given, and [`PipelineError::UnresolvableCorners`] when
    /// no pairing yields four usable intersections.
    fn resolve(
        &self,
        lines: &[LineEquation],
        bounds: Dimensions,
    ) -> Result<[SubpixelPoint<Analysis>; 4], PipelineError>;
}

impl CornerResolver for CornerResolverKind {
    fn resolve(
        &self,
        lines: &[LineEquation],
        bounds: Dimensions,
    ) -> Result<[SubpixelPoint<Analysis>; 4], PipelineError> {
        match *self {
            Self::PairedIntersections => paired_intersections(lines, bounds),
        }
    }
}

/// Intersection of two lines, or `None` when they are (nearly) parallel.
#[must_use]
pub fn intersect(a: LineEquation, b: LineEquation) -> Option<SubpixelPoint<Analysis>> {
    let (cos_a, sin_a) = a.normal();
    let (cos_b, sin_b) = b.normal();
    let det = cos_a.mul_add(sin_b, -(sin_a * cos_b));
    if det.abs() < PARALLEL_EPSILON {
        return None;
    }
    let x = a.distance.mul_add(sin_b, -(b.distance * sin_a)) / det;
    let y = cos_a.mul_add(b.distance, -(cos_b * a.distance)) / det;
    Some(SubpixelPoint::new(x, y))
}

/// Whether `point` lies within one image extent of the bounds.
fn is_plausible(point: SubpixelPoint<Analysis>, bounds: Dimensions) -> bool {
    let w = f64::from(bounds.width);
    let h = f64::from(bounds.height);
    (-w..=2.0 * w).contains(&point.x) && (-h..=2.0 * h).contains(&point.y)
}

/// Largest angle between the two lines of either pair.
fn pairing_spread(lines: &[LineEquation], pairing: &[(usize, usize); 2]) -> f64 {
    pairing
        .iter()
        .map(|&(i, j)| lines[i].angle_between(lines[j]))
        .fold(0.0, f64::max)
}

/// Corners of the first usable pairing, most parallel pairing first.
///
/// # Errors
///
/// See [`CornerResolver::resolve`].
pub fn paired_intersections(
    lines: &[LineEquation],
    bounds: Dimensions,
) -> Result<[SubpixelPoint<Analysis>; 4], PipelineError> {
    if lines.len() != LINE_COUNT {
        return Err(PipelineError::InsufficientLines {
            found: lines.len(),
            needed: LINE_COUNT,
        });
    }

    let mut order: Vec<&[(usize, usize); 2]> = PAIRINGS.iter().collect();
    // Stable: equally parallel pairings keep their listed order.
    order.sort_by(|a, b| pairing_spread(lines, a).total_cmp(&pairing_spread(lines, b)));

    for (attempt, pairing) in order.iter().enumerate() {
        let [(a, b), (c, d)] = **pairing;
        let corners = [
            intersect(lines[a], lines[c]),
            intersect(lines[a], lines[d]),
            intersect(lines[b], lines[c]),
            intersect(lines[b], lines[d]),
        ];
        if let [Some(p0), Some(p1), Some(p2), Some(p3)] = corners {
            let points = [p0, p1, p2, p3];
            if points.iter().all(|&p| is_plausible(p, bounds)) {
                if attempt > 0 {
                    tracing::warn!(attempt, "first line pairing was degenerate, fell back");
                }
                return Ok(points);
            }
        }
        tracing::debug!(attempt, "line pairing rejected");
    }

    Err(PipelineError::UnresolvableCorners)
}

/// Scale analysis-space corners into the original image and order them.
#[must_use]
pub fn to_original_quad(
    corners: [SubpixelPoint<Analysis>; 4],
    scale: ScaleFactors,
) -> Quadrilateral<Original> {
    let scaled: [Point2D<Original>; 4] = corners.map(|p| scale.to_original(p));
    Quadrilateral::from_unordered(scaled)
}

//! Point and rectangle hit testing against materialized objects.

use super::{DrawableObject, Geometry, arrow_head};
use kurbo::{Point, Rect};

/// Distance from a point to a line segment (a -> b), via clamped projection.
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = b - a;
    let pv = point - a;
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    let proj = a + seg * t;
    (point - proj).hypot()
}

/// Minimum distance from a point to a polyline (sequence of connected segments).
pub fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    match points {
        [] => f64::INFINITY,
        [only] => (point - *only).hypot(),
        _ => points
            .windows(2)
            .map(|w| point_to_segment_dist(point, w[0], w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Half-open axis-aligned overlap test used by rubber-band selection.
pub fn rects_intersect(a: Rect, b: Rect) -> bool {
    a.x0 < b.x1 && b.x0 < a.x1 && a.y0 < b.y1 && b.y0 < a.y1
}

fn contains_inclusive(rect: Rect, point: Point) -> bool {
    point.x >= rect.x0 && point.x <= rect.x1 && point.y >= rect.y0 && point.y <= rect.y1
}

/// Whether `point` hits `object`.
///
/// Bounds (grown by `tolerance`) are a fast reject, and for text they are
/// the whole answer. Strokes, lines and arrows then need the point within
/// `stroke_width / 2 + tolerance` of one of their segments, with arrow barbs
/// `arrow_head_length` long. Other shapes use their exact bounds.
pub fn hit_test(
    object: &DrawableObject,
    point: Point,
    tolerance: f64,
    arrow_head_length: f64,
) -> bool {
    if !contains_inclusive(object.bounds.inflate(tolerance, tolerance), point) {
        return false;
    }
    let reach = object.style.stroke_width / 2.0 + tolerance;
    match &object.geometry {
        Geometry::Stroke { points } => point_to_polyline_dist(point, points) <= reach,
        Geometry::Line { start, end } => point_to_segment_dist(point, *start, *end) <= reach,
        Geometry::Arrow { start, end } => {
            let [left, right] = arrow_head(*start, *end, arrow_head_length);
            point_to_segment_dist(point, *start, *end) <= reach
                || point_to_segment_dist(point, left, *end) <= reach
                || point_to_segment_dist(point, right, *end) <= reach
        }
        Geometry::Text { .. } => true,
        _ => contains_inclusive(object.bounds, point),
    }
}

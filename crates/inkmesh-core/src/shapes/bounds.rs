//! Axis-aligned bounds per object type.

use super::{Geometry, ObjectStyle};
use kurbo::{Point, Rect};

/// Text box width used when a text object carries no explicit width.
pub const DEFAULT_TEXT_WIDTH: f64 = 120.0;
/// Text box height used when a text object carries no explicit height.
pub const DEFAULT_TEXT_HEIGHT: f64 = 24.0;

/// Barb length used until a scene applies its configured value.
pub const DEFAULT_ARROW_HEAD_LENGTH: f64 = 15.0;

/// Compute the bounding box of a geometry under a style. Arrow bounds cover
/// barbs of `arrow_head_length`.
///
/// Padding is half the stroke width, except for text (literal box) and
/// circles (radius plus half the stroke width). Returns `None` for malformed
/// geometry so callers can skip it without aborting a scene pass.
pub fn compute_bounds(
    geometry: &Geometry,
    style: &ObjectStyle,
    arrow_head_length: f64,
) -> Option<Rect> {
    if !geometry.is_well_formed() {
        return None;
    }
    let pad = style.stroke_width.max(0.0) / 2.0;

    let rect = match geometry {
        Geometry::Stroke { points } | Geometry::Polygon { vertices: points } => {
            points_rect(points)?.inflate(pad, pad)
        }
        Geometry::Triangle { vertices } => points_rect(vertices)?.inflate(pad, pad),
        Geometry::Line { start, end } => Rect::from_points(*start, *end).inflate(pad, pad),
        Geometry::Arrow { start, end } => {
            let [left, right] = arrow_head(*start, *end, arrow_head_length);
            points_rect(&[*start, *end, left, right])?.inflate(pad, pad)
        }
        Geometry::Rectangle {
            x,
            y,
            width,
            height,
        } => Rect::new(*x, *y, x + width, y + height).inflate(pad, pad),
        Geometry::Circle { center, radius } => {
            let r = radius + pad;
            Rect::new(center.x - r, center.y - r, center.x + r, center.y + r)
        }
        Geometry::Text {
            position,
            width,
            height,
            ..
        } => {
            let w = width.unwrap_or(DEFAULT_TEXT_WIDTH);
            let h = height.unwrap_or(DEFAULT_TEXT_HEIGHT);
            Rect::new(position.x, position.y, position.x + w, position.y + h)
        }
    };
    Some(rect)
}

/// The two barb endpoints of an arrowhead at `end`, each `length` long and
/// 30 degrees off the shaft.
pub fn arrow_head(start: Point, end: Point, length: f64) -> [Point; 2] {
    let angle = (end.y - start.y).atan2(end.x - start.x);
    let spread = std::f64::consts::PI / 6.0;
    let barb = |offset: f64| {
        Point::new(
            end.x - length * (angle + offset).cos(),
            end.y - length * (angle + offset).sin(),
        )
    };
    [barb(-spread), barb(spread)]
}

fn points_rect(points: &[Point]) -> Option<Rect> {
    let (first, rest) = points.split_first()?;
    let mut min_x = first.x;
    let mut min_y = first.y;
    let mut max_x = first.x;
    let mut max_y = first.y;
    for point in rest {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some(Rect::new(min_x, min_y, max_x, max_y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::Geometry;

    fn style(width: f64) -> ObjectStyle {
        ObjectStyle {
            stroke_width: width,
            ..ObjectStyle::default()
        }
    }

    fn contains_inclusive(rect: Rect, p: Point) -> bool {
        p.x >= rect.x0 && p.x <= rect.x1 && p.y >= rect.y0 && p.y <= rect.y1
    }

    #[test]
    fn test_rectangle_padded_by_half_stroke() {
        let geometry = Geometry::Rectangle {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 30.0,
        };
        let bounds = compute_bounds(&geometry, &style(10.0), DEFAULT_ARROW_HEAD_LENGTH).unwrap();
        assert!((bounds.x0 - 5.0).abs() < f64::EPSILON);
        assert!((bounds.y0 - 5.0).abs() < f64::EPSILON);
        assert!((bounds.width() - 60.0).abs() < f64::EPSILON);
        assert!((bounds.height() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_circle_radius_plus_half_stroke() {
        let geometry = Geometry::Circle {
            center: Point::new(100.0, 100.0),
            radius: 20.0,
        };
        let bounds = compute_bounds(&geometry, &style(4.0), DEFAULT_ARROW_HEAD_LENGTH).unwrap();
        assert_eq!(bounds, Rect::new(78.0, 78.0, 122.0, 122.0));
    }

    #[test]
    fn test_text_uses_literal_or_default_box() {
        let explicit = Geometry::Text {
            position: Point::new(5.0, 6.0),
            content: "hi".into(),
            width: Some(40.0),
            height: Some(10.0),
        };
        assert_eq!(
            compute_bounds(&explicit, &style(8.0), DEFAULT_ARROW_HEAD_LENGTH).unwrap(),
            Rect::new(5.0, 6.0, 45.0, 16.0)
        );

        let defaulted = Geometry::Text {
            position: Point::new(0.0, 0.0),
            content: "hi".into(),
            width: None,
            height: None,
        };
        let bounds = compute_bounds(&defaulted, &style(8.0), DEFAULT_ARROW_HEAD_LENGTH).unwrap();
        assert!((bounds.width() - DEFAULT_TEXT_WIDTH).abs() < f64::EPSILON);
        assert!((bounds.height() - DEFAULT_TEXT_HEIGHT).abs() < f64::EPSILON);
    }

    #[test]
    fn test_every_literal_point_inside_bounds() {
        let geometries = vec![
            Geometry::Stroke {
                points: vec![Point::new(0.0, 0.0), Point::new(30.0, -10.0), Point::new(12.0, 44.0)],
            },
            Geometry::Line {
                start: Point::new(50.0, 50.0),
                end: Point::new(-20.0, 5.0),
            },
            Geometry::Arrow {
                start: Point::new(0.0, 0.0),
                end: Point::new(100.0, 0.0),
            },
            Geometry::Rectangle {
                x: -5.0,
                y: 3.0,
                width: 7.0,
                height: 9.0,
            },
            Geometry::Circle {
                center: Point::new(1.0, 1.0),
                radius: 10.0,
            },
            Geometry::Triangle {
                vertices: [Point::new(10.0, 0.0), Point::new(0.0, 20.0), Point::new(20.0, 20.0)],
            },
            Geometry::Polygon {
                vertices: vec![Point::new(0.0, -10.0), Point::new(8.0, 6.0), Point::new(-8.0, 6.0)],
            },
            Geometry::Text {
                position: Point::new(3.0, 4.0),
                content: "x".into(),
                width: None,
                height: None,
            },
        ];
        for geometry in geometries {
            let bounds = compute_bounds(&geometry, &style(3.0), DEFAULT_ARROW_HEAD_LENGTH).unwrap();
            for point in geometry.points() {
                assert!(
                    contains_inclusive(bounds, point),
                    "{:?} not inside {:?} for {:?}",
                    point,
                    bounds,
                    geometry.kind()
                );
            }
        }
    }

    #[test]
    fn test_malformed_geometry_has_no_bounds() {
        let geometry = Geometry::Stroke { points: Vec::new() };
        assert!(compute_bounds(&geometry, &style(2.0), DEFAULT_ARROW_HEAD_LENGTH).is_none());
    }

    #[test]
    fn test_arrow_head_barbs_behind_tip() {
        let [left, right] = arrow_head(Point::new(0.0, 0.0), Point::new(100.0, 0.0), 15.0);
        assert!(left.x < 100.0 && right.x < 100.0);
        assert!((left.y + right.y).abs() < 1e-9);
        let len = ((100.0 - left.x).powi(2) + left.y.powi(2)).sqrt();
        assert!((len - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_arrow_bounds_follow_head_length() {
        let arrow = Geometry::Arrow {
            start: Point::new(0.0, 0.0),
            end: Point::new(100.0, 0.0),
        };
        let short = compute_bounds(&arrow, &style(0.0), 15.0).unwrap();
        let long = compute_bounds(&arrow, &style(0.0), 40.0).unwrap();
        // Barbs sit 30 degrees off the shaft, so the box is one head length tall.
        assert!((short.height() - 15.0).abs() < 1e-9);
        assert!((long.height() - 40.0).abs() < 1e-9);
        assert!(long.contains_rect(short));
    }
}

//! Anchor-and-drag shape tools.

use std::f64::consts::{FRAC_PI_2, TAU};

use kurbo::{Point, Rect};

use super::{ObjectDraft, PointerSample, ToolAction, ToolBehavior, ToolContext};
use crate::render::Surface;
use crate::shapes::Geometry;

/// Shapes drawn from an anchor and a drag point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Line,
    Arrow,
    Rectangle,
    Circle,
    Triangle,
    Polygon,
}

/// Isosceles triangle inscribed in `rect`, apex at the middle of the top edge.
pub fn triangle_vertices(rect: Rect) -> [Point; 3] {
    [
        Point::new(rect.x0 + rect.width() / 2.0, rect.y0),
        Point::new(rect.x1, rect.y1),
        Point::new(rect.x0, rect.y1),
    ]
}

/// Regular polygon vertices, the first one straight up from `center`.
pub fn polygon_vertices(center: Point, radius: f64, sides: usize) -> Vec<Point> {
    let sides = sides.max(3);
    (0..sides)
        .map(|i| {
            let angle = -FRAC_PI_2 + TAU * i as f64 / sides as f64;
            Point::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
        })
        .collect()
}

/// Geometry for a drag from `start` to `current`.
pub fn shape_geometry(kind: ShapeKind, start: Point, current: Point, sides: usize) -> Geometry {
    match kind {
        ShapeKind::Line => Geometry::Line {
            start,
            end: current,
        },
        ShapeKind::Arrow => Geometry::Arrow {
            start,
            end: current,
        },
        ShapeKind::Rectangle => {
            let rect = Rect::from_points(start, current);
            Geometry::Rectangle {
                x: rect.x0,
                y: rect.y0,
                width: rect.width(),
                height: rect.height(),
            }
        }
        ShapeKind::Circle => Geometry::Circle {
            center: start,
            radius: start.distance(current),
        },
        ShapeKind::Triangle => Geometry::Triangle {
            vertices: triangle_vertices(Rect::from_points(start, current)),
        },
        ShapeKind::Polygon => Geometry::Polygon {
            vertices: polygon_vertices(start, start.distance(current), sides),
        },
    }
}

/// Line, arrow, rectangle, circle, triangle and polygon tools.
#[derive(Debug, Clone)]
pub struct ShapeTool {
    kind: ShapeKind,
    /// Anchor and current point while active.
    drag: Option<(Point, Point)>,
}

impl ShapeTool {
    pub fn new(kind: ShapeKind) -> Self {
        Self { kind, drag: None }
    }

    pub fn kind(&self) -> ShapeKind {
        self.kind
    }

    fn geometry(&self, ctx: &ToolContext) -> Option<Geometry> {
        self.drag
            .map(|(start, current)| shape_geometry(self.kind, start, current, ctx.brush.polygon_sides))
    }
}

impl ToolBehavior for ShapeTool {
    fn on_down(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        self.drag = Some((pointer.world, pointer.world));
        ToolAction::None
    }

    fn on_move(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        if let Some((_, current)) = self.drag.as_mut() {
            *current = pointer.world;
        }
        ToolAction::None
    }

    fn on_up(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        let Some((start, _)) = self.drag.take() else {
            return ToolAction::None;
        };
        // A click without a drag has no extent.
        if start.distance(pointer.world) < f64::EPSILON {
            log::debug!("discarding zero-size {:?}", self.kind);
            return ToolAction::None;
        }
        ToolAction::Create(ObjectDraft {
            geometry: shape_geometry(self.kind, start, pointer.world, ctx.brush.polygon_sides),
            style: ctx.brush.style.clone(),
        })
    }

    fn on_cancel(&mut self) {
        self.drag = None;
    }

    fn is_active(&self) -> bool {
        self.drag.is_some()
    }

    fn render_preview(&self, surface: &mut dyn Surface, ctx: &ToolContext) {
        if let Some(geometry) = self.geometry(ctx) {
            let path = geometry.to_path(ctx.config.arrow_head_length);
            surface.draw_preview(&geometry, &path, &ctx.brush.style);
        }
    }
}

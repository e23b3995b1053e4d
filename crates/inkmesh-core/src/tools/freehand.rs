//! Freehand stroke tool.

use kurbo::Point;

use super::{ObjectDraft, PointerSample, ToolAction, ToolBehavior, ToolContext};
use crate::render::Surface;
use crate::shapes::Geometry;

/// Collects every pointer position while the button is held.
#[derive(Debug, Clone, Default)]
pub struct FreehandTool {
    points: Vec<Point>,
    active: bool,
}

impl FreehandTool {
    /// Points collected so far.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    fn push(&mut self, point: Point) {
        if self.points.last() != Some(&point) {
            self.points.push(point);
        }
    }
}

impl ToolBehavior for FreehandTool {
    fn on_down(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        self.points.clear();
        self.points.push(pointer.world);
        self.active = true;
        ToolAction::None
    }

    fn on_move(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        if self.active {
            self.push(pointer.world);
        }
        ToolAction::None
    }

    fn on_up(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        if !self.active {
            return ToolAction::None;
        }
        self.push(pointer.world);
        self.active = false;
        let points = std::mem::take(&mut self.points);
        if points.len() < 2 {
            return ToolAction::None;
        }
        ToolAction::Create(ObjectDraft {
            geometry: Geometry::Stroke { points },
            style: ctx.brush.style.clone(),
        })
    }

    fn on_cancel(&mut self) {
        self.points.clear();
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn render_preview(&self, surface: &mut dyn Surface, ctx: &ToolContext) {
        if self.active && self.points.len() >= 2 {
            let geometry = Geometry::Stroke {
                points: self.points.clone(),
            };
            let path = geometry.to_path(ctx.config.arrow_head_length);
            surface.draw_preview(&geometry, &path, &ctx.brush.style);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{Fixture, at};

    #[test]
    fn test_stroke_collects_points() {
        let fixture = Fixture::new();
        let mut tool = FreehandTool::default();
        tool.on_down(at(0.0, 0.0), &fixture.ctx());
        tool.on_move(at(1.0, 1.0), &fixture.ctx());
        tool.on_move(at(1.0, 1.0), &fixture.ctx());
        tool.on_move(at(2.0, 3.0), &fixture.ctx());
        let ToolAction::Create(draft) = tool.on_up(at(2.0, 3.0), &fixture.ctx()) else {
            panic!("expected a stroke");
        };
        assert_eq!(draft.geometry.points().len(), 3);
        assert!(tool.points().is_empty());
    }

    #[test]
    fn test_single_point_suppressed() {
        let fixture = Fixture::new();
        let mut tool = FreehandTool::default();
        tool.on_down(at(4.0, 4.0), &fixture.ctx());
        assert_eq!(tool.on_up(at(4.0, 4.0), &fixture.ctx()), ToolAction::None);
        assert!(!tool.is_active());
    }

    #[test]
    fn test_moves_while_idle_ignored() {
        let fixture = Fixture::new();
        let mut tool = FreehandTool::default();
        tool.on_move(at(1.0, 1.0), &fixture.ctx());
        assert!(tool.points().is_empty());
    }
}

//! Pan tool.

use kurbo::Point;

use super::{PointerSample, ToolAction, ToolBehavior, ToolContext};

/// Drags the view. Works in screen space so the delta does not depend on
/// the camera it is moving.
#[derive(Debug, Clone, Default)]
pub struct PanTool {
    last: Option<Point>,
}

impl PanTool {
    fn drag_to(&mut self, screen: Point) -> ToolAction {
        let Some(last) = self.last.replace(screen) else {
            return ToolAction::None;
        };
        let delta = screen - last;
        if delta.hypot2() == 0.0 {
            ToolAction::None
        } else {
            ToolAction::Pan(delta)
        }
    }
}

impl ToolBehavior for PanTool {
    fn on_down(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        self.last = Some(pointer.screen);
        ToolAction::None
    }

    fn on_move(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        if self.last.is_none() {
            return ToolAction::None;
        }
        self.drag_to(pointer.screen)
    }

    fn on_up(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        if self.last.is_none() {
            return ToolAction::None;
        }
        let action = self.drag_to(pointer.screen);
        self.last = None;
        action
    }

    fn on_cancel(&mut self) {
        self.last = None;
    }

    fn is_active(&self) -> bool {
        self.last.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::Fixture;
    use kurbo::Vec2;

    fn screen(x: f64, y: f64) -> PointerSample {
        PointerSample::new(Point::new(x * 2.0, y * 2.0), Point::new(x, y))
    }

    #[test]
    fn test_pan_reports_screen_deltas() {
        let fixture = Fixture::new();
        let mut tool = PanTool::default();
        tool.on_down(screen(10.0, 10.0), &fixture.ctx());
        assert_eq!(
            tool.on_move(screen(15.0, 8.0), &fixture.ctx()),
            ToolAction::Pan(Vec2::new(5.0, -2.0))
        );
        assert_eq!(tool.on_move(screen(15.0, 8.0), &fixture.ctx()), ToolAction::None);
        assert_eq!(
            tool.on_up(screen(16.0, 8.0), &fixture.ctx()),
            ToolAction::Pan(Vec2::new(1.0, 0.0))
        );
        assert!(!tool.is_active());
    }
}

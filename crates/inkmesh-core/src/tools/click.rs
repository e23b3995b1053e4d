//! Single-click tools: fill stamp, text placement and eyedropper.
//!
//! Each goes active on pointer down and acts on pointer up at the point
//! where the press started.

use kurbo::Point;

use super::{BrushOptions, ObjectDraft, PointerSample, ToolAction, ToolBehavior, ToolContext};
use crate::config::EngineConfig;
use crate::shapes::Geometry;

/// Square of side `size` centered on `center`.
pub fn fill_geometry(center: Point, size: f64) -> Geometry {
    Geometry::Rectangle {
        x: center.x - size / 2.0,
        y: center.y - size / 2.0,
        width: size,
        height: size,
    }
}

/// Text object at `position` with the configured default font size and box.
/// Blank content yields nothing.
pub fn text_draft(
    position: Point,
    content: &str,
    brush: &BrushOptions,
    config: &EngineConfig,
) -> Option<ObjectDraft> {
    if content.trim().is_empty() {
        return None;
    }
    let mut style = brush.style.clone();
    style.font_size = config.text_font_size;
    Some(ObjectDraft {
        geometry: Geometry::Text {
            position,
            content: content.to_string(),
            width: Some(config.text_width),
            height: Some(config.text_height),
        },
        style,
    })
}

/// Press position of a pending click.
#[derive(Debug, Clone, Default)]
struct Press(Option<PointerSample>);

impl Press {
    fn down(&mut self, pointer: PointerSample) -> ToolAction {
        self.0 = Some(pointer);
        ToolAction::None
    }

    fn release(&mut self) -> Option<PointerSample> {
        self.0.take()
    }
}

/// Stamps a filled square centered on the click.
#[derive(Debug, Clone, Default)]
pub struct FillTool {
    press: Press,
}

impl ToolBehavior for FillTool {
    fn on_down(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        self.press.down(pointer)
    }

    fn on_move(&mut self, _pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        ToolAction::None
    }

    fn on_up(&mut self, _pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        let Some(press) = self.press.release() else {
            return ToolAction::None;
        };
        let mut style = ctx.brush.style.clone();
        if style.fill_color.is_none() {
            style.fill_color = Some(style.color);
        }
        ToolAction::Create(ObjectDraft {
            geometry: fill_geometry(press.world, ctx.config.fill_size),
            style,
        })
    }

    fn on_cancel(&mut self) {
        self.press.release();
    }

    fn is_active(&self) -> bool {
        self.press.0.is_some()
    }
}

/// Asks the host for text and places it at the click.
#[derive(Debug, Clone, Default)]
pub struct TextTool {
    press: Press,
}

impl ToolBehavior for TextTool {
    fn on_down(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        self.press.down(pointer)
    }

    fn on_move(&mut self, _pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        ToolAction::None
    }

    fn on_up(&mut self, _pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        match self.press.release() {
            Some(press) => ToolAction::RequestText(press.world),
            None => ToolAction::None,
        }
    }

    fn on_cancel(&mut self) {
        self.press.release();
    }

    fn is_active(&self) -> bool {
        self.press.0.is_some()
    }
}

/// Samples the rendered color under the click. Never mutates the document.
#[derive(Debug, Clone, Default)]
pub struct EyedropperTool {
    press: Press,
}

impl ToolBehavior for EyedropperTool {
    fn on_down(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        self.press.down(pointer)
    }

    fn on_move(&mut self, _pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        ToolAction::None
    }

    fn on_up(&mut self, _pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        match self.press.release() {
            Some(press) => ToolAction::PickColor(press.screen),
            None => ToolAction::None,
        }
    }

    fn on_cancel(&mut self) {
        self.press.release();
    }

    fn is_active(&self) -> bool {
        self.press.0.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::SerializableColor;
    use crate::tools::test_support::{Fixture, at};

    #[test]
    fn test_fill_stamp_centered() {
        let mut fixture = Fixture::new();
        fixture.brush.style.color = SerializableColor::new(255, 0, 0, 255);
        let mut tool = FillTool::default();
        tool.on_down(at(200.0, 100.0), &fixture.ctx());
        assert!(tool.is_active());
        let ToolAction::Create(draft) = tool.on_up(at(210.0, 90.0), &fixture.ctx()) else {
            panic!("expected a stamp");
        };
        assert_eq!(
            draft.geometry,
            Geometry::Rectangle {
                x: 150.0,
                y: 50.0,
                width: 100.0,
                height: 100.0
            }
        );
        assert_eq!(draft.style.fill_color, Some(fixture.brush.style.color));
    }

    #[test]
    fn test_text_requests_content_at_click() {
        let fixture = Fixture::new();
        let mut tool = TextTool::default();
        tool.on_down(at(7.0, 8.0), &fixture.ctx());
        assert_eq!(
            tool.on_up(at(7.0, 8.0), &fixture.ctx()),
            ToolAction::RequestText(Point::new(7.0, 8.0))
        );

        let draft = text_draft(Point::new(7.0, 8.0), "hi", &fixture.brush, &fixture.config).unwrap();
        assert!((draft.style.font_size - 20.0).abs() < f64::EPSILON);
        assert!(text_draft(Point::ZERO, "  ", &fixture.brush, &fixture.config).is_none());
    }

    #[test]
    fn test_eyedropper_uses_screen_point() {
        let fixture = Fixture::new();
        let mut tool = EyedropperTool::default();
        let pointer = PointerSample::new(Point::new(1.0, 1.0), Point::new(50.0, 60.0));
        tool.on_down(pointer, &fixture.ctx());
        assert_eq!(
            tool.on_up(pointer, &fixture.ctx()),
            ToolAction::PickColor(Point::new(50.0, 60.0))
        );
    }

    #[test]
    fn test_cancel_discards_click() {
        let fixture = Fixture::new();
        let mut tool = FillTool::default();
        tool.on_down(at(0.0, 0.0), &fixture.ctx());
        tool.on_cancel();
        assert_eq!(tool.on_up(at(0.0, 0.0), &fixture.ctx()), ToolAction::None);
    }
}

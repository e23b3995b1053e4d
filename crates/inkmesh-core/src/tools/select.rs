//! Click and rubber-band selection.

use kurbo::{Point, Rect};

use super::{PointerSample, ToolAction, ToolBehavior, ToolContext};
use crate::render::Surface;
use crate::shapes::ObjectId;

#[derive(Debug, Clone, Default)]
enum SelectState {
    #[default]
    Idle,
    /// Pressed on an object; drags are ignored until release.
    Picked,
    /// Dragging a selection rectangle.
    Band { start: Point, current: Point },
}

/// Pointer down hit-tests top to bottom. A hit sets the selection (toggles
/// it with the additive modifier); a miss clears the selection, unless
/// additive, and starts a rubber band. Releasing the band adds every object
/// whose bounds overlap it.
#[derive(Debug, Clone, Default)]
pub struct SelectTool {
    state: SelectState,
}

impl SelectTool {
    /// The rubber band rectangle while dragging one.
    pub fn band(&self) -> Option<Rect> {
        match self.state {
            SelectState::Band { start, current } => Some(Rect::from_points(start, current)),
            _ => None,
        }
    }
}

impl ToolBehavior for SelectTool {
    fn on_down(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        let additive = ctx.modifiers.additive();
        if let Some(hit) = ctx.scene.topmost_at(pointer.world, ctx.config.hit_tolerance) {
            self.state = SelectState::Picked;
            let selection = if additive {
                let mut selection = ctx.selection.to_vec();
                match selection.iter().position(|id| *id == hit) {
                    Some(index) => {
                        selection.remove(index);
                    }
                    None => selection.push(hit),
                }
                selection
            } else {
                vec![hit]
            };
            return ToolAction::SetSelection(selection);
        }
        self.state = SelectState::Band {
            start: pointer.world,
            current: pointer.world,
        };
        if additive || ctx.selection.is_empty() {
            ToolAction::None
        } else {
            ToolAction::SetSelection(Vec::new())
        }
    }

    fn on_move(&mut self, pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        if let SelectState::Band { current, .. } = &mut self.state {
            *current = pointer.world;
        }
        ToolAction::None
    }

    fn on_up(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        let SelectState::Band { start, .. } = std::mem::take(&mut self.state) else {
            return ToolAction::None;
        };
        let band = Rect::from_points(start, pointer.world);
        if band.width() == 0.0 && band.height() == 0.0 {
            return ToolAction::None;
        }
        let mut selection: Vec<ObjectId> = ctx.selection.to_vec();
        for id in ctx.scene.objects_in_rect(band) {
            if !selection.contains(&id) {
                selection.push(id);
            }
        }
        if selection.as_slice() == ctx.selection {
            ToolAction::None
        } else {
            ToolAction::SetSelection(selection)
        }
    }

    fn on_cancel(&mut self) {
        self.state = SelectState::Idle;
    }

    fn is_active(&self) -> bool {
        !matches!(self.state, SelectState::Idle)
    }

    fn render_preview(&self, surface: &mut dyn Surface, _ctx: &ToolContext) {
        if let Some(band) = self.band() {
            surface.draw_rubber_band(band);
        }
    }
}

//! Eraser: deletes on pointer down, bypassing history.

use super::{PointerSample, ToolAction, ToolBehavior, ToolContext};

/// Removes the selection if there is one, else the topmost object under
/// the pointer. Objects on locked or hidden layers are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct EraserTool;

impl ToolBehavior for EraserTool {
    fn on_down(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        if !ctx.selection.is_empty() {
            let targets: Vec<_> = ctx
                .selection
                .iter()
                .copied()
                .filter(|id| {
                    ctx.scene
                        .object(*id)
                        .is_some_and(|object| ctx.scene.is_interactive(object))
                })
                .collect();
            return if targets.is_empty() {
                ToolAction::None
            } else {
                ToolAction::Erase(targets)
            };
        }
        match ctx.scene.topmost_at(pointer.world, ctx.config.hit_tolerance) {
            Some(id) => ToolAction::Erase(vec![id]),
            None => ToolAction::None,
        }
    }

    fn on_move(&mut self, _pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        ToolAction::None
    }

    fn on_up(&mut self, _pointer: PointerSample, _ctx: &ToolContext) -> ToolAction {
        ToolAction::None
    }

    fn on_cancel(&mut self) {}

    fn is_active(&self) -> bool {
        false
    }
}

//! Local undo/redo over reversible commands.

mod commands;

pub use commands::{AddObject, Batch, Command, ModifyObject, RemoveObject, TransformObject};
pub(crate) use commands::target_layer;

use std::collections::VecDeque;

use crate::crdt::{DocumentResult, ReplicatedDocument};

/// Default number of undo entries kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded undo stack plus redo stack.
pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
    capacity: usize,
}

impl HistoryManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Execute `command`, record it and clear the redo stack. A command that
    /// fails is not recorded.
    pub fn execute(
        &mut self,
        mut command: Box<dyn Command>,
        doc: &mut ReplicatedDocument,
    ) -> DocumentResult<()> {
        command.execute(doc)?;
        log::debug!("executed '{}'", command.label());
        self.push_undo(command);
        self.redo_stack.clear();
        Ok(())
    }

    fn push_undo(&mut self, command: Box<dyn Command>) {
        self.undo_stack.push_back(command);
        if self.undo_stack.len() > self.capacity {
            self.undo_stack.pop_front();
        }
    }

    /// Undo the latest command. Returns false when there is nothing to undo
    /// or the compensating mutation failed (the command is then dropped).
    pub fn undo(&mut self, doc: &mut ReplicatedDocument) -> bool {
        let Some(mut command) = self.undo_stack.pop_back() else {
            return false;
        };
        match command.undo(doc) {
            Ok(()) => {
                self.redo_stack.push(command);
                true
            }
            Err(err) => {
                log::warn!("undo of '{}' failed: {err}", command.label());
                false
            }
        }
    }

    /// Redo the latest undone command.
    pub fn redo(&mut self, doc: &mut ReplicatedDocument) -> bool {
        let Some(mut command) = self.redo_stack.pop() else {
            return false;
        };
        match command.redo(doc) {
            Ok(()) => {
                self.push_undo(command);
                true
            }
            Err(err) => {
                log::warn!("redo of '{}' failed: {err}", command.label());
                false
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Label of the command `undo` would revert.
    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.back().map(|command| command.label())
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.redo_stack.last().map(|command| command.label())
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{DrawableObject, Geometry, ObjectPatch, ObjectStyle};
    use kurbo::Point;

    fn stroke() -> DrawableObject {
        DrawableObject::new(
            Geometry::Stroke {
                points: vec![Point::new(0.0, 0.0), Point::new(4.0, 4.0)],
            },
            ObjectStyle::default(),
        )
    }

    #[test]
    fn test_execute_clears_redo() {
        let mut doc = ReplicatedDocument::new();
        let mut history = HistoryManager::default();
        let first = stroke();
        history
            .execute(Box::new(AddObject::new(first.clone(), None)), &mut doc)
            .unwrap();
        assert!(history.undo(&mut doc));
        assert!(history.can_redo());

        history
            .execute(Box::new(AddObject::new(stroke(), None)), &mut doc)
            .unwrap();
        assert!(!history.can_redo());
        assert!(!doc.contains_object(first.id));
    }

    #[test]
    fn test_empty_stacks_report_failure() {
        let mut doc = ReplicatedDocument::new();
        let mut history = HistoryManager::default();
        assert!(!history.undo(&mut doc));
        assert!(!history.redo(&mut doc));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut doc = ReplicatedDocument::new();
        let mut history = HistoryManager::new(3);
        for _ in 0..5 {
            history
                .execute(Box::new(AddObject::new(stroke(), None)), &mut doc)
                .unwrap();
        }
        assert_eq!(history.undo_count(), 3);
        for _ in 0..3 {
            assert!(history.undo(&mut doc));
        }
        assert!(!history.undo(&mut doc));
        assert_eq!(doc.object_count(), 2);
    }

    #[test]
    fn test_undo_redo_inverse() {
        let mut doc = ReplicatedDocument::new();
        let mut history = HistoryManager::default();
        let object = stroke();
        history
            .execute(Box::new(AddObject::new(object.clone(), None)), &mut doc)
            .unwrap();
        history
            .execute(
                Box::new(ModifyObject::new(object.id, ObjectPatch::default().opacity(0.3))),
                &mut doc,
            )
            .unwrap();
        let after = doc.snapshot();

        assert!(history.undo(&mut doc));
        assert!((doc.object(object.id).unwrap().style.opacity - 1.0).abs() < f64::EPSILON);
        assert!(history.redo(&mut doc));
        let redone = doc.snapshot();
        assert_eq!(redone.objects, after.objects);
        assert_eq!(redone.layers, after.layers);
        assert_eq!(history.undo_label(), Some("Modify object"));
    }

    #[test]
    fn test_failed_command_not_recorded() {
        let mut doc = ReplicatedDocument::new();
        let mut history = HistoryManager::default();
        let result = history.execute(Box::new(RemoveObject::new(uuid::Uuid::new_v4())), &mut doc);
        assert!(result.is_err());
        assert!(!history.can_undo());
    }
}

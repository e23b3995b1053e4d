//! Reversible document mutations.
//!
//! Undo never rolls back the replication log. Each command undoes itself by
//! issuing a compensating mutation through the same replicated path, so
//! peers that already built on the forward mutation stay consistent.

use kurbo::Vec2;

use crate::crdt::{DEFAULT_LAYER_ID, DocumentError, DocumentResult, RemovedObject, ReplicatedDocument};
use crate::shapes::{DrawableObject, Geometry, LayerId, ObjectId, ObjectPatch};

/// A reversible mutation. Commands live only in local history; they are
/// never persisted or replicated.
pub trait Command {
    fn execute(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()>;

    fn undo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()>;

    fn redo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        self.execute(doc)
    }

    /// Short human-readable name, e.g. for an "Undo …" menu entry.
    fn label(&self) -> &str;
}

/// Pick the layer a new object lands on.
///
/// `preferred` wins when it exists and is usable. Otherwise the first
/// unlocked layer, then the first layer, and with no layers at all the
/// default layer is bootstrapped; the flag reports that. Must run inside a
/// transaction with the insert it feeds.
pub(crate) fn target_layer(
    doc: &mut ReplicatedDocument,
    preferred: Option<&str>,
    allow_locked: bool,
) -> DocumentResult<(LayerId, bool)> {
    let layers = doc.layers();
    if let Some(layer) = preferred.and_then(|id| layers.iter().find(|layer| layer.id == id)) {
        if allow_locked || !layer.locked {
            return Ok((layer.id.clone(), false));
        }
    }
    if let Some(layer) = layers.iter().find(|layer| !layer.locked) {
        return Ok((layer.id.clone(), false));
    }
    if let Some(layer) = layers.first() {
        return Ok((layer.id.clone(), false));
    }
    let created = doc.ensure_default_layer()?;
    Ok((DEFAULT_LAYER_ID.to_string(), created))
}

/// Insert an object. Undo removes it by id, along with the default layer
/// when the insert had to create it and nothing else landed there since.
pub struct AddObject {
    object: DrawableObject,
    layer: Option<LayerId>,
    position: Option<usize>,
    bootstrapped: bool,
}

impl AddObject {
    /// Add `object` to `layer`, falling back per [`target_layer`] rules.
    pub fn new(object: DrawableObject, layer: Option<LayerId>) -> Self {
        Self {
            object,
            layer,
            position: None,
            bootstrapped: false,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.object.id
    }
}

impl Command for AddObject {
    fn execute(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        let object = &self.object;
        let preferred = self.layer.clone();
        let position = self.position;
        let (placed, created) = doc.transact(|doc| {
            let (layer, created) = target_layer(doc, preferred.as_deref(), false)?;
            doc.add_object(object, &layer, position)?;
            Ok((layer, created))
        })?;
        // Redo goes back to the same layer even if it has since been locked.
        self.layer = Some(placed);
        self.bootstrapped = created;
        Ok(())
    }

    fn undo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        let id = self.object.id;
        let drop_bootstrap = std::mem::take(&mut self.bootstrapped);
        let removed = doc.transact(|doc| {
            let removed = match doc.remove_object(id) {
                Ok(removed) => Some(removed.position),
                // Already removed by someone else; nothing to compensate.
                Err(DocumentError::ObjectNotFound(_)) => None,
                Err(err) => return Err(err),
            };
            let bootstrap_empty = doc
                .layer(DEFAULT_LAYER_ID)
                .is_some_and(|layer| layer.objects.is_empty());
            if drop_bootstrap && bootstrap_empty {
                doc.delete_layer(DEFAULT_LAYER_ID)?;
            }
            Ok(removed)
        })?;
        if let Some(position) = removed {
            self.position = position;
        }
        Ok(())
    }

    fn redo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        let object = &self.object;
        let preferred = self.layer.clone();
        let position = self.position;
        self.bootstrapped = doc.transact(|doc| {
            let (layer, created) = target_layer(doc, preferred.as_deref(), true)?;
            doc.add_object(object, &layer, position)?;
            Ok(created)
        })?;
        Ok(())
    }

    fn label(&self) -> &str {
        "Add object"
    }
}

/// Remove an object, capturing it and its layer position for undo.
pub struct RemoveObject {
    id: ObjectId,
    captured: Option<RemovedObject>,
}

impl RemoveObject {
    pub fn new(id: ObjectId) -> Self {
        Self { id, captured: None }
    }
}

impl Command for RemoveObject {
    fn execute(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        self.captured = Some(doc.remove_object(self.id)?);
        Ok(())
    }

    fn undo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        let Some(captured) = &self.captured else {
            return Ok(());
        };
        if doc.contains_object(self.id) {
            return Ok(());
        }
        doc.transact(|doc| {
            let (layer, _) = target_layer(doc, captured.layer.as_deref(), true)?;
            // Only reuse the position if the original layer survived.
            let position = if captured.layer.as_deref() == Some(layer.as_str()) {
                captured.position
            } else {
                None
            };
            doc.add_object(&captured.object, &layer, position)
        })
    }

    fn label(&self) -> &str {
        "Remove object"
    }
}

/// Apply a partial update. Only the touched fields are captured, so undo
/// leaves concurrent edits to other fields alone.
pub struct ModifyObject {
    id: ObjectId,
    patch: ObjectPatch,
    previous: Option<ObjectPatch>,
}

impl ModifyObject {
    pub fn new(id: ObjectId, patch: ObjectPatch) -> Self {
        Self {
            id,
            patch,
            previous: None,
        }
    }
}

impl Command for ModifyObject {
    fn execute(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        let current = doc.object(self.id).ok_or(DocumentError::ObjectNotFound(self.id))?;
        self.previous = Some(self.patch.capture_from(&current));
        doc.update_object(self.id, &self.patch)
    }

    fn undo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        match &self.previous {
            Some(previous) => doc.update_object(self.id, previous),
            None => Ok(()),
        }
    }

    fn label(&self) -> &str {
        "Modify object"
    }
}

/// Swap an object's geometry between two stored states.
pub struct TransformObject {
    id: ObjectId,
    from: Geometry,
    to: Geometry,
}

impl TransformObject {
    pub fn new(id: ObjectId, from: Geometry, to: Geometry) -> Self {
        Self { id, from, to }
    }

    /// Translate `object` by `delta`.
    pub fn translate(object: &DrawableObject, delta: Vec2) -> Self {
        Self::new(object.id, object.geometry.clone(), object.geometry.translated(delta))
    }
}

impl Command for TransformObject {
    fn execute(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        doc.update_object(self.id, &ObjectPatch::default().geometry(self.to.clone()))
    }

    fn undo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        doc.update_object(self.id, &ObjectPatch::default().geometry(self.from.clone()))
    }

    fn label(&self) -> &str {
        "Transform object"
    }
}

/// An ordered group of commands that undo as one step, in reverse.
pub struct Batch {
    label: String,
    commands: Vec<Box<dyn Command>>,
}

impl Batch {
    pub fn new(label: impl Into<String>, commands: Vec<Box<dyn Command>>) -> Self {
        Self {
            label: label.into(),
            commands,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn run_forward(
        &mut self,
        doc: &mut ReplicatedDocument,
        redo: bool,
    ) -> DocumentResult<()> {
        let commands = &mut self.commands;
        doc.transact(|doc| {
            for index in 0..commands.len() {
                let result = if redo {
                    commands[index].redo(doc)
                } else {
                    commands[index].execute(doc)
                };
                if let Err(err) = result {
                    // Unwind what already ran so the batch stays all-or-nothing.
                    for done in commands[..index].iter_mut().rev() {
                        if let Err(undo_err) = done.undo(doc) {
                            log::warn!("failed to unwind '{}': {undo_err}", done.label());
                        }
                    }
                    return Err(err);
                }
            }
            Ok(())
        })
    }
}

impl Command for Batch {
    fn execute(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        self.run_forward(doc, false)
    }

    fn undo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        let commands = &mut self.commands;
        doc.transact(|doc| {
            for command in commands.iter_mut().rev() {
                command.undo(doc)?;
            }
            Ok(())
        })
    }

    fn redo(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<()> {
        self.run_forward(doc, true)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{Layer, ObjectStyle, SerializableColor};
    use kurbo::Point;

    fn square() -> DrawableObject {
        DrawableObject::new(
            Geometry::Rectangle {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
            ObjectStyle::default(),
        )
    }

    #[test]
    fn test_add_bootstraps_default_layer() {
        let mut doc = ReplicatedDocument::new();
        let object = square();
        let mut add = AddObject::new(object.clone(), None);
        add.execute(&mut doc).unwrap();
        assert_eq!(doc.locate(object.id).unwrap().0, DEFAULT_LAYER_ID);

        add.undo(&mut doc).unwrap();
        assert!(!doc.contains_object(object.id));
        assert_eq!(doc.layer_count(), 0, "the bootstrap goes with the object");
        add.redo(&mut doc).unwrap();
        assert_eq!(doc.locate(object.id).unwrap(), (DEFAULT_LAYER_ID.to_string(), 0));
        add.undo(&mut doc).unwrap();
        assert_eq!(doc.layer_count(), 0);
    }

    #[test]
    fn test_add_undo_keeps_bootstrap_layer_in_use() {
        let mut doc = ReplicatedDocument::new();
        let object = square();
        let mut add = AddObject::new(object.clone(), None);
        add.execute(&mut doc).unwrap();
        let neighbour = square();
        doc.add_object(&neighbour, DEFAULT_LAYER_ID, None).unwrap();

        add.undo(&mut doc).unwrap();
        assert_eq!(doc.layer(DEFAULT_LAYER_ID).unwrap().objects, vec![neighbour.id]);
    }

    #[test]
    fn test_add_into_existing_layer_never_drops_it() {
        let mut doc = ReplicatedDocument::new();
        doc.ensure_default_layer().unwrap();
        let mut add = AddObject::new(square(), None);
        add.execute(&mut doc).unwrap();
        add.undo(&mut doc).unwrap();
        assert_eq!(doc.layer_count(), 1);
    }

    #[test]
    fn test_add_skips_locked_preferred_layer() {
        let mut doc = ReplicatedDocument::new();
        let mut locked = Layer::new("locked", "Locked");
        locked.locked = true;
        doc.push_layer(&locked).unwrap();
        doc.push_layer(&Layer::new("open", "Open")).unwrap();

        let object = square();
        AddObject::new(object.clone(), Some("locked".into()))
            .execute(&mut doc)
            .unwrap();
        assert_eq!(doc.locate(object.id).unwrap().0, "open");
    }

    #[test]
    fn test_remove_undo_restores_position() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        let objects: Vec<_> = (0..3).map(|_| square()).collect();
        for object in &objects {
            doc.add_object(object, "a", None).unwrap();
        }
        let mut remove = RemoveObject::new(objects[1].id);
        remove.execute(&mut doc).unwrap();
        assert_eq!(doc.layer("a").unwrap().objects.len(), 2);

        remove.undo(&mut doc).unwrap();
        let members = doc.layer("a").unwrap().objects;
        assert_eq!(members, objects.iter().map(|o| o.id).collect::<Vec<_>>());
        assert_eq!(doc.object(objects[1].id).unwrap().geometry, objects[1].geometry);
    }

    #[test]
    fn test_modify_restores_only_touched_fields() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        let object = square();
        doc.add_object(&object, "a", None).unwrap();

        let red = SerializableColor::new(255, 0, 0, 255);
        let mut modify = ModifyObject::new(object.id, ObjectPatch::default().color(red));
        modify.execute(&mut doc).unwrap();
        // A concurrent edit to another field.
        doc.update_object(object.id, &ObjectPatch::default().stroke_width(9.0))
            .unwrap();

        modify.undo(&mut doc).unwrap();
        let restored = doc.object(object.id).unwrap();
        assert_eq!(restored.style.color, SerializableColor::black());
        assert!((restored.style.stroke_width - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_transform_swaps_geometry() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        let object = square();
        doc.add_object(&object, "a", None).unwrap();

        let mut transform = TransformObject::translate(&object, Vec2::new(5.0, -5.0));
        transform.execute(&mut doc).unwrap();
        assert_eq!(
            doc.object(object.id).unwrap().geometry.points()[0],
            Point::new(5.0, -5.0)
        );
        transform.undo(&mut doc).unwrap();
        assert_eq!(doc.object(object.id).unwrap().geometry, object.geometry);
    }

    #[test]
    fn test_batch_is_one_change_and_undoes_in_reverse() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        let object = square();
        let mut batch = Batch::new(
            "Add and move",
            vec![
                Box::new(AddObject::new(object.clone(), Some("a".into()))),
                Box::new(TransformObject::translate(&object, Vec2::new(1.0, 1.0))),
            ],
        );
        doc.take_changes();
        batch.execute(&mut doc).unwrap();
        assert_eq!(doc.take_changes().len(), 1);

        batch.undo(&mut doc).unwrap();
        assert!(!doc.contains_object(object.id));
        assert!(doc.layer("a").unwrap().objects.is_empty());
    }

    #[test]
    fn test_failed_batch_unwinds() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        let object = square();
        let mut batch = Batch::new(
            "Broken",
            vec![
                Box::new(AddObject::new(object.clone(), Some("a".into()))),
                Box::new(RemoveObject::new(uuid::Uuid::new_v4())),
            ],
        );
        assert!(batch.execute(&mut doc).is_err());
        assert!(!doc.contains_object(object.id));
    }
}

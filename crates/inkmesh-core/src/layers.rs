//! Layer CRUD, ordering and per-layer object membership.

use std::collections::HashSet;

use uuid::Uuid;

use crate::crdt::{DocumentError, DocumentResult, ReplicatedDocument};
use crate::shapes::{Layer, LayerId, ObjectId};

/// Initial properties for a new layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerOptions {
    pub visible: bool,
    pub locked: bool,
    pub opacity: f64,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            visible: true,
            locked: false,
            opacity: 1.0,
        }
    }
}

/// Layer operations over a borrowed document. Every operation is one
/// transaction.
pub struct LayerManager<'a> {
    doc: &'a mut ReplicatedDocument,
}

impl<'a> LayerManager<'a> {
    pub fn new(doc: &'a mut ReplicatedDocument) -> Self {
        Self { doc }
    }

    /// Layers back to front.
    pub fn layers(&self) -> Vec<Layer> {
        self.doc.layers()
    }

    pub fn layer(&self, id: &str) -> Option<Layer> {
        self.doc.layer(id)
    }

    fn require(&self, id: &str) -> DocumentResult<Layer> {
        self.doc
            .layer(id)
            .ok_or_else(|| DocumentError::LayerNotFound(id.to_string()))
    }

    /// Append a new, empty layer with a fresh id.
    pub fn create(&mut self, name: &str, options: LayerOptions) -> DocumentResult<LayerId> {
        let id = Uuid::new_v4().to_string();
        self.create_with_id(&id, name, options)?;
        Ok(id)
    }

    /// Append a new, empty layer with a caller-chosen id.
    pub fn create_with_id(
        &mut self,
        id: &str,
        name: &str,
        options: LayerOptions,
    ) -> DocumentResult<()> {
        let mut layer = Layer::new(id, name);
        layer.visible = options.visible;
        layer.locked = options.locked;
        layer.opacity = options.opacity.clamp(0.0, 1.0);
        self.doc.push_layer(&layer)
    }

    /// Remove a layer entry. Objects it listed become orphans; callers that
    /// want to keep them should [`merge_layer_into`](Self::merge_layer_into).
    pub fn delete(&mut self, id: &str) -> DocumentResult<()> {
        self.doc.delete_layer(id)
    }

    pub fn set_visible(&mut self, id: &str, visible: bool) -> DocumentResult<()> {
        if self.require(id)?.visible == visible {
            return Ok(());
        }
        self.doc.set_layer_visible(id, visible)
    }

    pub fn set_locked(&mut self, id: &str, locked: bool) -> DocumentResult<()> {
        if self.require(id)?.locked == locked {
            return Ok(());
        }
        self.doc.set_layer_locked(id, locked)
    }

    pub fn set_opacity(&mut self, id: &str, opacity: f64) -> DocumentResult<()> {
        let opacity = opacity.clamp(0.0, 1.0);
        if (self.require(id)?.opacity - opacity).abs() < f64::EPSILON {
            return Ok(());
        }
        self.doc.set_layer_opacity(id, opacity)
    }

    pub fn rename(&mut self, id: &str, name: &str) -> DocumentResult<()> {
        if self.require(id)?.name == name {
            return Ok(());
        }
        self.doc.set_layer_name(id, name)
    }

    /// Reorder layers to `ordered`. Returns false without mutating unless
    /// `ordered` holds exactly the current layer ids, each once.
    pub fn reorder(&mut self, ordered: &[LayerId]) -> DocumentResult<bool> {
        let current: Vec<LayerId> = self.layers().into_iter().map(|layer| layer.id).collect();
        let wanted: HashSet<&LayerId> = ordered.iter().collect();
        let have: HashSet<&LayerId> = current.iter().collect();
        if wanted.len() != ordered.len() || current.len() != ordered.len() || wanted != have {
            log::warn!("rejecting layer reorder: ids do not match the current layer set");
            return Ok(false);
        }
        if current.as_slice() == ordered {
            return Ok(true);
        }
        self.doc.transact(|doc| {
            for (target, id) in ordered.iter().enumerate() {
                let position = doc
                    .layer_position(id)
                    .ok_or_else(|| DocumentError::LayerNotFound(id.clone()))?;
                doc.move_layer(position, target)?;
            }
            Ok(())
        })?;
        Ok(true)
    }

    /// Move an object within its layer to `index`, clamped to the list.
    /// Returns false when the layer does not list the object.
    pub fn move_object_in_layer(
        &mut self,
        layer_id: &str,
        object: ObjectId,
        index: usize,
    ) -> DocumentResult<bool> {
        self.require(layer_id)?;
        self.doc.move_member(layer_id, object, index)
    }

    pub fn bring_to_front(&mut self, layer_id: &str, object: ObjectId) -> DocumentResult<bool> {
        self.move_object_in_layer(layer_id, object, usize::MAX)
    }

    pub fn send_to_back(&mut self, layer_id: &str, object: ObjectId) -> DocumentResult<bool> {
        self.move_object_in_layer(layer_id, object, 0)
    }

    /// Move an object from one layer to another at `position` (`None`
    /// appends). Returns false when the source does not list the object.
    pub fn move_object_to_layer(
        &mut self,
        object: ObjectId,
        from: &str,
        to: &str,
        position: Option<usize>,
    ) -> DocumentResult<bool> {
        if !self.require(from)?.contains(object) {
            return Ok(false);
        }
        self.require(to)?;
        if from == to {
            return Ok(true);
        }
        self.doc.transact(|doc| {
            doc.remove_member(from, object)?;
            doc.insert_member(to, position, object)
        })?;
        Ok(true)
    }

    /// Append `source`'s objects to `target` (skipping ones it already
    /// lists), then delete `source`.
    pub fn merge_layer_into(&mut self, source: &str, target: &str) -> DocumentResult<bool> {
        if source == target {
            return Ok(false);
        }
        let from = self.require(source)?;
        let into = self.require(target)?;
        let known: HashSet<ObjectId> = into.objects.iter().copied().collect();
        self.doc.transact(|doc| {
            for object in from.objects.iter().filter(|id| !known.contains(*id)) {
                doc.insert_member(target, None, *object)?;
            }
            doc.delete_layer(source)
        })?;
        Ok(true)
    }

    /// Create the canonical default layer unless it already exists.
    pub fn ensure_default_layer(&mut self) -> DocumentResult<bool> {
        self.doc.ensure_default_layer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{DrawableObject, Geometry, ObjectStyle};
    use kurbo::Point;

    fn dot() -> DrawableObject {
        DrawableObject::new(
            Geometry::Circle {
                center: Point::new(0.0, 0.0),
                radius: 1.0,
            },
            ObjectStyle::default(),
        )
    }

    fn ids(layers: &[Layer]) -> Vec<&str> {
        layers.iter().map(|layer| layer.id.as_str()).collect()
    }

    #[test]
    fn test_create_and_point_updates() {
        let mut doc = ReplicatedDocument::new();
        let mut layers = LayerManager::new(&mut doc);
        let id = layers.create("Ink", LayerOptions::default()).unwrap();
        layers.set_visible(&id, false).unwrap();
        layers.set_locked(&id, true).unwrap();
        layers.set_opacity(&id, 3.0).unwrap();
        layers.rename(&id, "Sketch").unwrap();

        let layer = layers.layer(&id).unwrap();
        assert!(!layer.visible && layer.locked);
        assert!((layer.opacity - 1.0).abs() < f64::EPSILON);
        assert_eq!(layer.name, "Sketch");
        assert!(layer.objects.is_empty());
    }

    #[test]
    fn test_reorder_requires_exact_id_set() {
        let mut doc = ReplicatedDocument::new();
        let mut layers = LayerManager::new(&mut doc);
        for id in ["a", "b", "c"] {
            layers.create_with_id(id, id, LayerOptions::default()).unwrap();
        }
        assert!(!layers.reorder(&["a".into(), "b".into()]).unwrap());
        assert!(!layers.reorder(&["a".into(), "b".into(), "x".into()]).unwrap());
        assert!(!layers.reorder(&["a".into(), "a".into(), "b".into()]).unwrap());
        assert_eq!(ids(&layers.layers()), vec!["a", "b", "c"]);

        assert!(layers.reorder(&["c".into(), "a".into(), "b".into()]).unwrap());
        assert_eq!(ids(&layers.layers()), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_move_within_layer_clamps() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        let objects: Vec<_> = (0..3).map(|_| dot()).collect();
        for object in &objects {
            doc.add_object(object, "a", None).unwrap();
        }
        let mut layers = LayerManager::new(&mut doc);
        assert!(layers.move_object_in_layer("a", objects[0].id, 99).unwrap());
        assert_eq!(
            layers.layer("a").unwrap().objects,
            vec![objects[1].id, objects[2].id, objects[0].id]
        );
        assert!(layers.send_to_back("a", objects[0].id).unwrap());
        assert_eq!(layers.layer("a").unwrap().objects[0], objects[0].id);
        assert!(layers.bring_to_front("a", objects[1].id).unwrap());
        assert_eq!(layers.layer("a").unwrap().objects[2], objects[1].id);
        assert!(!layers.move_object_in_layer("a", Uuid::new_v4(), 0).unwrap());
    }

    #[test]
    fn test_reorder_skips_unparseable_members() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        let [x, y, z] = [dot(), dot(), dot()];
        for object in [&x, &y, &z] {
            doc.add_object(object, "a", None).unwrap();
        }
        doc.insert_raw_member("a", 0, "junk").unwrap();
        doc.insert_raw_member("a", 2, "").unwrap();

        let mut layers = LayerManager::new(&mut doc);
        assert!(layers.send_to_back("a", z.id).unwrap());
        assert_eq!(layers.layer("a").unwrap().objects, vec![z.id, x.id, y.id]);
        assert!(layers.bring_to_front("a", x.id).unwrap());
        assert_eq!(layers.layer("a").unwrap().objects, vec![z.id, y.id, x.id]);

        let w = dot();
        doc.add_object(&w, "a", Some(1)).unwrap();
        assert_eq!(doc.layer("a").unwrap().objects, vec![z.id, w.id, y.id, x.id]);
        assert_eq!(doc.remove_member("a", y.id).unwrap(), Some(2));
        assert_eq!(doc.member_ids_at(0).len(), 5);
    }

    #[test]
    fn test_move_object_between_layers() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        doc.push_layer(&Layer::new("b", "B")).unwrap();
        let first = dot();
        let second = dot();
        doc.add_object(&first, "a", None).unwrap();
        doc.add_object(&second, "b", None).unwrap();

        let mut layers = LayerManager::new(&mut doc);
        assert!(layers.move_object_to_layer(first.id, "a", "b", Some(0)).unwrap());
        assert!(layers.layer("a").unwrap().objects.is_empty());
        assert_eq!(layers.layer("b").unwrap().objects, vec![first.id, second.id]);
        assert!(!layers.move_object_to_layer(first.id, "a", "b", None).unwrap());
    }

    #[test]
    fn test_merge_dedupes_and_deletes_source() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        doc.push_layer(&Layer::new("b", "B")).unwrap();
        let shared = dot();
        let only_a = dot();
        doc.add_object(&shared, "b", None).unwrap();
        doc.add_object(&only_a, "a", None).unwrap();
        doc.insert_member("a", None, shared.id).unwrap();

        let mut layers = LayerManager::new(&mut doc);
        assert!(layers.merge_layer_into("a", "b").unwrap());
        let remaining = layers.layers();
        assert_eq!(ids(&remaining), vec!["b"]);
        assert_eq!(remaining[0].objects, vec![shared.id, only_a.id]);
        assert!(!layers.merge_layer_into("b", "b").unwrap());
    }
}

//! Render-ready scene materialized from the replicated document, with
//! structural self-healing.

use std::collections::{HashMap, HashSet};

use kurbo::{Point, Rect};

use crate::crdt::{DocumentResult, DocumentSnapshot, ReplicatedDocument};
use crate::shapes::{
    DEFAULT_ARROW_HEAD_LENGTH, DrawableObject, Layer, LayerId, ObjectId, hit_test,
    rects_intersect,
};

/// A consistent, render-ready view of the document.
#[derive(Debug, Clone)]
pub struct Scene {
    objects: HashMap<ObjectId, DrawableObject>,
    draw_order: Vec<ObjectId>,
    layers: Vec<Layer>,
    arrow_head_length: f64,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            draw_order: Vec::new(),
            layers: Vec::new(),
            arrow_head_length: DEFAULT_ARROW_HEAD_LENGTH,
        }
    }
}

impl Scene {
    pub fn object(&self, id: ObjectId) -> Option<&DrawableObject> {
        self.objects.get(&id)
    }

    /// Object ids back to front.
    pub fn draw_order(&self) -> &[ObjectId] {
        &self.draw_order
    }

    /// Layers back to front.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    /// Barb length used for arrow bounds, hit tests and paths.
    pub fn arrow_head_length(&self) -> f64 {
        self.arrow_head_length
    }

    /// Objects back to front.
    pub fn ordered(&self) -> impl DoubleEndedIterator<Item = &DrawableObject> {
        self.draw_order.iter().filter_map(|id| self.objects.get(id))
    }

    pub fn len(&self) -> usize {
        self.draw_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draw_order.is_empty()
    }

    /// Whether pointer tools may pick this object: it and its layer are
    /// visible and unlocked.
    pub fn is_interactive(&self, object: &DrawableObject) -> bool {
        if !object.visible || object.locked {
            return false;
        }
        self.layer(&object.layer_id)
            .is_some_and(|layer| layer.visible && !layer.locked)
    }

    /// Topmost interactive object under `point`.
    pub fn topmost_at(&self, point: Point, tolerance: f64) -> Option<ObjectId> {
        self.ordered()
            .rev()
            .find(|object| {
                self.is_interactive(object)
                    && hit_test(object, point, tolerance, self.arrow_head_length)
            })
            .map(|object| object.id)
    }

    /// Interactive objects whose bounds overlap `rect`, back to front.
    pub fn objects_in_rect(&self, rect: Rect) -> Vec<ObjectId> {
        let rect = rect.abs();
        self.ordered()
            .filter(|object| self.is_interactive(object) && rects_intersect(object.bounds, rect))
            .map(|object| object.id)
            .collect()
    }

    /// Build a scene from a snapshot. Duplicate listings keep their first
    /// occurrence; dangling and malformed entries are skipped. Bounds are
    /// re-derived with the scene's arrow head length.
    fn from_snapshot(snapshot: DocumentSnapshot, arrow_head_length: f64) -> Self {
        let DocumentSnapshot {
            mut objects,
            layers,
            ..
        } = snapshot;
        let mut seen = HashSet::new();
        let mut draw_order = Vec::new();
        let mut placed = HashMap::new();
        for layer in &layers {
            for id in &layer.objects {
                if !seen.insert(*id) {
                    continue;
                }
                let Some(mut object) = objects.remove(id) else {
                    continue;
                };
                if !object.refresh_bounds(arrow_head_length) {
                    log::warn!("skipping malformed {} {}", object.kind().as_str(), id);
                    continue;
                }
                object.layer_id = layer.id.clone();
                object.z_index = draw_order.len();
                draw_order.push(*id);
                placed.insert(*id, object);
            }
        }
        Self {
            objects: placed,
            draw_order,
            layers,
            arrow_head_length,
        }
    }
}

/// What a single resync pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The document was consistent and the scene was published.
    Published,
    /// A repair transaction was issued and the pass aborted.
    Repaired(Repair),
}

/// Structural repairs, in the order a pass checks for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// Layer sequence entries that were not layers were dropped.
    DroppedMalformedLayers(usize),
    /// Layer entries sharing an id were merged into the first.
    MergedDuplicateLayers(usize),
    /// Unparseable, dangling or repeated membership entries were removed.
    PrunedMemberships(usize),
    /// Objects listed in no layer were appended to the first layer.
    RescuedOrphans(usize),
}

/// Keeps the published [`Scene`] in step with a [`ReplicatedDocument`].
pub struct SceneManager {
    scene: Scene,
    active_layer: Option<LayerId>,
    max_passes: usize,
    generation: u64,
    arrow_head_length: f64,
}

impl SceneManager {
    pub fn new(max_passes: usize) -> Self {
        Self {
            scene: Scene::default(),
            active_layer: None,
            max_passes: max_passes.max(1),
            generation: 0,
            arrow_head_length: DEFAULT_ARROW_HEAD_LENGTH,
        }
    }

    /// Arrow barb length applied to every published scene. Takes effect on
    /// the next publish.
    pub fn with_arrow_head_length(mut self, length: f64) -> Self {
        self.arrow_head_length = length;
        self
    }

    /// The latest published scene.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Incremented every time a scene is published.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_layer(&self) -> Option<&str> {
        self.active_layer.as_deref()
    }

    /// Select the active layer. Fails if the published scene lacks it.
    pub fn set_active_layer(&mut self, id: &str) -> bool {
        if self.scene.layer(id).is_none() {
            return false;
        }
        self.active_layer = Some(id.to_string());
        true
    }

    /// Run one pass: repair the first structural problem found and abort,
    /// or publish.
    pub fn resync(&mut self, doc: &mut ReplicatedDocument) -> DocumentResult<PassOutcome> {
        let mut snapshot = doc.snapshot();

        if !snapshot.malformed_layers.is_empty() {
            let positions = snapshot.malformed_layers.clone();
            log::warn!("dropping {} malformed layer entries", positions.len());
            doc.transact(|doc| {
                for position in positions.iter().rev() {
                    doc.delete_layer_at(*position)?;
                }
                Ok(())
            })?;
            return Ok(PassOutcome::Repaired(Repair::DroppedMalformedLayers(positions.len())));
        }

        if snapshot.layers.is_empty() && !snapshot.object_ids.is_empty() {
            log::warn!(
                "{} objects exist without any layer, creating a rescue layer",
                snapshot.object_ids.len()
            );
            doc.ensure_default_layer()?;
            snapshot = doc.snapshot();
        }

        if let Some(merged) = Self::merge_duplicate_layers(doc, &snapshot)? {
            return Ok(PassOutcome::Repaired(merged));
        }
        if let Some(pruned) = Self::prune_memberships(doc, &snapshot)? {
            return Ok(PassOutcome::Repaired(pruned));
        }
        if let Some(rescued) = Self::rescue_orphans(doc, &snapshot)? {
            return Ok(PassOutcome::Repaired(rescued));
        }

        self.publish(snapshot);
        Ok(PassOutcome::Published)
    }

    fn merge_duplicate_layers(
        doc: &mut ReplicatedDocument,
        snapshot: &DocumentSnapshot,
    ) -> DocumentResult<Option<Repair>> {
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut duplicates = Vec::new();
        for (position, layer) in snapshot.layers.iter().enumerate() {
            match first_seen.get(layer.id.as_str()) {
                Some(first) => duplicates.push((*first, position)),
                None => {
                    first_seen.insert(layer.id.as_str(), position);
                }
            }
        }
        if duplicates.is_empty() {
            return Ok(None);
        }
        log::warn!("merging {} duplicate layer entries", duplicates.len());

        let mut members: HashMap<usize, HashSet<ObjectId>> = HashMap::new();
        doc.transact(|doc| {
            for (first, duplicate) in &duplicates {
                let known = members
                    .entry(*first)
                    .or_insert_with(|| snapshot.layers[*first].objects.iter().copied().collect());
                let moved: Vec<ObjectId> = snapshot.layers[*duplicate]
                    .objects
                    .iter()
                    .copied()
                    .filter(|id| known.insert(*id))
                    .collect();
                doc.append_members_at(*first, &moved)?;
            }
            for (_, duplicate) in duplicates.iter().rev() {
                doc.delete_layer_at(*duplicate)?;
            }
            Ok(())
        })?;
        Ok(Some(Repair::MergedDuplicateLayers(duplicates.len())))
    }

    fn prune_memberships(
        doc: &mut ReplicatedDocument,
        snapshot: &DocumentSnapshot,
    ) -> DocumentResult<Option<Repair>> {
        let mut seen = HashSet::new();
        let mut doomed: Vec<(usize, Vec<usize>)> = Vec::new();
        // Indices address the raw sequence, which may hold entries that
        // never decoded into `layer.objects`.
        for position in 0..snapshot.layers.len() {
            let indices: Vec<usize> = doc
                .member_ids_at(position)
                .iter()
                .enumerate()
                .filter(|(_, entry)| match entry.parse::<ObjectId>() {
                    Ok(id) => !snapshot.object_ids.contains(&id) || !seen.insert(id),
                    Err(_) => true,
                })
                .map(|(index, _)| index)
                .collect();
            if !indices.is_empty() {
                doomed.push((position, indices));
            }
        }
        if doomed.is_empty() {
            return Ok(None);
        }
        let count = doomed.iter().map(|(_, indices)| indices.len()).sum();
        log::warn!("pruning {count} invalid, dangling or repeated layer memberships");
        doc.transact(|doc| {
            for (position, indices) in &doomed {
                doc.remove_members_at(*position, indices)?;
            }
            Ok(())
        })?;
        Ok(Some(Repair::PrunedMemberships(count)))
    }

    fn rescue_orphans(
        doc: &mut ReplicatedDocument,
        snapshot: &DocumentSnapshot,
    ) -> DocumentResult<Option<Repair>> {
        if snapshot.layers.is_empty() {
            return Ok(None);
        }
        let listed: HashSet<ObjectId> = snapshot
            .layers
            .iter()
            .flat_map(|layer| layer.objects.iter().copied())
            .collect();
        let mut orphans: Vec<ObjectId> = snapshot
            .object_ids
            .iter()
            .copied()
            .filter(|id| !listed.contains(id))
            .collect();
        if orphans.is_empty() {
            return Ok(None);
        }
        // Stable order so replicas rescuing concurrently append identically.
        orphans.sort();
        log::warn!(
            "rescuing {} orphaned objects into layer {}",
            orphans.len(),
            snapshot.layers[0].id
        );
        doc.transact(|doc| doc.append_members_at(0, &orphans))?;
        Ok(Some(Repair::RescuedOrphans(orphans.len())))
    }

    fn publish(&mut self, snapshot: DocumentSnapshot) {
        self.scene = Scene::from_snapshot(snapshot, self.arrow_head_length);
        self.generation += 1;
        let active_exists = self
            .active_layer
            .as_deref()
            .is_some_and(|id| self.scene.layer(id).is_some());
        if !active_exists {
            self.active_layer = self.scene.layers.first().map(|layer| layer.id.clone());
        }
        log::debug!(
            "published scene #{}: {} objects in {} layers",
            self.generation,
            self.scene.len(),
            self.scene.layers.len()
        );
    }

    /// Drain the document's change queue, running a pass per batch until a
    /// pass publishes without repairing. Returns the number of passes run.
    pub fn process_changes(&mut self, doc: &mut ReplicatedDocument) -> usize {
        let mut passes = 0;
        while doc.has_pending_changes() {
            doc.take_changes();
            if passes == self.max_passes {
                log::warn!("scene repair did not settle after {passes} passes, publishing as is");
                self.publish(doc.snapshot());
                break;
            }
            passes += 1;
            if let Err(err) = self.resync(doc) {
                log::warn!("scene repair failed: {err}");
                doc.take_changes();
                self.publish(doc.snapshot());
                break;
            }
        }
        passes
    }

    /// Force a pass even without queued changes, then drain.
    pub fn refresh(&mut self, doc: &mut ReplicatedDocument) -> usize {
        doc.take_changes();
        if let Err(err) = self.resync(doc) {
            log::warn!("scene repair failed: {err}");
            doc.take_changes();
            self.publish(doc.snapshot());
            return 1;
        }
        1 + self.process_changes(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::DEFAULT_LAYER_ID;
    use crate::shapes::{Geometry, ObjectStyle};

    fn rect(x: f64, y: f64, w: f64, h: f64) -> DrawableObject {
        DrawableObject::new(
            Geometry::Rectangle {
                x,
                y,
                width: w,
                height: h,
            },
            ObjectStyle {
                stroke_width: 0.0,
                ..ObjectStyle::default()
            },
        )
    }

    fn insert_orphan(doc: &mut ReplicatedDocument, object: &DrawableObject) {
        // Insert into a throwaway layer, then drop the membership.
        doc.push_layer(&Layer::new("tmp", "tmp")).unwrap();
        doc.add_object(object, "tmp", None).unwrap();
        doc.delete_layer("tmp").unwrap();
    }

    #[test]
    fn test_layerless_objects_converge_to_one_layer() {
        let mut doc = ReplicatedDocument::new();
        let objects: Vec<_> = (0..3).map(|i| rect(i as f64 * 20.0, 0.0, 10.0, 10.0)).collect();
        for object in &objects {
            insert_orphan(&mut doc, object);
        }
        let mut manager = SceneManager::new(8);
        manager.refresh(&mut doc);

        let layers = doc.layers();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].id, DEFAULT_LAYER_ID);
        assert_eq!(layers[0].objects.len(), 3);
        assert_eq!(manager.scene().len(), 3);
        assert_eq!(manager.active_layer(), Some(DEFAULT_LAYER_ID));

        // Stable: another pass publishes without repairing.
        assert_eq!(manager.resync(&mut doc).unwrap(), PassOutcome::Published);
        assert!(!doc.has_pending_changes());
    }

    #[test]
    fn test_orphans_go_to_first_layer() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("back", "Back")).unwrap();
        doc.push_layer(&Layer::new("front", "Front")).unwrap();
        let orphan = rect(0.0, 0.0, 5.0, 5.0);
        insert_orphan(&mut doc, &orphan);

        let mut manager = SceneManager::new(8);
        doc.take_changes();
        assert_eq!(
            manager.resync(&mut doc).unwrap(),
            PassOutcome::Repaired(Repair::RescuedOrphans(1))
        );
        manager.process_changes(&mut doc);
        assert_eq!(doc.layer("back").unwrap().objects, vec![orphan.id]);
        assert_eq!(manager.scene().object(orphan.id).unwrap().layer_id, "back");
    }

    #[test]
    fn test_duplicate_default_layers_merge() {
        let mut a = ReplicatedDocument::new();
        let mut b = ReplicatedDocument::new();
        a.ensure_default_layer().unwrap();
        b.ensure_default_layer().unwrap();
        let from_a = rect(0.0, 0.0, 5.0, 5.0);
        let from_b = rect(10.0, 0.0, 5.0, 5.0);
        a.add_object(&from_a, DEFAULT_LAYER_ID, None).unwrap();
        b.add_object(&from_b, DEFAULT_LAYER_ID, None).unwrap();
        a.import(&b.export_snapshot().unwrap()).unwrap();
        assert_eq!(a.layer_count(), 2);

        let mut manager = SceneManager::new(8);
        manager.process_changes(&mut a);
        let layers = a.layers();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].objects.len(), 2);
        assert_eq!(manager.scene().len(), 2);
    }

    #[test]
    fn test_dangling_and_repeated_members_pruned() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("a", "A")).unwrap();
        doc.push_layer(&Layer::new("b", "B")).unwrap();
        let object = rect(0.0, 0.0, 5.0, 5.0);
        doc.add_object(&object, "a", None).unwrap();
        doc.insert_member("b", None, object.id).unwrap();
        doc.insert_member("b", None, uuid::Uuid::new_v4()).unwrap();

        let mut manager = SceneManager::new(8);
        manager.process_changes(&mut doc);
        assert_eq!(doc.layer("a").unwrap().objects, vec![object.id]);
        assert!(doc.layer("b").unwrap().objects.is_empty());
    }

    #[test]
    fn test_unparseable_members_pruned_without_reordering() {
        let mut doc = ReplicatedDocument::new();
        doc.push_layer(&Layer::new("l", "L")).unwrap();
        let first = rect(0.0, 0.0, 5.0, 5.0);
        let second = rect(10.0, 0.0, 5.0, 5.0);
        doc.add_object(&first, "l", None).unwrap();
        doc.add_object(&second, "l", None).unwrap();
        doc.insert_member("l", None, uuid::Uuid::new_v4()).unwrap();
        doc.insert_raw_member("l", 0, "junk").unwrap();
        assert_eq!(doc.member_ids_at(0).len(), 4);

        let mut manager = SceneManager::new(8);
        let passes = manager.refresh(&mut doc);
        assert_eq!(
            doc.member_ids_at(0),
            vec![first.id.to_string(), second.id.to_string()]
        );
        assert_eq!(manager.scene().draw_order(), [first.id, second.id]);
        // One repair, then a clean pass.
        assert_eq!(passes, 2);
    }

    #[test]
    fn test_topmost_and_rubber_band() {
        let mut doc = ReplicatedDocument::new();
        doc.ensure_default_layer().unwrap();
        let below = rect(0.0, 0.0, 50.0, 50.0);
        let above = rect(10.0, 10.0, 20.0, 20.0);
        let far = rect(200.0, 200.0, 20.0, 20.0);
        for object in [&below, &above, &far] {
            doc.add_object(object, DEFAULT_LAYER_ID, None).unwrap();
        }
        let mut manager = SceneManager::new(8);
        manager.process_changes(&mut doc);
        let scene = manager.scene();

        assert_eq!(scene.topmost_at(Point::new(15.0, 15.0), 0.0), Some(above.id));
        assert_eq!(scene.topmost_at(Point::new(45.0, 45.0), 0.0), Some(below.id));
        assert_eq!(scene.object(above.id).unwrap().z_index, 1);

        let hits = scene.objects_in_rect(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert!(hits.contains(&above.id) && hits.contains(&below.id));
        assert!(!hits.contains(&far.id));
    }

    #[test]
    fn test_locked_layer_not_interactive() {
        let mut doc = ReplicatedDocument::new();
        doc.ensure_default_layer().unwrap();
        let object = rect(0.0, 0.0, 50.0, 50.0);
        doc.add_object(&object, DEFAULT_LAYER_ID, None).unwrap();
        doc.set_layer_locked(DEFAULT_LAYER_ID, true).unwrap();

        let mut manager = SceneManager::new(8);
        manager.process_changes(&mut doc);
        assert!(manager.scene().topmost_at(Point::new(10.0, 10.0), 0.0).is_none());
    }
}

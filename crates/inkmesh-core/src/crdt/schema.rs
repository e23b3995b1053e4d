//! Loro document schema and primitive operations.

use std::collections::{HashMap, HashSet};

use loro::{
    Container, ExportMode, LoroDoc, LoroMap, LoroMovableList, LoroValue, ValueOrContainer,
    VersionVector,
};
use uuid::Uuid;

use super::convert::{
    self, KEY_MEMBERS, layer_from_loro, layer_to_loro, object_from_loro, object_to_loro,
    patch_to_loro,
};
use super::{DocumentError, DocumentResult};
use crate::shapes::{DrawableObject, Layer, LayerId, ObjectId, ObjectPatch};

/// Key for the object map in the document.
pub const OBJECTS_KEY: &str = "objects";
/// Key for the layer sequence in the document.
pub const LAYERS_KEY: &str = "layers";
/// Canonical id of the bootstrap layer. Every replica uses the same id so
/// concurrent bootstraps can be recognised and merged.
pub const DEFAULT_LAYER_ID: &str = "default";
/// Display name of the bootstrap layer.
pub const DEFAULT_LAYER_NAME: &str = "Layer 1";

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A committed local transaction.
    Local,
    /// Updates imported from another replica.
    Remote,
}

/// One change notification. A transaction produces exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub origin: ChangeOrigin,
    pub version: VersionVector,
}

/// A decoded view of the whole document at one version.
#[derive(Debug, Clone, Default)]
pub struct DocumentSnapshot {
    /// Every id present in the object map, decodable or not.
    pub object_ids: HashSet<ObjectId>,
    /// Objects that decoded successfully.
    pub objects: HashMap<ObjectId, DrawableObject>,
    /// Decoded layers. Positions match the replicated sequence as long as
    /// `malformed_layers` is empty.
    pub layers: Vec<Layer>,
    /// Sequence positions holding entries that are not valid layers.
    pub malformed_layers: Vec<usize>,
}

/// What `remove_object` took out of the document.
#[derive(Debug, Clone)]
pub struct RemovedObject {
    pub object: DrawableObject,
    /// First layer that listed the object, if any.
    pub layer: Option<LayerId>,
    /// Position within that layer.
    pub position: Option<usize>,
}

/// A replicated document: an object map plus an ordered layer sequence.
///
/// Mutations are grouped with [`transact`](Self::transact); each outermost
/// transaction commits once and queues exactly one [`DocumentChange`].
/// Imports queue a remote change. Observers drain the queue with
/// [`take_changes`](Self::take_changes).
pub struct ReplicatedDocument {
    doc: LoroDoc,
    depth: usize,
    committed: VersionVector,
    pending: Vec<DocumentChange>,
}

impl ReplicatedDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        let doc = LoroDoc::new();
        let committed = doc.oplog_vv();
        Self {
            doc,
            depth: 0,
            committed,
            pending: Vec::new(),
        }
    }

    /// Create a document from a snapshot or update blob.
    pub fn from_snapshot(bytes: &[u8]) -> DocumentResult<Self> {
        let mut document = Self::new();
        document.import(bytes)?;
        Ok(document)
    }

    /// The underlying LoroDoc.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    /// Peer id of this replica.
    pub fn peer_id(&self) -> u64 {
        self.doc.peer_id()
    }

    fn objects_map(&self) -> LoroMap {
        self.doc.get_map(OBJECTS_KEY)
    }

    fn layers_list(&self) -> LoroMovableList {
        self.doc.get_movable_list(LAYERS_KEY)
    }

    // --- Transactions and change queue ---

    /// Run `f` as one transaction. Nested calls join the outer transaction.
    ///
    /// Loro has no rollback, so operations applied before an error stay in
    /// the document. The change notification is still queued so observers
    /// can repair whatever state was left behind.
    pub fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> DocumentResult<T>,
    ) -> DocumentResult<T> {
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        if self.depth == 0 {
            self.doc.commit();
            self.record_change(ChangeOrigin::Local);
        }
        result
    }

    fn record_change(&mut self, origin: ChangeOrigin) {
        let version = self.doc.oplog_vv();
        if version != self.committed {
            self.committed = version.clone();
            self.pending.push(DocumentChange { origin, version });
        }
    }

    /// Whether change notifications are waiting to be drained.
    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain queued change notifications.
    pub fn take_changes(&mut self) -> Vec<DocumentChange> {
        std::mem::take(&mut self.pending)
    }

    // --- Reads ---

    /// Decode the whole document.
    pub fn snapshot(&self) -> DocumentSnapshot {
        let mut snapshot = DocumentSnapshot::default();

        if let LoroValue::Map(objects) = self.objects_map().get_deep_value() {
            for (key, value) in objects.iter() {
                let Ok(id) = Uuid::parse_str(key) else {
                    log::warn!("ignoring object entry with invalid id {key:?}");
                    continue;
                };
                snapshot.object_ids.insert(id);
                match value {
                    LoroValue::Map(map) => match object_from_loro(map) {
                        Some(object) => {
                            snapshot.objects.insert(id, object);
                        }
                        None => log::warn!("skipping malformed object {id}"),
                    },
                    _ => log::warn!("skipping non-map object entry {id}"),
                }
            }
        }

        if let LoroValue::List(layers) = self.layers_list().get_deep_value() {
            for (position, value) in layers.iter().enumerate() {
                match value {
                    LoroValue::Map(map) => match layer_from_loro(map) {
                        Some(layer) => snapshot.layers.push(layer),
                        None => snapshot.malformed_layers.push(position),
                    },
                    _ => snapshot.malformed_layers.push(position),
                }
            }
        }

        snapshot
    }

    /// Decode one object. Its `layer_id` is left empty.
    pub fn object(&self, id: ObjectId) -> Option<DrawableObject> {
        match self.objects_map().get(&id.to_string())? {
            ValueOrContainer::Container(Container::Map(map)) => match map.get_deep_value() {
                LoroValue::Map(value) => object_from_loro(&value),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether an entry with this id exists in the object map.
    pub fn contains_object(&self, id: ObjectId) -> bool {
        self.objects_map().get(&id.to_string()).is_some()
    }

    /// Number of entries in the object map.
    pub fn object_count(&self) -> usize {
        self.objects_map().len()
    }

    /// Decoded layers in back-to-front order.
    pub fn layers(&self) -> Vec<Layer> {
        self.snapshot_layers()
    }

    fn snapshot_layers(&self) -> Vec<Layer> {
        match self.layers_list().get_deep_value() {
            LoroValue::List(layers) => layers
                .iter()
                .filter_map(|value| match value {
                    LoroValue::Map(map) => layer_from_loro(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// First layer with this id.
    pub fn layer(&self, id: &str) -> Option<Layer> {
        self.snapshot_layers().into_iter().find(|layer| layer.id == id)
    }

    /// Sequence position of the first layer with this id.
    pub fn layer_position(&self, id: &str) -> Option<usize> {
        let LoroValue::List(layers) = self.layers_list().get_deep_value() else {
            return None;
        };
        layers.iter().position(|value| match value {
            LoroValue::Map(map) => {
                matches!(map.get("id"), Some(LoroValue::String(s)) if s.as_ref() == id)
            }
            _ => false,
        })
    }

    /// Number of entries in the layer sequence.
    pub fn layer_count(&self) -> usize {
        self.layers_list().len()
    }

    /// The first layer listing `id`, and the position within it.
    pub fn locate(&self, id: ObjectId) -> Option<(LayerId, usize)> {
        self.snapshot_layers().into_iter().find_map(|layer| {
            let position = layer.objects.iter().position(|member| *member == id)?;
            Some((layer.id, position))
        })
    }

    fn layer_map_at(&self, position: usize) -> Option<LoroMap> {
        match self.layers_list().get(position)? {
            ValueOrContainer::Container(Container::Map(map)) => Some(map),
            _ => None,
        }
    }

    fn members_at(&self, position: usize) -> Option<LoroMovableList> {
        match self.layer_map_at(position)?.get(KEY_MEMBERS)? {
            ValueOrContainer::Container(Container::MovableList(list)) => Some(list),
            _ => None,
        }
    }

    fn layer_map(&self, id: &str) -> DocumentResult<(usize, LoroMap)> {
        let position = self
            .layer_position(id)
            .ok_or_else(|| DocumentError::LayerNotFound(id.to_string()))?;
        let map = self
            .layer_map_at(position)
            .ok_or_else(|| DocumentError::LayerNotFound(id.to_string()))?;
        Ok((position, map))
    }

    fn members(&self, id: &str) -> DocumentResult<LoroMovableList> {
        let (position, map) = self.layer_map(id)?;
        if let Some(list) = self.members_at(position) {
            return Ok(list);
        }
        // Entries written without a membership sequence get one on first use.
        Ok(map.insert_container(KEY_MEMBERS, LoroMovableList::new())?)
    }

    fn member_ids(list: &LoroMovableList) -> Vec<String> {
        match list.get_deep_value() {
            LoroValue::List(values) => values
                .iter()
                .map(|value| match value {
                    LoroValue::String(s) => s.to_string(),
                    _ => String::new(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Entries that parse as object ids, with their raw sequence index.
    /// Everything else in the sequence is invisible to decoded layers.
    fn valid_members(raw: &[String]) -> Vec<(usize, ObjectId)> {
        raw.iter()
            .enumerate()
            .filter_map(|(slot, entry)| Some((slot, Uuid::parse_str(entry).ok()?)))
            .collect()
    }

    /// Raw sequence of the layer at `layer_position`, unparseable entries
    /// included.
    pub(crate) fn member_ids_at(&self, layer_position: usize) -> Vec<String> {
        self.members_at(layer_position)
            .map(|list| Self::member_ids(&list))
            .unwrap_or_default()
    }

    // --- Object entries ---

    /// Insert an object entry and list it in `layer_id` at `position`
    /// (clamped; `None` appends), as one transaction.
    pub fn add_object(
        &mut self,
        object: &DrawableObject,
        layer_id: &str,
        position: Option<usize>,
    ) -> DocumentResult<()> {
        if self.layer_position(layer_id).is_none() {
            return Err(DocumentError::LayerNotFound(layer_id.to_string()));
        }
        if self.contains_object(object.id) {
            return Err(DocumentError::ObjectExists(object.id));
        }
        self.transact(|doc| {
            let map = doc
                .objects_map()
                .insert_container(&object.id.to_string(), LoroMap::new())?;
            object_to_loro(object, &map)?;
            doc.insert_member(layer_id, position, object.id)
        })
    }

    /// Remove an object entry and every membership that lists it.
    pub fn remove_object(&mut self, id: ObjectId) -> DocumentResult<RemovedObject> {
        let object = self.object(id).ok_or(DocumentError::ObjectNotFound(id))?;
        let location = self.locate(id);
        self.transact(|doc| {
            doc.objects_map().delete(&id.to_string())?;
            for position in 0..doc.layer_count() {
                let Some(list) = doc.members_at(position) else {
                    continue;
                };
                let listed = Self::valid_members(&Self::member_ids(&list));
                for (slot, _) in listed.iter().rev().filter(|(_, member)| *member == id) {
                    list.delete(*slot, 1)?;
                }
            }
            Ok(())
        })?;
        let (layer, position) = match location {
            Some((layer, position)) => (Some(layer), Some(position)),
            None => (None, None),
        };
        Ok(RemovedObject {
            object,
            layer,
            position,
        })
    }

    /// Delete a raw object entry without touching memberships.
    pub(crate) fn delete_object_entry(&mut self, id: ObjectId) -> DocumentResult<()> {
        self.transact(|doc| Ok(doc.objects_map().delete(&id.to_string())?))
    }

    /// Apply a partial update to an object's fields.
    pub fn update_object(&mut self, id: ObjectId, patch: &ObjectPatch) -> DocumentResult<()> {
        let map = match self.objects_map().get(&id.to_string()) {
            Some(ValueOrContainer::Container(Container::Map(map))) => map,
            _ => return Err(DocumentError::ObjectNotFound(id)),
        };
        if patch.is_empty() {
            return Ok(());
        }
        self.transact(|_| Ok(patch_to_loro(patch, &map)?))
    }

    // --- Layer entries ---

    /// Append a layer entry.
    pub fn push_layer(&mut self, layer: &Layer) -> DocumentResult<()> {
        let position = self.layer_count();
        self.insert_layer(position, layer)
    }

    /// Insert a layer entry at `position` (clamped).
    pub fn insert_layer(&mut self, position: usize, layer: &Layer) -> DocumentResult<()> {
        self.transact(|doc| {
            let list = doc.layers_list();
            let position = position.min(list.len());
            let map = list.insert_container(position, LoroMap::new())?;
            layer_to_loro(layer, &map)?;
            Ok(())
        })
    }

    /// Delete the first layer entry with this id. Its members are not touched.
    pub fn delete_layer(&mut self, id: &str) -> DocumentResult<()> {
        let (position, _) = self.layer_map(id)?;
        self.delete_layer_at(position)
    }

    /// Delete the layer entry at a sequence position.
    pub(crate) fn delete_layer_at(&mut self, position: usize) -> DocumentResult<()> {
        self.transact(|doc| Ok(doc.layers_list().delete(position, 1)?))
    }

    /// Move a layer entry within the sequence.
    pub fn move_layer(&mut self, from: usize, to: usize) -> DocumentResult<()> {
        if from == to {
            return Ok(());
        }
        self.transact(|doc| Ok(doc.layers_list().mov(from, to)?))
    }

    pub fn set_layer_name(&mut self, id: &str, name: &str) -> DocumentResult<()> {
        let (_, map) = self.layer_map(id)?;
        self.transact(|_| Ok(convert::set_layer_name(&map, name)?))
    }

    pub fn set_layer_visible(&mut self, id: &str, visible: bool) -> DocumentResult<()> {
        let (_, map) = self.layer_map(id)?;
        self.transact(|_| Ok(convert::set_layer_visible(&map, visible)?))
    }

    pub fn set_layer_locked(&mut self, id: &str, locked: bool) -> DocumentResult<()> {
        let (_, map) = self.layer_map(id)?;
        self.transact(|_| Ok(convert::set_layer_locked(&map, locked)?))
    }

    pub fn set_layer_opacity(&mut self, id: &str, opacity: f64) -> DocumentResult<()> {
        let (_, map) = self.layer_map(id)?;
        self.transact(|_| Ok(convert::set_layer_opacity(&map, opacity)?))
    }

    /// Ensure a layer with [`DEFAULT_LAYER_ID`] exists. Returns true when one
    /// was created.
    pub fn ensure_default_layer(&mut self) -> DocumentResult<bool> {
        if self.layer_position(DEFAULT_LAYER_ID).is_some() {
            return Ok(false);
        }
        log::debug!("bootstrapping default layer");
        self.push_layer(&Layer::new(DEFAULT_LAYER_ID, DEFAULT_LAYER_NAME))?;
        Ok(true)
    }

    // --- Layer membership ---

    /// List `object` in a layer before the member currently at `position`.
    /// Positions count decoded members only; `None` or a position past the
    /// end appends.
    pub fn insert_member(
        &mut self,
        layer_id: &str,
        position: Option<usize>,
        object: ObjectId,
    ) -> DocumentResult<()> {
        let list = self.members(layer_id)?;
        let raw = Self::member_ids(&list);
        let slot = position
            .and_then(|index| Self::valid_members(&raw).get(index).map(|(slot, _)| *slot))
            .unwrap_or(raw.len());
        self.transact(|_| Ok(list.insert(slot, object.to_string())?))
    }

    /// Remove the first listing of `object` in a layer. Returns its decoded
    /// position.
    pub fn remove_member(
        &mut self,
        layer_id: &str,
        object: ObjectId,
    ) -> DocumentResult<Option<usize>> {
        let list = self.members(layer_id)?;
        let listed = Self::valid_members(&Self::member_ids(&list));
        let Some((position, (slot, _))) = listed
            .into_iter()
            .enumerate()
            .find(|(_, (_, member))| *member == object)
        else {
            return Ok(None);
        };
        self.transact(|_| Ok(list.delete(slot, 1)?))?;
        Ok(Some(position))
    }

    /// Move `object` to decoded `position` within its layer (clamped to the
    /// last member). Returns false when the layer does not list it.
    pub fn move_member(
        &mut self,
        layer_id: &str,
        object: ObjectId,
        position: usize,
    ) -> DocumentResult<bool> {
        let list = self.members(layer_id)?;
        let listed = Self::valid_members(&Self::member_ids(&list));
        let Some(from) = listed.iter().position(|(_, member)| *member == object) else {
            return Ok(false);
        };
        let to = position.min(listed.len() - 1);
        if from != to {
            let (from, to) = (listed[from].0, listed[to].0);
            self.transact(|_| Ok(list.mov(from, to)?))?;
        }
        Ok(true)
    }

    /// Insert a raw entry into a membership sequence, bypassing id checks.
    #[cfg(test)]
    pub(crate) fn insert_raw_member(
        &mut self,
        layer_id: &str,
        slot: usize,
        entry: &str,
    ) -> DocumentResult<()> {
        let list = self.members(layer_id)?;
        self.transact(|_| Ok(list.insert(slot, entry)?))
    }

    /// Remove membership entries by sequence position of the layer and
    /// index within it. Indices are removed back to front.
    pub(crate) fn remove_members_at(
        &mut self,
        layer_position: usize,
        indices: &[usize],
    ) -> DocumentResult<()> {
        let Some(list) = self.members_at(layer_position) else {
            return Ok(());
        };
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();
        self.transact(|_| {
            for index in indices.into_iter().rev() {
                list.delete(index, 1)?;
            }
            Ok(())
        })
    }

    /// Append members to the layer at a sequence position.
    pub(crate) fn append_members_at(
        &mut self,
        layer_position: usize,
        objects: &[ObjectId],
    ) -> DocumentResult<()> {
        let list = match self.members_at(layer_position) {
            Some(list) => list,
            None => {
                let map = self
                    .layer_map_at(layer_position)
                    .ok_or_else(|| DocumentError::LayerNotFound(format!("#{layer_position}")))?;
                map.insert_container(KEY_MEMBERS, LoroMovableList::new())?
            }
        };
        self.transact(|_| {
            for object in objects {
                list.push(object.to_string())?;
            }
            Ok(())
        })
    }

    // --- Encoding and replication ---

    /// Export the full document state.
    pub fn export_snapshot(&self) -> DocumentResult<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| DocumentError::Encode(e.to_string()))
    }

    /// Export operations not yet contained in `since`.
    pub fn export_updates(&self, since: &VersionVector) -> DocumentResult<Vec<u8>> {
        self.doc
            .export(ExportMode::updates(since))
            .map_err(|e| DocumentError::Encode(e.to_string()))
    }

    /// Import a snapshot or update blob from another replica.
    pub fn import(&mut self, bytes: &[u8]) -> DocumentResult<()> {
        self.doc.import(bytes)?;
        self.record_change(ChangeOrigin::Remote);
        Ok(())
    }

    /// Current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }
}

impl Default for ReplicatedDocument {
    fn default() -> Self {
        Self::new()
    }
}

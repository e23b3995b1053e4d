//! The engine: the one entry point a host talks to.
//!
//! It owns the replicated document, the scene, local history, the active
//! tool and the view. Everything runs on the host's thread: pointer and key
//! callbacks mutate, [`Engine::tick`] pumps replication and repairs, and
//! [`Engine::render`] only reads.

use std::fmt;
use std::str::FromStr;

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::collaboration::CollaborationManager;
use crate::config::EngineConfig;
use crate::crdt::{DocumentError, DocumentResult, ReplicatedDocument};
use crate::history::{
    AddObject, Batch, Command, HistoryManager, ModifyObject, RemoveObject, TransformObject,
};
use crate::input::{EditorAction, KeyEvent, Modifiers, MouseButton, PointerEvent, ShortcutRegistry};
use crate::layers::{LayerManager, LayerOptions};
use crate::render::{PixelSampler, Surface, render_scene};
use crate::scene::{Scene, SceneManager};
use crate::shapes::{DrawableObject, Layer, LayerId, ObjectId, ObjectPatch, SerializableColor};
use crate::sync::{ConnectionState, NativeWebSocket, ReplicationChannel, SyncEvent, SyncResult};
use crate::tools::{
    BrushOptions, BrushPatch, ObjectDraft, PointerSample, Tool, ToolAction, ToolBehavior,
    ToolContext, ToolKind, text_draft,
};

/// Session permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }

    pub fn can_edit(&self) -> bool {
        matches!(self, Role::Editor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// State changes reported to the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ToolChanged(ToolKind),
    BrushChanged(BrushOptions),
    SelectionChanged(Vec<ObjectId>),
    ZoomChanged(f64),
    RoleChanged(Role),
    ActiveLayerChanged(Option<LayerId>),
    /// A new scene was published.
    DocumentChanged { generation: u64 },
    ConnectionChanged(ConnectionState),
    /// The room's initial state has been applied.
    Synchronized,
    PeerJoined(String),
    PeerLeft(String),
}

/// Supplies text for the text tool at a document position.
pub type TextProvider = Box<dyn FnMut(Point) -> Option<String>>;

/// Receives colors sampled by the eyedropper.
pub type ColorCallback = Box<dyn FnMut(SerializableColor)>;

pub struct Engine {
    config: EngineConfig,
    doc: ReplicatedDocument,
    scenes: SceneManager,
    history: HistoryManager,
    tool: Tool,
    brush: BrushOptions,
    selection: Vec<ObjectId>,
    camera: Camera,
    role: Role,
    modifiers: Modifiers,
    collab: CollaborationManager,
    channel: Option<Box<dyn ReplicationChannel>>,
    text_provider: Option<TextProvider>,
    color_callback: Option<ColorCallback>,
    sampler: Option<Box<dyn PixelSampler>>,
    events: Vec<EngineEvent>,
    last_active_layer: Option<LayerId>,
    destroyed: bool,
}

impl Engine {
    /// An offline engine. The default layer is created right away.
    pub fn new(config: EngineConfig) -> Self {
        let mut engine = Self::build(config, ReplicatedDocument::new());
        engine.bootstrap_layers();
        engine.sync_scene();
        engine
    }

    /// An offline engine over a persisted snapshot.
    pub fn from_snapshot(config: EngineConfig, snapshot: &[u8]) -> DocumentResult<Self> {
        let doc = ReplicatedDocument::from_snapshot(snapshot)?;
        let mut engine = Self::build(config, doc);
        engine.bootstrap_layers();
        engine.sync_scene();
        Ok(engine)
    }

    /// An engine joining `room` over `channel`. No layer is created until
    /// the room's state has arrived.
    pub fn with_channel(
        config: EngineConfig,
        channel: Box<dyn ReplicationChannel>,
        room: &str,
    ) -> Self {
        let mut engine = Self::build(config, ReplicatedDocument::new());
        engine.sync_scene();
        engine.connect(channel, room);
        engine
    }

    fn build(config: EngineConfig, doc: ReplicatedDocument) -> Self {
        let brush = BrushOptions {
            polygon_sides: config.polygon_sides,
            ..BrushOptions::default()
        };
        Self {
            scenes: SceneManager::new(config.max_repair_passes)
                .with_arrow_head_length(config.arrow_head_length),
            history: HistoryManager::new(config.history_capacity),
            camera: Camera::with_limits(config.min_zoom, config.max_zoom),
            collab: CollaborationManager::new(doc.peer_id()),
            doc,
            tool: Tool::default(),
            brush,
            selection: Vec::new(),
            role: Role::Editor,
            modifiers: Modifiers::NONE,
            channel: None,
            text_provider: None,
            color_callback: None,
            sampler: None,
            events: Vec::new(),
            last_active_layer: None,
            destroyed: false,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> &ReplicatedDocument {
        &self.doc
    }

    /// The latest published scene.
    pub fn scene(&self) -> &Scene {
        self.scenes.scene()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Drain queued UI notifications.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    // --- Role ---

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        if self.role == role {
            return;
        }
        self.role = role;
        if !role.can_edit() && !self.tool.kind().allowed_for_viewer() {
            self.tool.on_cancel();
        }
        log::info!("role set to {role}");
        self.emit(EngineEvent::RoleChanged(role));
    }

    /// Set the role from an external permission string. Unrecognised
    /// strings fall back to viewer.
    pub fn set_role_str(&mut self, role: &str) {
        let role = role.parse().unwrap_or_else(|err| {
            log::warn!("{err}; treating session as viewer");
            Role::Viewer
        });
        self.set_role(role);
    }

    /// Whether a mutation named `operation` may run. Logs the refusal.
    fn can_mutate(&self, operation: &str) -> bool {
        if self.destroyed {
            log::warn!("ignoring {operation}: engine destroyed");
            return false;
        }
        if !self.role.can_edit() {
            log::warn!("ignoring {operation}: session is view-only");
            return false;
        }
        true
    }

    // --- Tool and brush ---

    pub fn tool_kind(&self) -> ToolKind {
        self.tool.kind()
    }

    pub fn set_tool(&mut self, kind: ToolKind) {
        if self.tool.kind() == kind {
            return;
        }
        self.tool.on_cancel();
        self.tool = Tool::new(kind);
        self.emit(EngineEvent::ToolChanged(kind));
    }

    /// Discard the active tool's uncommitted state.
    pub fn cancel_tool(&mut self) {
        self.tool.on_cancel();
    }

    pub fn is_tool_active(&self) -> bool {
        self.tool.is_active()
    }

    pub fn brush(&self) -> &BrushOptions {
        &self.brush
    }

    pub fn set_brush_options(&mut self, patch: &BrushPatch) {
        if self.brush.apply(patch) {
            self.emit(EngineEvent::BrushChanged(self.brush.clone()));
        }
    }

    pub fn set_text_provider(&mut self, provider: impl FnMut(Point) -> Option<String> + 'static) {
        self.text_provider = Some(Box::new(provider));
    }

    pub fn set_color_callback(&mut self, callback: impl FnMut(SerializableColor) + 'static) {
        self.color_callback = Some(Box::new(callback));
    }

    pub fn set_pixel_sampler(&mut self, sampler: impl PixelSampler + 'static) {
        self.sampler = Some(Box::new(sampler));
    }

    // --- Object API ---

    /// Add an object to the active layer. Returns the committed object, or
    /// `None` when refused or failed.
    pub fn add_object(&mut self, draft: ObjectDraft) -> Option<DrawableObject> {
        if !self.can_mutate("add object") {
            return None;
        }
        let id = self.commit_draft(draft)?;
        self.scene().object(id).cloned()
    }

    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        if !self.can_mutate("remove object") {
            return false;
        }
        self.run(Box::new(RemoveObject::new(id)))
    }

    pub fn update_object(&mut self, id: ObjectId, patch: ObjectPatch) -> bool {
        if !self.can_mutate("update object") {
            return false;
        }
        if patch.is_empty() {
            return true;
        }
        self.run(Box::new(ModifyObject::new(id, patch)))
    }

    pub fn get_object(&self, id: ObjectId) -> Option<&DrawableObject> {
        self.scene().object(id)
    }

    /// Execute a caller-built command through history.
    pub fn execute_command(&mut self, command: Box<dyn Command>) -> bool {
        if !self.can_mutate("execute command") {
            return false;
        }
        self.run(command)
    }

    fn run(&mut self, command: Box<dyn Command>) -> bool {
        let label = command.label().to_string();
        let result = self.history.execute(command, &mut self.doc);
        self.sync_scene();
        match result {
            Ok(()) => true,
            Err(err) => {
                log::warn!("'{label}' failed: {err}");
                false
            }
        }
    }

    fn commit_draft(&mut self, draft: ObjectDraft) -> Option<ObjectId> {
        let object = draft.into_object();
        let id = object.id;
        let layer = self.scenes.active_layer().map(str::to_string);
        self.run(Box::new(AddObject::new(object, layer))).then_some(id)
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_mutate("undo") {
            return false;
        }
        let undone = self.history.undo(&mut self.doc);
        self.sync_scene();
        undone
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_mutate("redo") {
            return false;
        }
        let redone = self.history.redo(&mut self.doc);
        self.sync_scene();
        redone
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // --- Selection ---

    pub fn selection(&self) -> &[ObjectId] {
        &self.selection
    }

    /// Replace the selection. Unknown and repeated ids are dropped.
    pub fn set_selection(&mut self, ids: Vec<ObjectId>) {
        let mut selection = Vec::with_capacity(ids.len());
        for id in ids {
            if self.scene().object(id).is_some() && !selection.contains(&id) {
                selection.push(id);
            }
        }
        if selection != self.selection {
            self.selection = selection;
            self.emit(EngineEvent::SelectionChanged(self.selection.clone()));
        }
    }

    /// Select every object tools may pick.
    pub fn select_all(&mut self) {
        let scene = self.scene();
        let ids = scene
            .ordered()
            .filter(|object| scene.is_interactive(object))
            .map(|object| object.id)
            .collect();
        self.set_selection(ids);
    }

    pub fn clear_selection(&mut self) {
        self.set_selection(Vec::new());
    }

    /// Remove the selection as one undoable step.
    pub fn delete_selection(&mut self) -> bool {
        if self.selection.is_empty() || !self.can_mutate("delete selection") {
            return false;
        }
        let commands: Vec<Box<dyn Command>> = self
            .selection
            .iter()
            .map(|id| Box::new(RemoveObject::new(*id)) as Box<dyn Command>)
            .collect();
        self.run(Box::new(Batch::new("Delete selection", commands)))
    }

    /// Move the selection as one undoable step.
    pub fn translate_selection(&mut self, delta: Vec2) -> bool {
        if self.selection.is_empty() || !self.can_mutate("move selection") {
            return false;
        }
        let scene = self.scenes.scene();
        let commands: Vec<Box<dyn Command>> = self
            .selection
            .iter()
            .filter_map(|id| scene.object(*id))
            .map(|object| Box::new(TransformObject::translate(object, delta)) as Box<dyn Command>)
            .collect();
        if commands.is_empty() {
            return false;
        }
        self.run(Box::new(Batch::new("Move selection", commands)))
    }

    // --- Layers ---

    pub fn layers(&self) -> &[Layer] {
        self.scene().layers()
    }

    pub fn active_layer(&self) -> Option<&str> {
        self.scenes.active_layer()
    }

    pub fn set_active_layer(&mut self, id: &str) -> bool {
        if !self.scenes.set_active_layer(id) {
            return false;
        }
        self.note_active_layer();
        true
    }

    fn layer_op<T>(
        &mut self,
        operation: &str,
        f: impl FnOnce(&mut LayerManager<'_>) -> DocumentResult<T>,
    ) -> Option<T> {
        if !self.can_mutate(operation) {
            return None;
        }
        let result = f(&mut LayerManager::new(&mut self.doc));
        self.sync_scene();
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("{operation} failed: {err}");
                None
            }
        }
    }

    pub fn create_layer(&mut self, name: &str, options: LayerOptions) -> Option<LayerId> {
        self.layer_op("create layer", |layers| layers.create(name, options))
    }

    /// Delete a layer, moving its objects into the layer below it (or above
    /// it for the bottom layer). The last layer cannot be deleted.
    pub fn delete_layer(&mut self, id: &str) -> bool {
        let layers = self.doc.layers();
        let Some(position) = layers.iter().position(|layer| layer.id == id) else {
            log::warn!("cannot delete unknown layer '{id}'");
            return false;
        };
        if layers.len() == 1 {
            log::warn!("refusing to delete the last layer");
            return false;
        }
        let neighbour = if position > 0 {
            layers[position - 1].id.clone()
        } else {
            layers[position + 1].id.clone()
        };
        self.layer_op("delete layer", |manager| manager.merge_layer_into(id, &neighbour))
            .unwrap_or(false)
    }

    pub fn set_layer_visible(&mut self, id: &str, visible: bool) -> bool {
        self.layer_op("set layer visibility", |layers| layers.set_visible(id, visible))
            .is_some()
    }

    pub fn set_layer_locked(&mut self, id: &str, locked: bool) -> bool {
        self.layer_op("lock layer", |layers| layers.set_locked(id, locked))
            .is_some()
    }

    pub fn set_layer_opacity(&mut self, id: &str, opacity: f64) -> bool {
        self.layer_op("set layer opacity", |layers| layers.set_opacity(id, opacity))
            .is_some()
    }

    pub fn rename_layer(&mut self, id: &str, name: &str) -> bool {
        self.layer_op("rename layer", |layers| layers.rename(id, name))
            .is_some()
    }

    /// Reorder layers. Fails unless `ordered` is exactly the current id set.
    pub fn reorder_layers(&mut self, ordered: &[LayerId]) -> bool {
        self.layer_op("reorder layers", |layers| layers.reorder(ordered))
            .unwrap_or(false)
    }

    /// Move an object to the end of another layer.
    pub fn move_object_to_layer(&mut self, object: ObjectId, to: &str) -> bool {
        let Some((from, _)) = self.doc.locate(object) else {
            return false;
        };
        self.layer_op("move object to layer", |layers| {
            layers.move_object_to_layer(object, &from, to, None)
        })
        .unwrap_or(false)
    }

    pub fn bring_to_front(&mut self, object: ObjectId) -> bool {
        let Some((layer, _)) = self.doc.locate(object) else {
            return false;
        };
        self.layer_op("bring to front", |layers| layers.bring_to_front(&layer, object))
            .unwrap_or(false)
    }

    pub fn send_to_back(&mut self, object: ObjectId) -> bool {
        let Some((layer, _)) = self.doc.locate(object) else {
            return false;
        };
        self.layer_op("send to back", |layers| layers.send_to_back(&layer, object))
            .unwrap_or(false)
    }

    // --- View ---

    pub fn zoom(&self) -> f64 {
        self.camera.zoom()
    }

    /// Set the zoom. With `center` (screen coordinates) the point under it
    /// stays fixed.
    pub fn set_zoom(&mut self, level: f64, center: Option<Point>) {
        if self.camera.set_zoom(level, center) {
            self.emit(EngineEvent::ZoomChanged(self.camera.zoom()));
        }
    }

    pub fn pan(&mut self, delta: Vec2) {
        self.camera.pan(delta);
    }

    pub fn screen_to_world(&self, screen_point: Point) -> Point {
        self.camera.screen_to_world(screen_point)
    }

    // --- Input ---

    pub fn set_modifiers(&mut self, modifiers: Modifiers) {
        self.modifiers = modifiers;
    }

    /// Feed a pointer event in screen coordinates to the active tool.
    pub fn handle_pointer(&mut self, event: PointerEvent) {
        if self.destroyed {
            return;
        }
        let screen = event.position();
        let pointer = PointerSample::new(self.camera.screen_to_world(screen), screen);
        if matches!(event, PointerEvent::Move { .. }) && self.collab.is_synchronized() {
            self.collab.set_cursor(pointer.world);
        }
        match event {
            PointerEvent::Down { button, .. } | PointerEvent::Up { button, .. }
                if button != MouseButton::Left =>
            {
                self.send_outgoing();
                return;
            }
            _ => {}
        }

        let kind = self.tool.kind();
        if !self.role.can_edit() && !kind.allowed_for_viewer() {
            if matches!(event, PointerEvent::Down { .. }) {
                log::warn!("ignoring {kind} input: session is view-only");
            }
            self.send_outgoing();
            return;
        }

        let ctx = ToolContext {
            scene: self.scenes.scene(),
            selection: &self.selection,
            brush: &self.brush,
            config: &self.config,
            modifiers: self.modifiers,
        };
        let action = match event {
            PointerEvent::Down { .. } => self.tool.on_down(pointer, &ctx),
            PointerEvent::Move { .. } => self.tool.on_move(pointer, &ctx),
            PointerEvent::Up { .. } => self.tool.on_up(pointer, &ctx),
        };
        self.apply_tool_action(action);
        self.send_outgoing();
    }

    fn apply_tool_action(&mut self, action: ToolAction) {
        match action {
            ToolAction::None => {}
            ToolAction::Create(draft) => {
                self.commit_draft(draft);
            }
            ToolAction::RequestText(position) => {
                let Some(provider) = self.text_provider.as_mut() else {
                    log::warn!("text tool used without a text provider");
                    return;
                };
                let Some(content) = provider(position) else {
                    return;
                };
                if let Some(draft) = text_draft(position, &content, &self.brush, &self.config) {
                    self.commit_draft(draft);
                }
            }
            ToolAction::Erase(ids) => self.erase(&ids),
            ToolAction::SetSelection(ids) => self.set_selection(ids),
            ToolAction::PickColor(screen) => {
                let Some(color) = self.sampler.as_ref().and_then(|s| s.sample(screen)) else {
                    log::debug!("no color to sample at {screen:?}");
                    return;
                };
                if let Some(callback) = self.color_callback.as_mut() {
                    callback(color);
                }
            }
            ToolAction::Pan(delta) => self.camera.pan(delta),
        }
    }

    /// Direct delete, outside history.
    fn erase(&mut self, ids: &[ObjectId]) {
        let result = self.doc.transact(|doc| {
            for id in ids {
                match doc.remove_object(*id) {
                    Ok(_) | Err(DocumentError::ObjectNotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(())
        });
        if let Err(err) = result {
            log::warn!("erase failed: {err}");
        }
        self.sync_scene();
    }

    /// Handle a key press. Returns the shortcut action that ran, if any.
    pub fn handle_key(&mut self, event: &KeyEvent) -> Option<EditorAction> {
        self.modifiers = event.modifiers;
        let action = ShortcutRegistry::resolve(event)?;
        match action {
            EditorAction::DeleteSelection => {
                self.delete_selection();
            }
            EditorAction::Undo => {
                self.undo();
            }
            EditorAction::Redo => {
                self.redo();
            }
            EditorAction::CancelTool => self.cancel_tool(),
            EditorAction::SelectAll => self.select_all(),
        }
        Some(action)
    }

    // --- Collaboration ---

    /// Attach a channel and join `room`. Replaces any current channel.
    pub fn connect(&mut self, channel: Box<dyn ReplicationChannel>, room: &str) {
        self.disconnect();
        self.channel = Some(channel);
        self.collab.join_room(room);
        self.send_outgoing();
    }

    /// Connect to a relay over a native WebSocket and join `room`.
    pub fn connect_url(&mut self, url: &str, room: &str) -> SyncResult<()> {
        let socket = NativeWebSocket::open(url)?;
        self.connect(Box::new(socket), room);
        Ok(())
    }

    /// Leave the room and release the channel. The document is kept.
    pub fn disconnect(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };
        self.collab.leave_room();
        for message in self.collab.take_outgoing() {
            if let Err(err) = channel.send(&message) {
                log::debug!("dropping message on disconnect: {err}");
            }
        }
        channel.close();
        self.emit(EngineEvent::ConnectionChanged(ConnectionState::Disconnected));
    }

    pub fn is_connected(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.state() == ConnectionState::Connected)
    }

    /// Whether the room's initial state has been applied.
    pub fn is_synchronized(&self) -> bool {
        self.collab.is_synchronized()
    }

    pub fn collaboration(&self) -> &CollaborationManager {
        &self.collab
    }

    pub fn set_user_info(&mut self, name: &str, color: &str) {
        self.collab.set_user_info(name.to_string(), color.to_string());
        self.send_outgoing();
    }

    /// Per-frame update: apply replication traffic, repair and publish the
    /// scene, and push local changes out.
    pub fn tick(&mut self) {
        if self.destroyed {
            return;
        }
        let events = self
            .channel
            .as_mut()
            .map(|channel| channel.poll_events())
            .unwrap_or_default();
        for event in events {
            let was_synchronized = self.collab.is_synchronized();
            self.collab.handle_event(&event, &mut self.doc);
            match event {
                SyncEvent::Connected => {
                    self.emit(EngineEvent::ConnectionChanged(ConnectionState::Connected));
                }
                SyncEvent::Disconnected => {
                    self.emit(EngineEvent::ConnectionChanged(ConnectionState::Disconnected));
                }
                SyncEvent::Error { .. } => {
                    self.emit(EngineEvent::ConnectionChanged(ConnectionState::Error));
                }
                SyncEvent::PeerJoined { peer_id } => self.emit(EngineEvent::PeerJoined(peer_id)),
                SyncEvent::PeerLeft { peer_id } => self.emit(EngineEvent::PeerLeft(peer_id)),
                _ => {}
            }
            if !was_synchronized && self.collab.is_synchronized() {
                // Adopt the room's layers; only an empty room gets a new one.
                self.bootstrap_layers();
                self.emit(EngineEvent::Synchronized);
            }
        }
        self.sync_scene();
    }

    fn bootstrap_layers(&mut self) {
        if self.doc.layer_count() > 0 {
            return;
        }
        if let Err(err) = self.doc.ensure_default_layer() {
            log::warn!("failed to create default layer: {err}");
        }
    }

    fn sync_scene(&mut self) {
        let generation = self.scenes.generation();
        self.scenes.process_changes(&mut self.doc);
        if self.scenes.generation() != generation {
            let generation = self.scenes.generation();
            let scene = self.scenes.scene();
            let kept: Vec<ObjectId> = self
                .selection
                .iter()
                .copied()
                .filter(|id| scene.object(*id).is_some())
                .collect();
            if kept != self.selection {
                self.selection = kept;
                self.emit(EngineEvent::SelectionChanged(self.selection.clone()));
            }
            self.emit(EngineEvent::DocumentChanged { generation });
            self.note_active_layer();
        }
        if let Err(err) = self.collab.flush_local(&self.doc) {
            log::warn!("failed to export local changes: {err}");
        }
        self.send_outgoing();
    }

    fn note_active_layer(&mut self) {
        let active = self.scenes.active_layer().map(str::to_string);
        if active != self.last_active_layer {
            self.last_active_layer = active.clone();
            self.emit(EngineEvent::ActiveLayerChanged(active));
        }
    }

    fn send_outgoing(&mut self) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        for message in self.collab.take_outgoing() {
            if let Err(err) = channel.send(&message) {
                log::warn!("replication send failed: {err}");
            }
        }
    }

    // --- Persistence ---

    /// Encode the whole document for a persistence collaborator.
    pub fn export_snapshot(&self) -> DocumentResult<Vec<u8>> {
        self.doc.export_snapshot()
    }

    /// Merge a persisted snapshot into the document.
    pub fn import_snapshot(&mut self, snapshot: &[u8]) -> DocumentResult<()> {
        let result = self.doc.import(snapshot);
        self.sync_scene();
        result
    }

    // --- Rendering ---

    /// Draw the current frame. Never mutates.
    pub fn render(&self, surface: &mut dyn Surface) {
        surface.begin_frame(self.camera.transform());
        render_scene(self.scenes.scene(), surface, &self.selection);
        let ctx = ToolContext {
            scene: self.scenes.scene(),
            selection: &self.selection,
            brush: &self.brush,
            config: &self.config,
            modifiers: self.modifiers,
        };
        self.tool.render_preview(surface, &ctx);
        for (peer, state) in self.collab.remote_peers() {
            if let Some(cursor) = state.cursor {
                let color = state
                    .user
                    .as_ref()
                    .and_then(|user| SerializableColor::from_hex(&user.color));
                surface.draw_remote_cursor(peer, cursor, color);
            }
        }
        surface.end_frame();
    }

    // --- Teardown ---

    /// Release the channel and discard all local state. Changes not yet
    /// sent are lost. Every later call is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.tool.on_cancel();
        self.disconnect();
        self.history.clear();
        self.selection.clear();
        self.doc = ReplicatedDocument::new();
        self.scenes = SceneManager::new(self.config.max_repair_passes)
            .with_arrow_head_length(self.config.arrow_head_length);
        self.collab = CollaborationManager::new(self.doc.peer_id());
        self.text_provider = None;
        self.color_callback = None;
        self.sampler = None;
        self.events.clear();
        self.destroyed = true;
        log::info!("engine destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::DisplayList;
    use crate::shapes::{Geometry, ObjectStyle};

    fn rect_draft(x: f64) -> ObjectDraft {
        ObjectDraft {
            geometry: Geometry::Rectangle {
                x,
                y: 0.0,
                width: 20.0,
                height: 20.0,
            },
            style: ObjectStyle::default(),
        }
    }

    fn down(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Down {
            position: Point::new(x, y),
            button: MouseButton::Left,
        }
    }

    fn moved(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Move {
            position: Point::new(x, y),
        }
    }

    fn up(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Up {
            position: Point::new(x, y),
            button: MouseButton::Left,
        }
    }

    #[test]
    fn test_offline_engine_has_default_layer() {
        let engine = Engine::default();
        assert_eq!(engine.layers().len(), 1);
        assert_eq!(engine.active_layer(), Some(crate::crdt::DEFAULT_LAYER_ID));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!("admin".parse::<Role>().is_err());
        let mut engine = Engine::default();
        engine.set_role_str("admin");
        assert_eq!(engine.role(), Role::Viewer);
        assert!(engine.take_events().contains(&EngineEvent::RoleChanged(Role::Viewer)));
    }

    #[test]
    fn test_draw_rectangle_with_pointer() {
        let mut engine = Engine::default();
        engine.set_tool(ToolKind::Rectangle);
        engine.handle_pointer(down(10.0, 10.0));
        engine.handle_pointer(moved(30.0, 30.0));

        let mut preview = DisplayList::new();
        engine.render(&mut preview);
        assert_eq!(preview.previews().len(), 1);

        engine.handle_pointer(up(60.0, 40.0));
        assert_eq!(engine.scene().len(), 1);
        assert!(engine.can_undo());
        assert!(engine.undo());
        assert!(engine.scene().is_empty());
    }

    #[test]
    fn test_pointer_respects_zoom_and_pan() {
        let mut engine = Engine::default();
        engine.set_zoom(2.0, None);
        engine.pan(Vec2::new(100.0, 0.0));
        engine.set_tool(ToolKind::Fill);
        engine.handle_pointer(down(200.0, 100.0));
        engine.handle_pointer(up(200.0, 100.0));
        let object = engine.scene().ordered().next().unwrap();
        assert_eq!(
            object.geometry,
            Geometry::Rectangle {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0
            }
        );
    }

    #[test]
    fn test_viewer_can_pan_but_not_draw() {
        let mut engine = Engine::default();
        engine.set_role(Role::Viewer);
        engine.set_tool(ToolKind::Freehand);
        engine.handle_pointer(down(0.0, 0.0));
        engine.handle_pointer(moved(10.0, 10.0));
        engine.handle_pointer(up(20.0, 20.0));
        assert!(engine.scene().is_empty());

        engine.set_tool(ToolKind::Pan);
        engine.handle_pointer(down(0.0, 0.0));
        engine.handle_pointer(moved(15.0, 5.0));
        engine.handle_pointer(up(15.0, 5.0));
        assert_eq!(engine.camera().offset, Vec2::new(15.0, 5.0));

        engine.set_zoom(3.0, None);
        assert!((engine.zoom() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_text_tool_uses_provider() {
        let mut engine = Engine::default();
        engine.set_text_provider(|_| Some("hello".to_string()));
        engine.set_tool(ToolKind::Text);
        engine.handle_pointer(down(5.0, 5.0));
        engine.handle_pointer(up(5.0, 5.0));
        let object = engine.scene().ordered().next().unwrap();
        assert!(matches!(&object.geometry, Geometry::Text { content, .. } if content == "hello"));
    }

    #[test]
    fn test_eyedropper_reports_color_without_mutation() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Red;
        impl PixelSampler for Red {
            fn sample(&self, _screen_point: Point) -> Option<SerializableColor> {
                Some(SerializableColor::new(255, 0, 0, 255))
            }
        }

        let picked = Rc::new(RefCell::new(None));
        let sink = picked.clone();
        let mut engine = Engine::default();
        engine.set_pixel_sampler(Red);
        engine.set_color_callback(move |color| *sink.borrow_mut() = Some(color));
        engine.set_tool(ToolKind::Eyedropper);
        let version = engine.document().version();
        engine.handle_pointer(down(1.0, 1.0));
        engine.handle_pointer(up(1.0, 1.0));

        assert_eq!(*picked.borrow(), Some(SerializableColor::new(255, 0, 0, 255)));
        assert_eq!(engine.document().version(), version);
    }

    #[test]
    fn test_eraser_is_not_undoable() {
        let mut engine = Engine::default();
        let object = engine.add_object(rect_draft(0.0)).unwrap();
        engine.set_tool(ToolKind::Eraser);
        engine.handle_pointer(down(10.0, 10.0));
        engine.handle_pointer(up(10.0, 10.0));
        assert!(engine.get_object(object.id).is_none());
        // The only history entry is the add.
        assert!(engine.undo());
        assert!(!engine.can_undo());
    }

    #[test]
    fn test_selection_shortcuts() {
        let mut engine = Engine::default();
        let a = engine.add_object(rect_draft(0.0)).unwrap();
        let b = engine.add_object(rect_draft(50.0)).unwrap();
        let ctrl = Modifiers {
            ctrl: true,
            ..Modifiers::NONE
        };

        assert_eq!(
            engine.handle_key(&KeyEvent::new("a", ctrl)),
            Some(EditorAction::SelectAll)
        );
        assert_eq!(engine.selection(), &[a.id, b.id]);

        assert!(engine.translate_selection(Vec2::new(5.0, 0.0)));
        assert_eq!(engine.get_object(a.id).unwrap().bounds.x0, a.bounds.x0 + 5.0);

        engine.handle_key(&KeyEvent::new("Delete", Modifiers::NONE));
        assert!(engine.scene().is_empty());
        assert!(engine.selection().is_empty());

        engine.handle_key(&KeyEvent::new("z", ctrl));
        assert_eq!(engine.scene().len(), 2);
    }

    #[test]
    fn test_delete_layer_merges_objects() {
        let mut engine = Engine::default();
        let base = engine.active_layer().unwrap().to_string();
        let top = engine.create_layer("Top", LayerOptions::default()).unwrap();
        assert!(engine.set_active_layer(&top));
        let object = engine.add_object(rect_draft(0.0)).unwrap();
        assert_eq!(object.layer_id, top);

        assert!(engine.delete_layer(&top));
        assert_eq!(engine.layers().len(), 1);
        assert_eq!(engine.get_object(object.id).unwrap().layer_id, base);
        assert_eq!(engine.active_layer(), Some(base.as_str()));
        assert!(!engine.delete_layer(&base));
    }

    #[test]
    fn test_locked_active_layer_falls_back() {
        let mut engine = Engine::default();
        let base = engine.active_layer().unwrap().to_string();
        let locked = engine.create_layer("Locked", LayerOptions::default()).unwrap();
        assert!(engine.set_layer_locked(&locked, true));
        assert!(engine.set_active_layer(&locked));
        let object = engine.add_object(rect_draft(0.0)).unwrap();
        assert_eq!(object.layer_id, base);
    }

    #[test]
    fn test_events_and_destroy() {
        let mut engine = Engine::default();
        engine.take_events();
        engine.set_tool(ToolKind::Line);
        engine.set_brush_options(&BrushPatch {
            stroke_width: Some(6.0),
            ..BrushPatch::default()
        });
        engine.set_zoom(0.01, Some(Point::new(10.0, 10.0)));
        let events = engine.take_events();
        assert_eq!(events[0], EngineEvent::ToolChanged(ToolKind::Line));
        assert!(matches!(events[1], EngineEvent::BrushChanged(_)));
        assert_eq!(events[2], EngineEvent::ZoomChanged(0.1));

        engine.destroy();
        assert!(engine.is_destroyed());
        assert!(engine.add_object(rect_draft(0.0)).is_none());
        assert!(engine.scene().is_empty());
    }

    #[test]
    fn test_connect_url_rejects_bad_addresses() {
        let mut engine = Engine::default();
        assert!(matches!(
            engine.connect_url("http://localhost:3030/ws", "room"),
            Err(crate::sync::SyncError::Scheme(_))
        ));
        assert!(engine.connect_url("not a url", "room").is_err());
        assert!(!engine.is_connected());
        assert_eq!(engine.layers().len(), 1);
    }

    #[test]
    fn test_configured_arrow_head_sizes_arrows() {
        let arrow = || ObjectDraft {
            geometry: Geometry::Arrow {
                start: Point::new(0.0, 0.0),
                end: Point::new(100.0, 0.0),
            },
            style: ObjectStyle {
                stroke_width: 0.0,
                ..ObjectStyle::default()
            },
        };
        let mut stock = Engine::default();
        let mut bold = Engine::new(EngineConfig {
            arrow_head_length: 40.0,
            ..EngineConfig::default()
        });
        let small = stock.add_object(arrow()).unwrap().id;
        let large = bold.add_object(arrow()).unwrap().id;

        let small = stock.get_object(small).unwrap().bounds;
        let large = bold.get_object(large).unwrap().bounds;
        assert!((small.height() - 15.0).abs() < 1e-9);
        assert!((large.height() - 40.0).abs() < 1e-9);
        // The longer barb is hittable only where it is configured.
        assert!(bold.scene().topmost_at(Point::new(66.0, 19.0), 1.0).is_some());
        assert!(stock.scene().topmost_at(Point::new(66.0, 19.0), 1.0).is_none());
    }
}

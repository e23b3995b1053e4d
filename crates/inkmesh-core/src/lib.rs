//! Inkmesh Core Library
//!
//! Replicated scene graph and editing engine for the inkmesh collaborative
//! canvas. Rendering and the host UI live outside this crate.

pub mod camera;
pub mod collaboration;
pub mod config;
pub mod crdt;
pub mod engine;
pub mod history;
pub mod input;
pub mod layers;
pub mod render;
pub mod scene;
pub mod shapes;
pub mod storage;
pub mod sync;
pub mod tools;

pub use camera::Camera;
pub use collaboration::CollaborationManager;
pub use config::{ConfigError, EngineConfig};
pub use crdt::{DocumentError, DocumentResult, ReplicatedDocument};
pub use engine::{Engine, EngineEvent, Role};
pub use history::{Command, HistoryManager};
pub use input::{EditorAction, KeyEvent, Modifiers, MouseButton, PointerEvent, ShortcutRegistry};
pub use layers::{LayerManager, LayerOptions};
pub use render::{DisplayList, PixelSampler, Surface};
pub use scene::{Scene, SceneManager};
pub use shapes::{
    DrawableObject, Geometry, Layer, LayerId, ObjectId, ObjectKind, ObjectPatch, ObjectStyle,
    SerializableColor,
};
pub use sync::{ConnectionState, NativeWebSocket, ReplicationChannel, SyncEvent};
pub use tools::{BrushOptions, BrushPatch, ObjectDraft, ToolKind};

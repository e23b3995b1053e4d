//! Replicated document built on Loro.
//!
//! # Schema
//!
//! ```text
//! LoroDoc
//! ├── "objects": LoroMap<ObjectId, LoroMap>   (flat object fields)
//! └── "layers": LoroMovableList<LoroMap>       (back-to-front)
//!      └── { id, name, visible, locked, opacity,
//!            objects: LoroMovableList<String> } (back-to-front membership)
//! ```
//!
//! An object's layer, bounds and z-index are not stored. They are derived
//! from layer membership and geometry when the scene is materialized.

mod convert;
mod schema;

pub use convert::{layer_from_loro, object_from_loro};
pub use schema::{
    ChangeOrigin, DEFAULT_LAYER_ID, DEFAULT_LAYER_NAME, DocumentChange, DocumentSnapshot,
    LAYERS_KEY, OBJECTS_KEY, RemovedObject, ReplicatedDocument,
};

pub use loro::{ExportMode, VersionVector};

use crate::shapes::{LayerId, ObjectId};
use thiserror::Error;

/// Errors raised by replicated document operations.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("replica operation failed: {0}")]
    Loro(#[from] loro::LoroError),
    #[error("failed to encode document: {0}")]
    Encode(String),
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
    #[error("object already exists: {0}")]
    ObjectExists(ObjectId),
    #[error("layer not found: {0}")]
    LayerNotFound(LayerId),
}

/// Result type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

//! Persistence of encoded document snapshots.
//!
//! Backends store opaque bytes produced by
//! [`ReplicatedDocument::export_snapshot`](crate::crdt::ReplicatedDocument::export_snapshot);
//! they never look inside. Ids are listed in ascending order.

mod autosave;
mod file;
mod memory;

pub use autosave::{AutoSaveManager, DEFAULT_AUTOSAVE_INTERVAL_SECS, create_default_storage};
pub use file::FileStorage;
pub use memory::MemoryStorage;

use std::path::PathBuf;
use std::{future::Future, io, pin::Pin};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no snapshot stored under '{0}'")]
    NotFound(String),
    /// The stored bytes are not a readable document.
    #[error("unreadable snapshot: {0}")]
    Serialization(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("storage unavailable: {0}")]
    Other(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Future returned by every [`Storage`] method; not required to be `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A keyed store of binary snapshots.
pub trait Storage: Send + Sync {
    /// Store `snapshot` under `id`, replacing any previous value.
    fn save(&self, id: &str, snapshot: &[u8]) -> BoxFuture<'_, StorageResult<()>>;

    /// Missing ids yield [`StorageError::NotFound`].
    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<Vec<u8>>>;

    /// Removing an absent id succeeds.
    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>>;

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>>;
}

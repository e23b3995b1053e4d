//! Volatile backend.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::{BoxFuture, Storage, StorageError, StorageResult};

/// Snapshots held in process memory. Used by tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStorage {
    snapshots: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StorageError {
    StorageError::Other("memory store lock poisoned".to_string())
}

impl Storage for MemoryStorage {
    fn save(&self, id: &str, snapshot: &[u8]) -> BoxFuture<'_, StorageResult<()>> {
        let entry = (id.to_owned(), snapshot.to_owned());
        Box::pin(async move {
            self.snapshots
                .write()
                .map_err(poisoned)?
                .insert(entry.0, entry.1);
            Ok(())
        })
    }

    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<Vec<u8>>> {
        let key = id.to_owned();
        Box::pin(async move {
            let map = self.snapshots.read().map_err(poisoned)?;
            match map.get(&key) {
                Some(bytes) => Ok(bytes.clone()),
                None => Err(StorageError::NotFound(key)),
            }
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = id.to_owned();
        Box::pin(async move {
            self.snapshots.write().map_err(poisoned)?.remove(&key);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let map = self.snapshots.read().map_err(poisoned)?;
            Ok(map.keys().cloned().collect())
        })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let key = id.to_owned();
        Box::pin(async move { Ok(self.snapshots.read().map_err(poisoned)?.contains_key(&key)) })
    }
}

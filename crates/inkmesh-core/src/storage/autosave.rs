//! Periodic persistence of one document.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{FileStorage, Storage, StorageError, StorageResult};
use crate::crdt::ReplicatedDocument;

pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 30;

/// Writes a document's snapshot once it has unsaved edits and the
/// interval since the previous write has elapsed.
///
/// A failed write keeps the edits pending so the next attempt retries.
pub struct AutoSaveManager<S: Storage> {
    backend: Arc<S>,
    id: String,
    every: Duration,
    /// When the oldest unsaved edit was recorded.
    pending_since: Option<Instant>,
    saved_at: Option<Instant>,
}

impl<S: Storage> AutoSaveManager<S> {
    pub fn new(backend: Arc<S>, id: impl Into<String>) -> Self {
        Self {
            backend,
            id: id.into(),
            every: Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS),
            pending_since: None,
            saved_at: None,
        }
    }

    /// Builder form of [`set_interval`](Self::set_interval).
    pub fn with_interval(mut self, every: Duration) -> Self {
        self.every = every;
        self
    }

    pub fn set_interval(&mut self, every: Duration) {
        self.every = every;
    }

    pub fn interval(&self) -> Duration {
        self.every
    }

    /// Record that the document changed. Repeated calls keep the first
    /// timestamp.
    pub fn mark_dirty(&mut self) {
        self.pending_since.get_or_insert_with(Instant::now);
    }

    pub fn is_dirty(&self) -> bool {
        self.pending_since.is_some()
    }

    pub fn document_id(&self) -> &str {
        &self.id
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.backend
    }

    pub fn should_save(&self) -> bool {
        self.is_dirty()
            && self
                .saved_at
                .is_none_or(|saved| saved.elapsed() >= self.every)
    }

    /// Save when [`should_save`](Self::should_save) holds. Returns whether a
    /// write happened.
    pub async fn maybe_save(&mut self, doc: &ReplicatedDocument) -> StorageResult<bool> {
        if self.should_save() {
            self.save(doc).await.map(|()| true)
        } else {
            Ok(false)
        }
    }

    /// Write immediately, regardless of the interval.
    pub async fn save(&mut self, doc: &ReplicatedDocument) -> StorageResult<()> {
        let bytes = doc
            .export_snapshot()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.backend.save(&self.id, &bytes).await?;
        self.pending_since = None;
        self.saved_at = Some(Instant::now());
        log::debug!("autosaved '{}' ({} bytes)", self.id, bytes.len());
        Ok(())
    }

    /// Read back the stored document. `Ok(None)` when nothing was saved yet.
    pub async fn load(&mut self) -> StorageResult<Option<ReplicatedDocument>> {
        let bytes = match self.backend.load(&self.id).await {
            Err(StorageError::NotFound(_)) => return Ok(None),
            other => other?,
        };
        let doc = ReplicatedDocument::from_snapshot(&bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.pending_since = None;
        self.saved_at = Some(Instant::now());
        Ok(Some(doc))
    }
}

/// File storage in the platform data directory.
pub fn create_default_storage() -> StorageResult<Arc<FileStorage>> {
    FileStorage::default_location().map(Arc::new)
}

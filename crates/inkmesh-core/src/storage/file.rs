//! Directory-backed storage.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{BoxFuture, Storage, StorageError, StorageResult};

const EXTENSION: &str = "loro";
const PARTIAL_EXTENSION: &str = "loro.partial";

/// One `<id>.loro` file per document inside a single directory.
///
/// Writes go to a sibling `.partial` file first and are renamed into place,
/// so a crash mid-save leaves the previous snapshot intact.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Use `root`, creating it (and its parents) when absent.
    pub fn new(root: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    /// `<data dir>/inkmesh/documents`, falling back to the home directory.
    pub fn default_location() -> StorageResult<Self> {
        let Some(data) = dirs::data_local_dir().or_else(dirs::home_dir) else {
            return Err(StorageError::Other(
                "no data or home directory on this platform".to_string(),
            ));
        };
        Self::new(data.join("inkmesh").join("documents"))
    }

    pub fn base_path(&self) -> &Path {
        &self.root
    }

    /// Ids become file stems; anything outside `[A-Za-z0-9_-]` maps to `_`.
    fn path_for(&self, id: &str) -> PathBuf {
        let stem: String = id
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        self.root.join(stem).with_extension(EXTENSION)
    }
}

impl Storage for FileStorage {
    fn save(&self, id: &str, snapshot: &[u8]) -> BoxFuture<'_, StorageResult<()>> {
        let target = self.path_for(id);
        let bytes = snapshot.to_owned();
        Box::pin(async move {
            let staging = target.with_extension(PARTIAL_EXTENSION);
            fs::write(&staging, &bytes).map_err(|e| StorageError::io(&staging, e))?;
            fs::rename(&staging, &target).map_err(|e| StorageError::io(&target, e))?;
            log::trace!("wrote {} bytes to {}", bytes.len(), target.display());
            Ok(())
        })
    }

    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<Vec<u8>>> {
        let path = self.path_for(id);
        let key = id.to_owned();
        Box::pin(async move {
            fs::read(&path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::NotFound(key),
                _ => StorageError::io(&path, e),
            })
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.path_for(id);
        Box::pin(async move {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(StorageError::io(&path, e)),
                _ => Ok(()),
            }
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let entries = match fs::read_dir(&self.root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(StorageError::io(&self.root, e)),
            };
            let mut ids: Vec<String> = entries
                .filter_map(Result::ok)
                .filter_map(|entry| {
                    let name = entry.file_name().into_string().ok()?;
                    name.strip_suffix(".loro").map(str::to_owned)
                })
                .collect();
            ids.sort();
            Ok(ids)
        })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let path = self.path_for(id);
        Box::pin(async move { Ok(path.is_file()) })
    }
}

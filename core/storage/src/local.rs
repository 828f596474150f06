//! Local filesystem storage backend.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::provider::StorageBackend;
use medledger_common::{Error, Result, StorageKey};

const TEMP_SUFFIX: &str = ".tmp";

/// Local filesystem storage backend.
///
/// Each key maps to a file below the root directory. Each write goes to
/// its own uniquely named temporary sibling and is renamed into place, so
/// concurrent writers to one key never share a temp file.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local backend with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    /// - Root exists and is not a directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            fs::create_dir_all(&root)?;
        }
        if !root.is_dir() {
            return Err(Error::Storage(format!(
                "Storage root is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a StorageKey to a filesystem path.
    fn to_fs_path(&self, key: &StorageKey) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in key.components() {
            fs_path.push(component);
        }
        fs_path
    }
}

impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn put(&self, key: &StorageKey, data: Vec<u8>) -> Result<()> {
        let fs_path = self.to_fs_path(key);

        let parent = fs_path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(TEMP_SUFFIX)
            .tempfile_in(parent)?;
        tmp.write_all(&data)?;
        tmp.persist(&fs_path).map_err(|e| Error::Io(e.error))?;

        debug!(key = %key, size = data.len(), "Stored value");
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(key);

        if !fs_path.is_file() {
            return Err(Error::NotFound(format!("Key not found: {}", key)));
        }

        Ok(fs::read(&fs_path)?)
    }

    fn exists(&self, key: &StorageKey) -> Result<bool> {
        Ok(self.to_fs_path(key).is_file())
    }

    fn list(&self, prefix: &StorageKey) -> Result<Vec<StorageKey>> {
        let dir = self.to_fs_path(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            results.push(prefix.join(&name)?);
        }
        results.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(results)
    }
}

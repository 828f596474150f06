//! Storage backend trait definition.

use medledger_common::{Result, StorageKey};

/// Storage backend trait for different media.
///
/// Implementations must be safe to share between threads. Values are
/// replaced whole; there is no partial write and no delete.
pub trait StorageBackend: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Store `data` under `key`, replacing any previous value.
    ///
    /// # Postconditions
    /// - A subsequent `get(key)` returns `data`
    /// - A reader never observes a partially written value
    fn put(&self, key: &StorageKey, data: Vec<u8>) -> Result<()>;

    /// Read the value stored under `key`.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored under `key`
    fn get(&self, key: &StorageKey) -> Result<Vec<u8>>;

    /// Check if a value is stored under `key`.
    fn exists(&self, key: &StorageKey) -> Result<bool>;

    /// List keys stored directly under `prefix`, sorted.
    fn list(&self, prefix: &StorageKey) -> Result<Vec<StorageKey>>;

    /// Read the value under `key`, mapping a missing key to `None`.
    fn get_optional(&self, key: &StorageKey) -> Result<Option<Vec<u8>>> {
        match self.get(key) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

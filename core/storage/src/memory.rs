//! In-memory storage backend.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::provider::StorageBackend;
use medledger_common::{Error, Result, StorageKey};

/// In-memory storage backend.
///
/// The default adapter. All data is stored in memory and lost on drop.
#[derive(Default)]
pub struct MemoryBackend {
    storage: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create a new empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn put(&self, key: &StorageKey, data: Vec<u8>) -> Result<()> {
        self.storage.write().insert(key.to_string_key(), data);
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>> {
        self.storage
            .read()
            .get(&key.to_string_key())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}", key)))
    }

    fn exists(&self, key: &StorageKey) -> Result<bool> {
        Ok(self.storage.read().contains_key(&key.to_string_key()))
    }

    fn list(&self, prefix: &StorageKey) -> Result<Vec<StorageKey>> {
        let storage = self.storage.read();
        let mut results = Vec::new();
        for entry_key in storage.keys() {
            let key = StorageKey::parse(entry_key)?;
            if key.is_child_of(prefix) {
                results.push(key);
            }
        }
        Ok(results)
    }
}

//! Test doubles.

use std::sync::atomic::{AtomicBool, Ordering};

use medledger_common::{Error, Result, StorageKey};
use medledger_storage::{MemoryBackend, StorageBackend};

/// Memory backend whose writes can be switched off.
pub(crate) struct FlakyBackend {
    inner: MemoryBackend,
    failing: AtomicBool,
}

impl FlakyBackend {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            failing: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl StorageBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    fn put(&self, key: &StorageKey, data: Vec<u8>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("disk full".to_string()));
        }
        self.inner.put(key, data)
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    fn exists(&self, key: &StorageKey) -> Result<bool> {
        self.inner.exists(key)
    }

    fn list(&self, prefix: &StorageKey) -> Result<Vec<StorageKey>> {
        self.inner.list(prefix)
    }
}

//! Data keys for record encryption.
//!
//! Under the per-subject policy every subject gets its own random data
//! key. The key is stored wrapped under a key-encryption key derived from
//! the master key and the subject id, so the store never holds a data key
//! in the clear. The shared policy derives one data key from the master
//! key for every subject.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::encoding::subject_key;
use medledger_common::{Error, Result, SubjectId};
use medledger_crypto::{decrypt_with_aad, encrypt_with_aad, MasterKey, SymmetricKey};
use medledger_storage::StorageBackend;

const KEYS_DIR: &str = "keys";

/// How record data keys are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// One random data key per subject, wrapped under the master key.
    #[default]
    PerSubject,
    /// One data key for every subject.
    Shared,
}

impl fmt::Display for KeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerSubject => f.write_str("per-subject"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// Holds the master key and caches unwrapped data keys.
///
/// The ring starts locked. Every key request on a locked ring is a
/// `Configuration` error.
pub struct KeyRing {
    policy: KeyPolicy,
    master: RwLock<Option<MasterKey>>,
    cache: RwLock<HashMap<SubjectId, SymmetricKey>>,
    backend: Arc<dyn StorageBackend>,
}

impl KeyRing {
    /// Create a locked key ring storing wrapped keys on `backend`.
    pub fn new(policy: KeyPolicy, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            policy,
            master: RwLock::new(None),
            cache: RwLock::new(HashMap::new()),
            backend,
        }
    }

    /// Create a ring that is already unlocked with `master`.
    pub fn unlocked(policy: KeyPolicy, backend: Arc<dyn StorageBackend>, master: MasterKey) -> Self {
        let ring = Self::new(policy, backend);
        ring.unlock(master);
        ring
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    /// Install the master key.
    pub fn unlock(&self, master: MasterKey) {
        *self.master.write() = Some(master);
        debug!(policy = %self.policy, "Key ring unlocked");
    }

    /// Drop the master key and every cached data key.
    pub fn lock(&self) {
        // Keys zeroize on drop.
        self.master.write().take();
        self.cache.write().clear();
        debug!("Key ring locked");
    }

    pub fn is_unlocked(&self) -> bool {
        self.master.read().is_some()
    }

    /// The data key for `subject`, creating and storing one if needed.
    ///
    /// # Errors
    /// - `Configuration` if the ring is locked
    /// - `Decryption` if a stored wrapped key fails authentication
    /// - Storage failure
    pub fn data_key(&self, subject: &SubjectId) -> Result<SymmetricKey> {
        let master_guard = self.master.read();
        let master = master_guard.as_ref().ok_or_else(|| {
            Error::Configuration("Key ring is locked; unlock it with the master key first".to_string())
        })?;

        if self.policy == KeyPolicy::Shared {
            return Ok(master.derive_shared_data_key());
        }

        if let Some(key) = self.cache.read().get(subject) {
            return Ok(key.clone());
        }

        // Hold the write lock across load-or-create so two writers never
        // mint different keys for one subject.
        let mut cache = self.cache.write();
        if let Some(key) = cache.get(subject) {
            return Ok(key.clone());
        }

        let wrapping = master.derive_wrapping_key(subject.as_str().as_bytes());
        let storage_key = subject_key(KEYS_DIR, subject, "")?;
        let key = match self.backend.get_optional(&storage_key)? {
            Some(wrapped) => {
                let raw =
                    decrypt_with_aad(wrapping.as_bytes(), &wrapped, subject.as_str().as_bytes())?;
                SymmetricKey::from_slice(&raw)?
            }
            None => {
                let key = SymmetricKey::generate();
                let wrapped =
                    encrypt_with_aad(wrapping.as_bytes(), key.as_bytes(), subject.as_str().as_bytes())?;
                self.backend.put(&storage_key, wrapped)?;
                info!(subject = %subject, "Created data key");
                key
            }
        };

        cache.insert(subject.clone(), key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medledger_storage::MemoryBackend;

    fn id(s: &str) -> SubjectId {
        SubjectId::new(s).unwrap()
    }

    fn backend() -> Arc<dyn StorageBackend> {
        Arc::new(MemoryBackend::new())
    }

    #[test]
    fn test_locked_ring_is_configuration_error() {
        let ring = KeyRing::new(KeyPolicy::PerSubject, backend());
        assert!(matches!(ring.data_key(&id("alice")), Err(Error::Configuration(_))));

        ring.unlock(MasterKey::from_bytes([1u8; 32]));
        assert!(ring.data_key(&id("alice")).is_ok());

        ring.lock();
        assert!(!ring.is_unlocked());
        assert!(matches!(ring.data_key(&id("alice")), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_per_subject_keys_differ_and_persist() {
        let storage = backend();
        let master = MasterKey::from_bytes([2u8; 32]);
        let ring = KeyRing::unlocked(KeyPolicy::PerSubject, storage.clone(), master.clone());

        let alice = ring.data_key(&id("alice")).unwrap();
        let bob = ring.data_key(&id("bob")).unwrap();
        assert_ne!(alice.as_bytes(), bob.as_bytes());
        assert_eq!(ring.data_key(&id("alice")).unwrap().as_bytes(), alice.as_bytes());

        let reopened = KeyRing::unlocked(KeyPolicy::PerSubject, storage, master);
        assert_eq!(reopened.data_key(&id("alice")).unwrap().as_bytes(), alice.as_bytes());
    }

    #[test]
    fn test_wrong_master_cannot_unwrap() {
        let storage = backend();
        let ring = KeyRing::unlocked(KeyPolicy::PerSubject, storage.clone(), MasterKey::from_bytes([3u8; 32]));
        ring.data_key(&id("alice")).unwrap();

        let other = KeyRing::unlocked(KeyPolicy::PerSubject, storage, MasterKey::from_bytes([4u8; 32]));
        assert!(matches!(other.data_key(&id("alice")), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_shared_policy_uses_one_key() {
        let storage = backend();
        let ring = KeyRing::unlocked(KeyPolicy::Shared, storage.clone(), MasterKey::from_bytes([5u8; 32]));

        let alice = ring.data_key(&id("alice")).unwrap();
        let bob = ring.data_key(&id("bob")).unwrap();
        assert_eq!(alice.as_bytes(), bob.as_bytes());
        assert!(storage.list(&medledger_common::StorageKey::parse(KEYS_DIR).unwrap()).unwrap().is_empty());
    }
}

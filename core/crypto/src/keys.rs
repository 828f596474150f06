//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use medledger_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of KDF salts in bytes.
pub const SALT_LENGTH: usize = 16;

/// Master key derived from the operator password.
///
/// This key never encrypts records directly. It wraps the per-subject
/// data keys held by the key ring.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive the key-encryption key that wraps one subject's data key.
    ///
    /// Uses blake2b over the master key, a context label and the subject id.
    pub fn derive_wrapping_key(&self, subject: &[u8]) -> SymmetricKey {
        self.derive(subject, b"medledger-subject-kek")
    }

    /// Derive the single program-wide data key used by the shared key policy.
    pub fn derive_shared_data_key(&self) -> SymmetricKey {
        self.derive(b"", b"medledger-shared-dek")
    }

    fn derive(&self, id: &[u8], label: &[u8]) -> SymmetricKey {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update(label);
        hasher.update(id);

        let result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        SymmetricKey::from_bytes(derived)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Key for symmetric record or session encryption.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_LENGTH],
}

impl SymmetricKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::Crypto(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_key_is_per_subject() {
        let master = MasterKey::from_bytes([1u8; KEY_LENGTH]);

        let alice1 = master.derive_wrapping_key(b"alice");
        let alice2 = master.derive_wrapping_key(b"alice");
        let bob = master.derive_wrapping_key(b"bob");

        assert_eq!(alice1.as_bytes(), alice2.as_bytes());
        assert_ne!(alice1.as_bytes(), bob.as_bytes());
    }

    #[test]
    fn test_shared_key_differs_from_wrapping_keys() {
        let master = MasterKey::from_bytes([1u8; KEY_LENGTH]);
        assert_ne!(
            master.derive_shared_data_key().as_bytes(),
            master.derive_wrapping_key(b"").as_bytes()
        );
    }

    #[test]
    fn test_symmetric_key_generate() {
        let key1 = SymmetricKey::generate();
        let key2 = SymmetricKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_symmetric_key_from_slice() {
        assert!(SymmetricKey::from_slice(&[0u8; KEY_LENGTH]).is_ok());
        assert!(SymmetricKey::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let key = SymmetricKey::from_bytes([9u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "SymmetricKey([REDACTED])");
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }
}

//! Store configuration and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medledger_common::{Error, Result};
use medledger_crypto::{decrypt, derive_key_with_params, encrypt, KdfParams, MasterKey, Salt};
use medledger_ledger::Difficulty;
use medledger_records::KeyPolicy;

/// Configuration file name at the storage root.
pub const CONFIG_FILENAME: &str = "medledger.config";

const VERIFICATION_PLAINTEXT: &[u8] = b"MEDLEDGER_KEY_VERIFICATION_V1";

/// Store format version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    /// Current store format version.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Check if this version can be opened by this build.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Options chosen once when a store is created.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub kdf_params: KdfParams,
    pub difficulty: Difficulty,
    pub key_policy: KeyPolicy,
}

/// Configuration stored at the storage root.
///
/// Holds everything needed to re-derive the master key and reopen the
/// store. The password itself is never stored; `key_verification` is a
/// known constant encrypted under the master key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Store format version.
    pub version: FormatVersion,
    /// Salt for master key derivation.
    pub salt: Salt,
    /// KDF parameters.
    pub kdf_params: KdfParams,
    /// Proof-of-work difficulty for new blocks.
    pub difficulty: Difficulty,
    /// How record data keys are chosen.
    pub key_policy: KeyPolicy,
    /// Storage backend type (e.g., "local", "memory").
    pub backend_type: String,
    /// Backend-specific configuration.
    pub backend_config: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last flush timestamp.
    pub modified_at: DateTime<Utc>,
    /// Verification constant encrypted under the master key.
    pub key_verification: Vec<u8>,
}

impl CoreConfig {
    /// Create a configuration for a new store.
    ///
    /// Returns the derived master key with the configuration so the caller
    /// does not derive it twice.
    ///
    /// # Errors
    /// - Password empty
    /// - KDF parameters below the minimum
    pub fn new(
        password: &[u8],
        backend_type: impl Into<String>,
        backend_config: serde_json::Value,
        options: CreateOptions,
    ) -> Result<(Self, MasterKey)> {
        let salt = Salt::generate();
        let master_key = derive_key_with_params(password, &salt, &options.kdf_params)?;
        let key_verification = encrypt(master_key.as_bytes(), VERIFICATION_PLAINTEXT)?;
        let now = Utc::now();

        let config = Self {
            version: FormatVersion::CURRENT,
            salt,
            kdf_params: options.kdf_params,
            difficulty: options.difficulty,
            key_policy: options.key_policy,
            backend_type: backend_type.into(),
            backend_config,
            created_at: now,
            modified_at: now,
            key_verification,
        };
        Ok((config, master_key))
    }

    /// Verify a password against this configuration.
    ///
    /// # Returns
    /// - `Ok(true)` if password is correct
    /// - `Ok(false)` if password is incorrect
    /// - `Err(_)` if verification failed for other reasons
    pub fn verify_password(&self, password: &[u8]) -> Result<bool> {
        Ok(self.try_master_key(password)?.is_some())
    }

    /// Derive the master key, checking the password.
    ///
    /// # Errors
    /// - `Configuration` if the format version is incompatible
    /// - `Decryption` if the password is wrong
    pub fn unlock(&self, password: &[u8]) -> Result<MasterKey> {
        if !self.version.is_compatible() {
            return Err(Error::Configuration(format!(
                "Incompatible store version: {}.{}",
                self.version.major, self.version.minor
            )));
        }
        self.try_master_key(password)?
            .ok_or_else(|| Error::Decryption("Invalid password".to_string()))
    }

    fn try_master_key(&self, password: &[u8]) -> Result<Option<MasterKey>> {
        let master_key = derive_key_with_params(password, &self.salt, &self.kdf_params)?;
        match decrypt(master_key.as_bytes(), &self.key_verification) {
            Ok(plaintext) if plaintext == VERIFICATION_PLAINTEXT => Ok(Some(master_key)),
            // Decryption failed = wrong password
            _ => Ok(None),
        }
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

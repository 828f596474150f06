//! Password-based key derivation using PBKDF2-HMAC-SHA256.
//!
//! The iteration count is fixed per store and recorded in its configuration,
//! so a key derived today can be re-derived after a restart.

use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use medledger_common::{Error, Result};

/// Lowest iteration count accepted for derivation.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 iterations.
    pub iterations: u32,
}

impl KdfParams {
    /// The baseline parameters: 100,000 iterations.
    pub fn standard() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }

    /// Stronger parameters for long-lived stores.
    pub fn sensitive() -> Self {
        Self {
            iterations: 600_000,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::InvalidInput(format!(
                "KDF iterations must be at least {}, got {}",
                MIN_ITERATIONS, self.iterations
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::standard()
    }
}

/// Derive a 32-byte key from a password.
///
/// When `salt` is `None` a fresh 16-byte salt is generated; it is returned
/// alongside the key so the caller can persist it.
///
/// # Errors
/// - Returns error if password is empty
pub fn derive_key(password: &[u8], salt: Option<&Salt>) -> Result<(MasterKey, Salt)> {
    let salt = salt.cloned().unwrap_or_else(Salt::generate);
    let key = derive_key_with_params(password, &salt, &KdfParams::standard())?;
    Ok((key, salt))
}

/// Derive a key with explicit parameters.
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if the iteration count is below [`MIN_ITERATIONS`]
///
/// # Security
/// - Password is not stored or logged
pub fn derive_key_with_params(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    params.validate()?;

    let mut key_bytes = [0u8; KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt.as_bytes(), params.iterations, &mut key_bytes);

    Ok(MasterKey::from_bytes(key_bytes))
}

/// Verify that a password produces the expected key.
///
/// This performs constant-time comparison to prevent timing attacks.
pub fn verify_password(
    password: &[u8],
    salt: &Salt,
    params: &KdfParams,
    expected: &MasterKey,
) -> Result<bool> {
    let derived = derive_key_with_params(password, salt, params)?;
    Ok(derived.as_bytes().ct_eq(expected.as_bytes()).into())
}

//! Hybrid public-key encryption for session-key exchange.
//!
//! Sealing generates an ephemeral X25519 keypair, derives a one-time
//! symmetric key from the ECDH shared secret with HKDF-SHA256, and encrypts
//! with XChaCha20-Poly1305. The sealed form is
//! `ephemeral_public (32) || nonce || ciphertext || tag`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::aead;
use crate::kdf::{derive_key_with_params, KdfParams};
use crate::keys::{Salt, SymmetricKey, KEY_LENGTH, SALT_LENGTH};
use medledger_common::{Error, Result};

const PUBLIC_KEY_LENGTH: usize = 32;
const HKDF_INFO: &[u8] = b"medledger hybrid seal v1";

/// X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Export as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Import from standard base64.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| Error::InvalidInput(format!("Invalid public key encoding: {}", e)))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput("Public key must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    /// Seal `data` so that only the holder of the matching private key can open it.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
        let recipient = x25519_dalek::PublicKey::from(self.0);

        let key = seal_key(&ephemeral, &recipient, ephemeral_public.as_bytes())?;
        let ciphertext = aead::encrypt(key.as_bytes(), data)?;

        let mut sealed = Vec::with_capacity(PUBLIC_KEY_LENGTH + ciphertext.len());
        sealed.extend_from_slice(ephemeral_public.as_bytes());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

/// X25519 keypair. The private half is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh keypair from system randomness.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(rand::rngs::OsRng))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    /// The public half.
    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// Open data sealed with [`PublicKey::encrypt`].
    ///
    /// # Errors
    /// - Returns `Decryption` if the input is malformed or was sealed to another key
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < PUBLIC_KEY_LENGTH + aead::NONCE_SIZE + aead::TAG_SIZE {
            return Err(Error::Decryption("Sealed data too short".to_string()));
        }
        let (ephemeral_bytes, ciphertext) = sealed.split_at(PUBLIC_KEY_LENGTH);
        let mut ephemeral = [0u8; PUBLIC_KEY_LENGTH];
        ephemeral.copy_from_slice(ephemeral_bytes);
        let ephemeral_public = x25519_dalek::PublicKey::from(ephemeral);

        let key = seal_key(&self.secret, &ephemeral_public, &ephemeral)?;
        aead::decrypt(key.as_bytes(), ciphertext)
    }

    /// Export the private key protected by a password.
    ///
    /// The blob is base64 of `salt || nonce || ciphertext || tag`.
    pub fn export_private(&self, password: &[u8]) -> Result<String> {
        let salt = Salt::generate();
        let wrapping = derive_key_with_params(password, &salt, &KdfParams::standard())?;
        let secret = Zeroizing::new(self.secret.to_bytes());
        let ciphertext = aead::encrypt(wrapping.as_bytes(), secret.as_slice())?;

        let mut blob = Vec::with_capacity(SALT_LENGTH + ciphertext.len());
        blob.extend_from_slice(salt.as_bytes());
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Import a private key exported with [`KeyPair::export_private`].
    ///
    /// # Errors
    /// - Returns `Decryption` if the password is wrong or the blob was altered
    pub fn import_private(password: &[u8], blob: &str) -> Result<Self> {
        let blob = STANDARD
            .decode(blob)
            .map_err(|e| Error::InvalidInput(format!("Invalid key blob encoding: {}", e)))?;
        if blob.len() < SALT_LENGTH {
            return Err(Error::Decryption("Key blob too short".to_string()));
        }
        let (salt_bytes, ciphertext) = blob.split_at(SALT_LENGTH);
        let mut salt = [0u8; SALT_LENGTH];
        salt.copy_from_slice(salt_bytes);

        let wrapping = derive_key_with_params(password, &Salt(salt), &KdfParams::standard())?;
        let secret = Zeroizing::new(aead::decrypt(wrapping.as_bytes(), ciphertext)?);
        let secret: [u8; KEY_LENGTH] = secret
            .as_slice()
            .try_into()
            .map_err(|_| Error::Decryption("Private key has wrong length".to_string()))?;
        Ok(Self::from_secret(StaticSecret::from(secret)))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair {{ public: {:?}, secret: [REDACTED] }}", self.public)
    }
}

fn seal_key(
    secret: &StaticSecret,
    peer: &x25519_dalek::PublicKey,
    ephemeral_public: &[u8; PUBLIC_KEY_LENGTH],
) -> Result<SymmetricKey> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(Error::Crypto("Non-contributory key exchange".to_string()));
    }
    let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(&ephemeral_public[..]), shared.as_bytes());
    let mut key = [0u8; KEY_LENGTH];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|e| Error::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(SymmetricKey::from_bytes(key))
}

/// Generate a fresh session key and seal it to `peer`.
///
/// Returns the session key for local use and the sealed form to send.
pub fn secure_key_exchange(peer: &PublicKey) -> Result<(SymmetricKey, Vec<u8>)> {
    let session_key = SymmetricKey::generate();
    let sealed = peer.encrypt(session_key.as_bytes())?;
    Ok((session_key, sealed))
}

/// Receive a session key produced by [`secure_key_exchange`].
pub fn open_session_key(keypair: &KeyPair, sealed: &[u8]) -> Result<SymmetricKey> {
    let bytes = Zeroizing::new(keypair.decrypt(sealed)?);
    SymmetricKey::from_slice(&bytes)
}

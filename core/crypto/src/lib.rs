//! Cryptographic primitives for MedLedger.
//!
//! This module provides:
//! - Password-based key derivation using PBKDF2-HMAC-SHA256
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Hybrid public-key sealing (X25519 + HKDF-SHA256 + XChaCha20-Poly1305)
//!   for session-key exchange
//! - SHA-256 hashing for block hashes and content fingerprints
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Authentication failures surface as `Error::Decryption`, never as
//!   truncated plaintext

pub mod aead;
pub mod exchange;
pub mod hash;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, decrypt_with_aad, encrypt, encrypt_with_aad};
pub use exchange::{open_session_key, secure_key_exchange, KeyPair, PublicKey};
pub use hash::{hash, Hasher};
pub use kdf::{derive_key, derive_key_with_params, verify_password, KdfParams};
pub use keys::{MasterKey, Salt, SymmetricKey, KEY_LENGTH, SALT_LENGTH};

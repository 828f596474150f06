//! Encrypted record store with access control and auditing.
//!
//! This module provides:
//! - Per-subject encrypted records, replaced whole on update
//! - A key ring holding per-subject data keys wrapped under the master key
//! - Revocable access grants consulted before every read, update and
//!   audit-log read
//! - Append-only per-record access logs, written before plaintext is served
//!
//! # Security Guarantees
//! - Plaintext never reaches storage or the log output
//! - A record's ciphertext is bound to its id; moving it to another slot
//!   fails authentication

pub mod access;
pub mod audit;
pub mod keyring;
pub mod record;
pub mod store;

mod encoding;

#[cfg(test)]
mod testing;

pub use access::{AccessControl, AccessGrant, DEFAULT_GRANT_DAYS, MAX_GRANT_DAYS};
pub use audit::{AccessLogEntry, PURPOSE_HISTORY, PURPOSE_UPDATE};
pub use keyring::{KeyPolicy, KeyRing};
pub use record::EncryptedRecord;
pub use store::RecordStore;

//! Common utilities and types shared across MedLedger crates.
//!
//! This module provides the error taxonomy and the identifier types that
//! cross component boundaries by value: subjects, records, digests and
//! storage keys.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Digest, RecordId, SensitiveBytes, StorageKey, SubjectId, DIGEST_LENGTH, MAX_SUBJECT_LEN,
};

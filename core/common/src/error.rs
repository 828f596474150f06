//! Common error types for MedLedger.

use thiserror::Error;

/// Top-level error type for MedLedger operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The accessor holds no active grant for the subject.
    #[error("Access denied: {accessor} may not access records of {subject}")]
    AccessDenied { subject: String, accessor: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ciphertext failed authentication or was malformed.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Ledger hash, link or difficulty mismatch.
    #[error("Integrity violation at block {index}: {reason}")]
    IntegrityViolation { index: u64, reason: String },

    /// Operation attempted before the required keys were initialized.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Cryptographic operation failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Every nonce was tried without satisfying the difficulty predicate.
    #[error("Mining exhausted the nonce space for block {0}")]
    MiningExhausted(u64),

    /// Mining was stopped before a nonce was found.
    #[error("Mining cancelled for block {0}")]
    MiningCancelled(u64),
}

impl Error {
    /// Build an `AccessDenied` error for a subject/accessor pair.
    pub fn access_denied(subject: impl ToString, accessor: impl ToString) -> Self {
        Self::AccessDenied {
            subject: subject.to_string(),
            accessor: accessor.to_string(),
        }
    }

    /// Whether this error reports an authorization failure.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Whether this error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

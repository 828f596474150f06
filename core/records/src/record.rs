//! A single encrypted record and its access log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AccessLogEntry;
use crate::encoding::base64_bytes;
use medledger_common::{Digest, RecordId, Result, SensitiveBytes, SubjectId};
use medledger_crypto::{decrypt_with_aad, encrypt_with_aad, SymmetricKey};

/// Ciphertext of one record version plus every access made to its slot.
///
/// The ciphertext is `nonce || encrypted payload || tag` and is bound to
/// the record id as associated data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub subject_id: SubjectId,
    pub index: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
    #[serde(with = "base64_bytes")]
    ciphertext: Vec<u8>,
    access_log: Vec<AccessLogEntry>,
}

impl EncryptedRecord {
    /// Encrypt `plaintext` as version 1 of the record at `index`.
    ///
    /// # Errors
    /// - `Crypto` if encryption fails
    pub fn seal(
        subject_id: SubjectId,
        index: u64,
        key: &SymmetricKey,
        plaintext: &[u8],
    ) -> Result<Self> {
        let aad = RecordId::new(subject_id.clone(), index).to_string();
        let ciphertext = encrypt_with_aad(key.as_bytes(), plaintext, aad.as_bytes())?;
        let now = Utc::now();

        Ok(Self {
            subject_id,
            index,
            created_at: now,
            updated_at: now,
            version: 1,
            ciphertext,
            access_log: Vec::new(),
        })
    }

    /// Build the next version holding `plaintext`.
    ///
    /// The new version inherits this record's access log and creation time.
    /// The old ciphertext is dropped with `self`.
    ///
    /// # Errors
    /// - `Crypto` if encryption fails
    pub fn replace(self, key: &SymmetricKey, plaintext: &[u8]) -> Result<Self> {
        let mut next = Self::seal(self.subject_id, self.index, key, plaintext)?;
        next.created_at = self.created_at;
        next.version = self.version.saturating_add(1);
        next.access_log = self.access_log;
        Ok(next)
    }

    /// Decrypt the record.
    ///
    /// # Errors
    /// - `Decryption` if the ciphertext fails authentication
    pub fn open(&self, key: &SymmetricKey) -> Result<SensitiveBytes> {
        let aad = self.id().to_string();
        let plaintext = decrypt_with_aad(key.as_bytes(), &self.ciphertext, aad.as_bytes())?;
        Ok(SensitiveBytes::new(plaintext))
    }

    /// The record's id.
    pub fn id(&self) -> RecordId {
        RecordId::new(self.subject_id.clone(), self.index)
    }

    /// SHA-256 of the ciphertext.
    pub fn fingerprint(&self) -> Digest {
        medledger_crypto::hash(&self.ciphertext)
    }

    /// Append an access entry.
    pub fn log_access(&mut self, entry: AccessLogEntry) {
        self.access_log.push(entry);
    }

    /// Drop the newest access entry after its write failed.
    pub(crate) fn unlog_access(&mut self) {
        self.access_log.pop();
    }

    /// Accesses in the order they happened.
    pub fn access_log(&self) -> &[AccessLogEntry] {
        &self.access_log
    }

    #[cfg(test)]
    pub(crate) fn ciphertext_mut(&mut self) -> &mut Vec<u8> {
        &mut self.ciphertext
    }
}

//! Reference-only ledger transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{Decoder, Encoder};
use medledger_common::{Digest, Error, RecordId, Result, SubjectId};

/// What happened to the referenced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadAction {
    /// A record was written for the first time.
    Created,
    /// A record was replaced by a new version.
    Updated,
    /// An existing record was anchored on request.
    Anchored,
}

impl PayloadAction {
    fn code(self) -> u8 {
        match self {
            Self::Created => 1,
            Self::Updated => 2,
            Self::Anchored => 3,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Created),
            2 => Ok(Self::Updated),
            3 => Ok(Self::Anchored),
            other => Err(Error::Serialization(format!(
                "Unknown payload action code {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PayloadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Anchored => "anchored",
        };
        f.write_str(s)
    }
}

/// Opaque reference to a record write. Never carries plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    pub action: PayloadAction,
    pub record_id: RecordId,
    /// SHA-256 of the record ciphertext at the time of the write.
    pub content_hash: Digest,
}

/// A transaction waiting in, or committed to, the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: SubjectId,
    pub recipient: SubjectId,
    pub payload: PayloadRef,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Create a transaction stamped with the current time.
    pub fn new(sender: SubjectId, recipient: SubjectId, payload: PayloadRef) -> Self {
        Self {
            sender,
            recipient,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.put_str(self.sender.as_str())?;
        enc.put_str(self.recipient.as_str())?;
        enc.put_u8(self.payload.action.code());
        enc.put_str(self.payload.record_id.subject.as_str())?;
        enc.put_u64(self.payload.record_id.index);
        enc.put_digest(&self.payload.content_hash);
        enc.put_timestamp(&self.timestamp)
    }

    pub(crate) fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let sender = SubjectId::new(dec.string()?)?;
        let recipient = SubjectId::new(dec.string()?)?;
        let action = PayloadAction::from_code(dec.u8()?)?;
        let record_subject = SubjectId::new(dec.string()?)?;
        let record_index = dec.u64()?;
        let content_hash = dec.digest()?;
        let timestamp = dec.timestamp()?;

        Ok(Self {
            sender,
            recipient,
            payload: PayloadRef {
                action,
                record_id: RecordId::new(record_subject, record_index),
                content_hash,
            },
            timestamp,
        })
    }
}

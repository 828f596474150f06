//! Per-record access log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medledger_common::SubjectId;

/// Purpose recorded for every record traversed by a history read.
pub const PURPOSE_HISTORY: &str = "History review";

/// Purpose recorded when a record is replaced.
pub const PURPOSE_UPDATE: &str = "Record update";

/// One access to one record. Appended, never changed or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub accessor_id: SubjectId,
    pub timestamp: DateTime<Utc>,
    pub purpose: String,
}

impl AccessLogEntry {
    /// Entry stamped with the current time.
    pub fn now(accessor_id: SubjectId, purpose: impl Into<String>) -> Self {
        Self {
            accessor_id,
            timestamp: Utc::now(),
            purpose: purpose.into(),
        }
    }
}

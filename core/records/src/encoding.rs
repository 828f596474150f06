//! Storage naming and serde helpers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use medledger_common::{Error, Result, StorageKey, SubjectId};

/// Storage-safe name for a subject id.
pub(crate) fn subject_name(subject: &SubjectId) -> String {
    URL_SAFE_NO_PAD.encode(subject.as_str())
}

/// Inverse of [`subject_name`].
pub(crate) fn subject_from_name(name: &str) -> Result<SubjectId> {
    let bytes = URL_SAFE_NO_PAD
        .decode(name)
        .map_err(|e| Error::Serialization(format!("Invalid subject file name '{}': {}", name, e)))?;
    let id = String::from_utf8(bytes)
        .map_err(|e| Error::Serialization(format!("Invalid subject file name '{}': {}", name, e)))?;
    SubjectId::new(id)
}

/// `<dir>/<encoded subject><suffix>`
pub(crate) fn subject_key(dir: &str, subject: &SubjectId, suffix: &str) -> Result<StorageKey> {
    StorageKey::parse(dir)?.join(&format!("{}{}", subject_name(subject), suffix))
}

/// Serde adapter storing bytes as unpadded base64url.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

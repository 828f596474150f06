//! Common types used throughout MedLedger.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroize;

/// Length of a digest in bytes (SHA-256).
pub const DIGEST_LENGTH: usize = 32;

/// Maximum length of a subject identifier in bytes.
///
/// Subject files are named by the unpadded base64url of the id plus a
/// `.json` suffix; 187 bytes encode to 250 characters, keeping the name
/// within the common 255-byte filename limit.
pub const MAX_SUBJECT_LEN: usize = 187;

/// Identifier of a subject or accessor.
///
/// Subjects own records; accessors read them. Both live in the same
/// namespace, so an accessor whose id equals the subject id is the subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a new SubjectId from a string.
    ///
    /// # Preconditions
    /// - `id` must be non-empty and at most [`MAX_SUBJECT_LEN`] bytes
    /// - `id` must not contain control characters
    ///
    /// # Errors
    /// - Returns `InvalidInput` if the id violates a precondition
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "SubjectId cannot be empty".to_string(),
            ));
        }
        if id.len() > MAX_SUBJECT_LEN {
            return Err(crate::Error::InvalidInput(format!(
                "SubjectId longer than {} bytes",
                MAX_SUBJECT_LEN
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(crate::Error::InvalidInput(
                "SubjectId cannot contain control characters".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubjectId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored record: the owning subject plus its sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub subject: SubjectId,
    pub index: u64,
}

impl RecordId {
    /// Create a record id.
    pub fn new(subject: SubjectId, index: u64) -> Self {
        Self { subject, index }
    }

    /// Parse the `subject/index` form produced by `Display`.
    ///
    /// The index is taken after the last `/`, so subjects may contain slashes.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (subject, index) = s.rsplit_once('/').ok_or_else(|| {
            crate::Error::InvalidInput(format!("Record id '{}' is not subject/index", s))
        })?;
        let index = index.parse::<u64>().map_err(|_| {
            crate::Error::InvalidInput(format!("Record index '{}' is not a number", index))
        })?;
        Ok(Self::new(SubjectId::new(subject)?, index))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject, self.index)
    }
}

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// The all-zero digest, used as the genesis block's previous hash.
    pub const ZERO: Self = Self([0u8; DIGEST_LENGTH]);

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid digest hex: {}", e)))?;
        let bytes: [u8; DIGEST_LENGTH] = bytes.try_into().map_err(|_| {
            crate::Error::InvalidInput(format!("Digest must be {} bytes", DIGEST_LENGTH))
        })?;
        Ok(Self(bytes))
    }

    /// Number of leading zero hex digits.
    pub fn leading_zero_nibbles(&self) -> u32 {
        let mut count = 0;
        for byte in self.0 {
            if byte == 0 {
                count += 2;
                continue;
            }
            if byte >> 4 == 0 {
                count += 1;
            }
            break;
        }
        count
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A key within a storage backend, independent of the underlying medium.
///
/// Keys are `/`-separated component lists such as `records/YWxpY2U.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    components: Vec<String>,
}

impl StorageKey {
    /// Create a key from string components.
    ///
    /// # Errors
    /// - Returns error if the list is empty or a component is empty,
    ///   contains a separator, or is a relative marker
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        if components.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Storage key cannot be empty".to_string(),
            ));
        }
        for comp in &components {
            Self::validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a key string using '/' as separator.
    pub fn parse(key: &str) -> crate::Result<Self> {
        let key = key.trim_start_matches('/').trim_end_matches('/');
        let components: Vec<String> = key.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    fn validate_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Key component cannot be empty".to_string(),
            ));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Key component cannot contain separators".to_string(),
            ));
        }
        if comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(
                "Key component cannot be a relative marker".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the parent key (the "directory"), if any.
    pub fn parent(&self) -> Option<Self> {
        if self.components.len() <= 1 {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the last component.
    pub fn name(&self) -> &str {
        self.components.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Join this key with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Whether this key lives directly under `prefix`.
    pub fn is_child_of(&self, prefix: &StorageKey) -> bool {
        self.components.len() == prefix.components.len() + 1
            && self.components.starts_with(&prefix.components)
    }

    /// Get the key components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to a string representation.
    pub fn to_string_key(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_subject_id_creation() {
        let id = SubjectId::new("alice").unwrap();
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_subject_id_rejects_bad_input() {
        assert!(SubjectId::new("").is_err());
        assert!(SubjectId::new("a\nb").is_err());
        assert!(SubjectId::new("x".repeat(MAX_SUBJECT_LEN)).is_ok());
        assert!(SubjectId::new("x".repeat(MAX_SUBJECT_LEN + 1)).is_err());
    }

    #[test]
    fn test_subject_id_deserialize_validates() {
        let ok: SubjectId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<SubjectId>("\"\"").is_err());
    }

    #[test]
    fn test_record_id_display_and_parse() {
        let id = RecordId::new(SubjectId::new("clinic/alice").unwrap(), 7);
        assert_eq!(id.to_string(), "clinic/alice/7");

        let parsed = RecordId::parse("clinic/alice/7").unwrap();
        assert_eq!(parsed, id);

        assert!(RecordId::parse("alice").is_err());
        assert!(RecordId::parse("alice/x").is_err());
    }

    #[test]
    fn test_digest_hex() {
        let mut bytes = [0u8; DIGEST_LENGTH];
        bytes[31] = 0xab;
        let digest = Digest::from_bytes(bytes);
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.ends_with("ab"));
        assert_eq!(Digest::from_hex(&hex).unwrap(), digest);
        assert!(Digest::from_hex("abcd").is_err());
    }

    #[test]
    fn test_digest_leading_zero_nibbles() {
        assert_eq!(Digest::ZERO.leading_zero_nibbles(), 64);

        let mut bytes = [0xffu8; DIGEST_LENGTH];
        assert_eq!(Digest::from_bytes(bytes).leading_zero_nibbles(), 0);

        bytes[0] = 0x00;
        bytes[1] = 0x0f;
        assert_eq!(Digest::from_bytes(bytes).leading_zero_nibbles(), 3);
    }

    #[test]
    fn test_storage_key_parse_and_join() {
        let key = StorageKey::parse("ledger/chain.bin").unwrap();
        assert_eq!(key.components(), &["ledger", "chain.bin"]);
        assert_eq!(key.name(), "chain.bin");
        assert_eq!(key.parent().unwrap().to_string_key(), "ledger");

        let joined = StorageKey::parse("records").unwrap().join("a.json").unwrap();
        assert_eq!(joined.to_string_key(), "records/a.json");
        assert!(joined.is_child_of(&StorageKey::parse("records").unwrap()));
    }

    #[test]
    fn test_storage_key_rejects_traversal() {
        assert!(StorageKey::parse("").is_err());
        assert!(StorageKey::parse("records/../etc").is_err());
        assert!(StorageKey::parse("records").unwrap().join("..").is_err());
    }

    proptest! {
        #[test]
        fn prop_digest_hex_roundtrip(bytes in proptest::array::uniform32(any::<u8>())) {
            let digest = Digest::from_bytes(bytes);
            prop_assert_eq!(Digest::from_hex(&digest.to_hex()).unwrap(), digest);
        }
    }
}

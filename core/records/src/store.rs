//! The record store.
//!
//! Records are grouped per subject. Each subject's list sits behind its own
//! mutex inside a store-wide map, so different subjects never block each
//! other while writers to one subject serialize. Creates and updates are
//! staged on a copy, persisted, and only then made visible. Reads append
//! their log entries in place and take them back if the write fails. Either
//! way a failed write leaves the in-memory state unchanged.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::access::AccessControl;
use crate::audit::{AccessLogEntry, PURPOSE_HISTORY, PURPOSE_UPDATE};
use crate::encoding::{subject_from_name, subject_key};
use crate::keyring::KeyRing;
use crate::record::EncryptedRecord;
use medledger_common::{Digest, Error, RecordId, Result, SensitiveBytes, StorageKey, SubjectId};
use medledger_storage::StorageBackend;

const RECORDS_DIR: &str = "records";
const RECORD_FILE_SUFFIX: &str = ".json";

type Slot = Arc<Mutex<Vec<EncryptedRecord>>>;

/// Encrypted per-subject record lists with access checks and audit logs.
pub struct RecordStore {
    subjects: RwLock<HashMap<SubjectId, Slot>>,
    keyring: Arc<KeyRing>,
    access: Arc<AccessControl>,
    backend: Arc<dyn StorageBackend>,
}

impl RecordStore {
    /// Create an empty store.
    pub fn new(
        keyring: Arc<KeyRing>,
        access: Arc<AccessControl>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            subjects: RwLock::new(HashMap::new()),
            keyring,
            access,
            backend,
        }
    }

    /// Load every stored subject from `backend`.
    ///
    /// # Errors
    /// - `Serialization` if a subject file is corrupt or out of order
    pub fn load(
        keyring: Arc<KeyRing>,
        access: Arc<AccessControl>,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        let mut subjects = HashMap::new();
        for key in backend.list(&StorageKey::parse(RECORDS_DIR)?)? {
            let Some(name) = key.name().strip_suffix(RECORD_FILE_SUFFIX) else {
                warn!(key = %key, "Skipping unexpected file in records directory");
                continue;
            };
            let subject = subject_from_name(name)?;
            let records: Vec<EncryptedRecord> = serde_json::from_slice(&backend.get(&key)?)?;

            for (position, record) in records.iter().enumerate() {
                if record.subject_id != subject || record.index != position as u64 {
                    return Err(Error::Serialization(format!(
                        "Record file for {} holds {} at position {}",
                        subject,
                        record.id(),
                        position
                    )));
                }
            }
            subjects.insert(subject, Arc::new(Mutex::new(records)));
        }
        debug!(subjects = subjects.len(), "Loaded record store");

        Ok(Self {
            subjects: RwLock::new(subjects),
            keyring,
            access,
            backend,
        })
    }

    /// The access control this store consults.
    pub fn access(&self) -> &Arc<AccessControl> {
        &self.access
    }

    fn slot(&self, subject: &SubjectId) -> Option<Slot> {
        self.subjects.read().get(subject).cloned()
    }

    fn slot_or_create(&self, subject: &SubjectId) -> Slot {
        if let Some(slot) = self.slot(subject) {
            return slot;
        }
        self.subjects
            .write()
            .entry(subject.clone())
            .or_default()
            .clone()
    }

    fn persist_subject(&self, subject: &SubjectId, records: &[EncryptedRecord]) -> Result<()> {
        let key = subject_key(RECORDS_DIR, subject, RECORD_FILE_SUFFIX)?;
        self.backend.put(&key, serde_json::to_vec(records)?)
    }

    fn not_found(subject: &SubjectId, index: u64) -> Error {
        Error::NotFound(format!("Record {}", RecordId::new(subject.clone(), index)))
    }

    /// Encrypt and append a record for `subject`.
    ///
    /// The subject may always write its own records; anyone else needs an
    /// active grant.
    ///
    /// # Errors
    /// - `AccessDenied` if `accessor` is not the subject and holds no grant
    /// - `Configuration` if the key ring is locked
    /// - Storage failure
    pub fn add_record(
        &self,
        subject: &SubjectId,
        accessor: &SubjectId,
        plaintext: &[u8],
    ) -> Result<RecordId> {
        self.access.require(subject, accessor)?;
        let key = self.keyring.data_key(subject)?;

        let slot = self.slot_or_create(subject);
        let mut records = slot.lock();
        let index = records.len() as u64;

        let mut staged = records.clone();
        staged.push(EncryptedRecord::seal(subject.clone(), index, &key, plaintext)?);
        self.persist_subject(subject, &staged)?;
        *records = staged;

        let id = RecordId::new(subject.clone(), index);
        info!(record = %id, accessor = %accessor, "Created record");
        Ok(id)
    }

    /// Decrypt one record, logging the access first.
    ///
    /// The access entry is persisted before any plaintext is produced.
    ///
    /// # Errors
    /// - `AccessDenied` if the check fails
    /// - `NotFound` if there is no record at `index`
    /// - `Decryption` if the ciphertext fails authentication
    pub fn get_record(
        &self,
        subject: &SubjectId,
        index: u64,
        accessor: &SubjectId,
        purpose: &str,
    ) -> Result<SensitiveBytes> {
        self.access.require(subject, accessor)?;
        let slot = self
            .slot(subject)
            .ok_or_else(|| Self::not_found(subject, index))?;

        let mut records = slot.lock();
        let position = usize::try_from(index)
            .ok()
            .filter(|p| *p < records.len())
            .ok_or_else(|| Self::not_found(subject, index))?;
        let key = self.keyring.data_key(subject)?;

        records[position].log_access(AccessLogEntry::now(accessor.clone(), purpose));
        if let Err(e) = self.persist_subject(subject, &records) {
            records[position].unlog_access();
            return Err(e);
        }

        debug!(subject = %subject, index, accessor = %accessor, purpose, "Record read");
        records[position].open(&key)
    }

    /// Decrypt every record of `subject` in creation order.
    ///
    /// One access entry is logged per record before anything is decrypted.
    ///
    /// # Errors
    /// - `AccessDenied` if the check fails
    /// - `Decryption` if any ciphertext fails authentication; no partial
    ///   history is returned
    pub fn get_history(
        &self,
        subject: &SubjectId,
        accessor: &SubjectId,
    ) -> Result<Vec<SensitiveBytes>> {
        self.access.require(subject, accessor)?;
        let Some(slot) = self.slot(subject) else {
            return Ok(Vec::new());
        };

        let mut records = slot.lock();
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let key = self.keyring.data_key(subject)?;

        for record in records.iter_mut() {
            record.log_access(AccessLogEntry::now(accessor.clone(), PURPOSE_HISTORY));
        }
        if let Err(e) = self.persist_subject(subject, &records) {
            records.iter_mut().for_each(EncryptedRecord::unlog_access);
            return Err(e);
        }

        debug!(subject = %subject, accessor = %accessor, records = records.len(), "History read");
        records.iter().map(|record| record.open(&key)).collect()
    }

    /// Replace the record at `index` with a new encryption of `plaintext`.
    ///
    /// Returns `false` without touching anything if there is no record at
    /// `index`. The new version inherits the old access log plus one update
    /// entry.
    ///
    /// # Errors
    /// - `AccessDenied` if the check fails
    /// - `Configuration` if the key ring is locked
    pub fn update_record(
        &self,
        subject: &SubjectId,
        index: u64,
        accessor: &SubjectId,
        plaintext: &[u8],
    ) -> Result<bool> {
        self.access.require(subject, accessor)?;
        let Some(slot) = self.slot(subject) else {
            return Ok(false);
        };

        let mut records = slot.lock();
        let Some(position) = usize::try_from(index).ok().filter(|p| *p < records.len()) else {
            return Ok(false);
        };
        let key = self.keyring.data_key(subject)?;

        let mut staged = records.clone();
        let mut next = staged[position].clone().replace(&key, plaintext)?;
        next.log_access(AccessLogEntry::now(accessor.clone(), PURPOSE_UPDATE));
        staged[position] = next;
        self.persist_subject(subject, &staged)?;
        *records = staged;

        info!(
            record = %records[position].id(),
            version = records[position].version,
            accessor = %accessor,
            "Updated record"
        );
        Ok(true)
    }

    /// Every access entry for `subject`, record by record in creation order.
    ///
    /// # Errors
    /// - `AccessDenied` if the check fails
    pub fn get_access_log(
        &self,
        subject: &SubjectId,
        accessor: &SubjectId,
    ) -> Result<Vec<AccessLogEntry>> {
        self.access.require(subject, accessor)?;
        let Some(slot) = self.slot(subject) else {
            return Ok(Vec::new());
        };

        let records = slot.lock();
        Ok(records
            .iter()
            .flat_map(|record| record.access_log().iter().cloned())
            .collect())
    }

    /// Access entries of a single record.
    ///
    /// # Errors
    /// - `AccessDenied` if the check fails
    /// - `NotFound` if there is no such record
    pub fn record_access_log(
        &self,
        id: &RecordId,
        accessor: &SubjectId,
    ) -> Result<Vec<AccessLogEntry>> {
        self.access.require(&id.subject, accessor)?;
        self.with_record(id, |record| record.access_log().to_vec())
    }

    /// SHA-256 of the current ciphertext of `id`.
    ///
    /// Needs no grant: the fingerprint says nothing about the plaintext.
    ///
    /// # Errors
    /// - `NotFound` if there is no such record
    pub fn fingerprint(&self, id: &RecordId) -> Result<Digest> {
        self.with_record(id, EncryptedRecord::fingerprint)
    }

    fn with_record<T>(&self, id: &RecordId, f: impl FnOnce(&EncryptedRecord) -> T) -> Result<T> {
        let slot = self
            .slot(&id.subject)
            .ok_or_else(|| Self::not_found(&id.subject, id.index))?;
        let records = slot.lock();
        usize::try_from(id.index)
            .ok()
            .and_then(|p| records.get(p))
            .map(f)
            .ok_or_else(|| Self::not_found(&id.subject, id.index))
    }

    /// Number of records stored for `subject`.
    pub fn record_count(&self, subject: &SubjectId) -> usize {
        self.slot(subject).map_or(0, |slot| slot.lock().len())
    }

    /// Subjects with at least one record, sorted.
    pub fn subjects(&self) -> Vec<SubjectId> {
        let mut subjects: Vec<SubjectId> = self
            .subjects
            .read()
            .iter()
            .filter(|(_, slot)| !slot.lock().is_empty())
            .map(|(subject, _)| subject.clone())
            .collect();
        subjects.sort();
        subjects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::KeyPolicy;
    use crate::testing::FlakyBackend;
    use medledger_common::MAX_SUBJECT_LEN;
    use medledger_crypto::MasterKey;
    use medledger_storage::{LocalBackend, MemoryBackend};
    use tempfile::TempDir;

    fn id(s: &str) -> SubjectId {
        SubjectId::new(s).unwrap()
    }

    fn open_store(backend: Arc<dyn StorageBackend>) -> RecordStore {
        let keyring = Arc::new(KeyRing::unlocked(
            KeyPolicy::PerSubject,
            backend.clone(),
            MasterKey::from_bytes([9u8; 32]),
        ));
        let access = Arc::new(AccessControl::load(backend.clone()).unwrap());
        RecordStore::load(keyring, access, backend).unwrap()
    }

    fn store() -> RecordStore {
        open_store(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_indices_are_sequential_per_subject() {
        let store = store();
        assert_eq!(store.add_record(&id("alice"), &id("alice"), b"a").unwrap().index, 0);
        assert_eq!(store.add_record(&id("alice"), &id("alice"), b"b").unwrap().index, 1);
        assert_eq!(store.add_record(&id("bob"), &id("bob"), b"c").unwrap().index, 0);
        assert_eq!(store.record_count(&id("alice")), 2);
        assert_eq!(store.subjects(), vec![id("alice"), id("bob")]);
    }

    #[test]
    fn test_foreign_write_needs_grant() {
        let store = store();
        let err = store.add_record(&id("alice"), &id("bob"), b"x").unwrap_err();
        assert!(err.is_access_denied());
        assert_eq!(store.record_count(&id("alice")), 0);

        store.access().grant(&id("alice"), &id("bob")).unwrap();
        assert!(store.add_record(&id("alice"), &id("bob"), b"x").is_ok());
    }

    #[test]
    fn test_read_logs_before_serving() {
        let store = store();
        store.add_record(&id("alice"), &id("alice"), b"payload").unwrap();

        let plaintext = store.get_record(&id("alice"), 0, &id("alice"), "review").unwrap();
        assert_eq!(plaintext.as_bytes(), b"payload");

        let log = store.get_access_log(&id("alice"), &id("alice")).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].purpose, "review");
    }

    #[test]
    fn test_denied_and_missing_are_distinct() {
        let store = store();
        store.add_record(&id("alice"), &id("alice"), b"x").unwrap();

        let denied = store.get_record(&id("alice"), 0, &id("bob"), "peek").unwrap_err();
        assert!(denied.is_access_denied());

        let missing = store.get_record(&id("alice"), 5, &id("alice"), "peek").unwrap_err();
        assert!(missing.is_not_found());

        let nobody = store.get_record(&id("carol"), 0, &id("carol"), "peek").unwrap_err();
        assert!(nobody.is_not_found());

        // Failed reads leave no trace.
        assert!(store.get_access_log(&id("alice"), &id("alice")).unwrap().is_empty());
    }

    #[test]
    fn test_grant_then_revoke() {
        let store = store();
        store.add_record(&id("alice"), &id("alice"), b"x").unwrap();

        store.access().grant(&id("alice"), &id("bob")).unwrap();
        assert!(store.get_record(&id("alice"), 0, &id("bob"), "consult").is_ok());

        store.access().revoke(&id("alice"), &id("bob")).unwrap();
        let err = store.get_record(&id("alice"), 0, &id("bob"), "consult").unwrap_err();
        assert!(err.is_access_denied());
    }

    #[test]
    fn test_history_logs_each_record() {
        let store = store();
        let payloads: [&[u8]; 3] = [b"one", b"two", b"three"];
        for payload in payloads {
            store.add_record(&id("alice"), &id("alice"), payload).unwrap();
        }

        let history = store.get_history(&id("alice"), &id("alice")).unwrap();
        let texts: Vec<&[u8]> = history.iter().map(|p| p.as_bytes()).collect();
        assert_eq!(texts, payloads.to_vec());

        let log = store.get_access_log(&id("alice"), &id("alice")).unwrap();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|e| e.purpose == PURPOSE_HISTORY));

        assert!(store.get_history(&id("nobody"), &id("nobody")).unwrap().is_empty());
    }

    #[test]
    fn test_update_semantics() {
        let store = store();
        store.add_record(&id("alice"), &id("alice"), b"v1").unwrap();
        store.get_record(&id("alice"), 0, &id("alice"), "check").unwrap();
        let before = store.fingerprint(&RecordId::new(id("alice"), 0)).unwrap();

        assert!(!store.update_record(&id("alice"), 3, &id("alice"), b"nope").unwrap());
        assert!(!store.update_record(&id("carol"), 0, &id("carol"), b"nope").unwrap());
        assert_eq!(store.record_count(&id("alice")), 1);
        assert_eq!(store.fingerprint(&RecordId::new(id("alice"), 0)).unwrap(), before);

        assert!(store.update_record(&id("alice"), 0, &id("alice"), b"v2").unwrap());
        let log = store
            .record_access_log(&RecordId::new(id("alice"), 0), &id("alice"))
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].purpose, PURPOSE_UPDATE);

        let plaintext = store.get_record(&id("alice"), 0, &id("alice"), "check").unwrap();
        assert_eq!(plaintext.as_bytes(), b"v2");
    }

    #[test]
    fn test_update_requires_grant() {
        let store = store();
        store.add_record(&id("alice"), &id("alice"), b"v1").unwrap();
        let err = store.update_record(&id("alice"), 0, &id("bob"), b"v2").unwrap_err();
        assert!(err.is_access_denied());
        // Denial wins over a missing index.
        let err = store.update_record(&id("alice"), 9, &id("bob"), b"v2").unwrap_err();
        assert!(err.is_access_denied());
    }

    #[test]
    fn test_access_log_requires_grant() {
        let store = store();
        store.add_record(&id("alice"), &id("alice"), b"x").unwrap();
        assert!(store.get_access_log(&id("alice"), &id("bob")).unwrap_err().is_access_denied());
    }

    #[test]
    fn test_locked_keyring_fails_fast() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let keyring = Arc::new(KeyRing::new(KeyPolicy::PerSubject, backend.clone()));
        let access = Arc::new(AccessControl::load(backend.clone()).unwrap());
        let store = RecordStore::new(keyring, access, backend);

        let err = store.add_record(&id("alice"), &id("alice"), b"x").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_state_survives_reopen() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        {
            let store = open_store(backend.clone());
            store.add_record(&id("alice"), &id("alice"), b"persisted").unwrap();
            store.access().grant(&id("alice"), &id("bob")).unwrap();
            store.get_record(&id("alice"), 0, &id("bob"), "consult").unwrap();
        }

        let store = open_store(backend);
        assert_eq!(store.record_count(&id("alice")), 1);
        let plaintext = store.get_record(&id("alice"), 0, &id("bob"), "again").unwrap();
        assert_eq!(plaintext.as_bytes(), b"persisted");
        assert_eq!(store.get_access_log(&id("alice"), &id("alice")).unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_writers_get_distinct_indices() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .add_record(&id("alice"), &id("alice"), format!("{}", i).as_bytes())
                        .unwrap()
                        .index
                })
            })
            .collect();

        let mut indices: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_longest_subject_survives_local_reopen() {
        let temp = TempDir::new().unwrap();
        let long = id(&"p".repeat(MAX_SUBJECT_LEN));
        {
            let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(temp.path()).unwrap());
            let store = open_store(backend);
            store.add_record(&long, &long, b"long name").unwrap();
        }

        let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(temp.path()).unwrap());
        let store = open_store(backend);
        assert_eq!(store.subjects(), vec![long.clone()]);
        let plaintext = store.get_record(&long, 0, &long, "check").unwrap();
        assert_eq!(plaintext.as_bytes(), b"long name");
    }

    #[test]
    fn test_failed_log_write_serves_nothing() {
        let backend = Arc::new(FlakyBackend::new());
        let store = open_store(backend.clone());
        store.add_record(&id("alice"), &id("alice"), b"one").unwrap();
        store.add_record(&id("alice"), &id("alice"), b"two").unwrap();

        backend.set_failing(true);
        assert!(store.get_record(&id("alice"), 0, &id("alice"), "peek").is_err());
        assert!(store.get_history(&id("alice"), &id("alice")).is_err());
        assert!(store.update_record(&id("alice"), 0, &id("alice"), b"new").is_err());

        backend.set_failing(false);
        assert!(store.get_access_log(&id("alice"), &id("alice")).unwrap().is_empty());
        let plaintext = store.get_record(&id("alice"), 0, &id("alice"), "peek").unwrap();
        assert_eq!(plaintext.as_bytes(), b"one");
    }
}

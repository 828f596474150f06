//! The core call surface: records, grants, audit and the ledger.

use serde_json::Value;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{CoreConfig, CONFIG_FILENAME};
use medledger_common::{Error, RecordId, Result, StorageKey, SubjectId};
use medledger_crypto::MasterKey;
use medledger_ledger::{Block, Difficulty, Ledger, PayloadAction, PayloadRef, Transaction};
use medledger_records::{AccessControl, AccessGrant, AccessLogEntry, KeyPolicy, KeyRing, RecordStore};
use medledger_storage::StorageBackend;

/// An open medical record ledger.
///
/// Every record write is anchored: a reference-only transaction carrying
/// the record id and a fingerprint of its ciphertext is queued on the
/// ledger. Payloads cross this boundary as JSON values.
///
/// The master key lives in the key ring and is zeroized when the handle is
/// dropped or [`MedLedger::lock`] is called.
pub struct MedLedger {
    config: Option<CoreConfig>,
    backend: Arc<dyn StorageBackend>,
    keyring: Arc<KeyRing>,
    records: RecordStore,
    ledger: Ledger,
}

impl MedLedger {
    /// Open the state stored on `backend` with an already derived key.
    ///
    /// # Errors
    /// - `Serialization` if stored state is corrupt
    pub fn open_with_key(
        backend: Arc<dyn StorageBackend>,
        master_key: MasterKey,
        difficulty: Difficulty,
        key_policy: KeyPolicy,
    ) -> Result<Self> {
        let keyring = Arc::new(KeyRing::unlocked(key_policy, backend.clone(), master_key));
        let access = Arc::new(AccessControl::load(backend.clone())?);
        let records = RecordStore::load(keyring.clone(), access, backend.clone())?;
        let ledger = Ledger::load(backend.as_ref(), difficulty)?;

        info!(
            backend = backend.name(),
            blocks = ledger.len(),
            subjects = records.subjects().len(),
            "Opened record ledger"
        );

        Ok(Self {
            config: None,
            backend,
            keyring,
            records,
            ledger,
        })
    }

    pub(crate) fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The stored configuration, if opened through the manager.
    pub fn config(&self) -> Option<&CoreConfig> {
        self.config.as_ref()
    }

    /// The storage backend holding this ledger's state.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Encrypt and store `payload` for `subject`, then anchor the write.
    ///
    /// The record is stored before the anchor is queued. If saving the
    /// ledger then fails, the record and its queued anchor both stay in
    /// place and the storage error is returned; the next successful
    /// [`MedLedger::flush`] or write persists the anchor.
    ///
    /// # Errors
    /// - `AccessDenied` if `accessor` is not the subject and holds no grant
    /// - `Configuration` if the store is locked
    /// - Storage failure while saving the ledger, after the record is stored
    pub fn create_record(
        &self,
        subject: &SubjectId,
        accessor: &SubjectId,
        payload: &Value,
    ) -> Result<RecordId> {
        let bytes = serde_json::to_vec(payload)?;
        let id = self.records.add_record(subject, accessor, &bytes)?;
        self.anchor_write(accessor, &id, PayloadAction::Created)?;
        Ok(id)
    }

    /// Read one record, logging the access with `purpose` first.
    ///
    /// # Errors
    /// - `AccessDenied` if the accessor holds no active grant
    /// - `NotFound` if there is no record at `index`
    /// - `Decryption` if the record fails authentication
    pub fn read_record(
        &self,
        subject: &SubjectId,
        index: u64,
        accessor: &SubjectId,
        purpose: &str,
    ) -> Result<Value> {
        let plaintext = self.records.get_record(subject, index, accessor, purpose)?;
        Ok(serde_json::from_slice(plaintext.as_bytes())?)
    }

    /// Read every record of `subject` in creation order.
    ///
    /// # Errors
    /// - `AccessDenied` if the accessor holds no active grant
    pub fn read_history(&self, subject: &SubjectId, accessor: &SubjectId) -> Result<Vec<Value>> {
        self.records
            .get_history(subject, accessor)?
            .iter()
            .map(|plaintext| serde_json::from_slice(plaintext.as_bytes()).map_err(Error::from))
            .collect()
    }

    /// Replace the record at `index`. Returns `false` if there is none.
    ///
    /// A ledger save failure after the replacement is stored behaves as in
    /// [`MedLedger::create_record`].
    ///
    /// # Errors
    /// - `AccessDenied` if the accessor holds no active grant
    /// - Storage failure while saving the ledger, after the record is replaced
    pub fn update_record(
        &self,
        subject: &SubjectId,
        index: u64,
        accessor: &SubjectId,
        payload: &Value,
    ) -> Result<bool> {
        let bytes = serde_json::to_vec(payload)?;
        if !self.records.update_record(subject, index, accessor, &bytes)? {
            debug!(subject = %subject, index, "Update target missing");
            return Ok(false);
        }
        let id = RecordId::new(subject.clone(), index);
        self.anchor_write(accessor, &id, PayloadAction::Updated)?;
        Ok(true)
    }

    /// Let `accessor` read `subject`'s records until revoked.
    pub fn grant_access(&self, subject: &SubjectId, accessor: &SubjectId) -> Result<()> {
        self.records.access().grant(subject, accessor)
    }

    /// Let `accessor` read `subject`'s records for `days` days.
    ///
    /// # Errors
    /// - `InvalidInput` if `days` is outside 1..=365
    pub fn grant_access_for(
        &self,
        subject: &SubjectId,
        accessor: &SubjectId,
        days: u32,
    ) -> Result<()> {
        self.records.access().grant_for(subject, accessor, days)
    }

    /// Withdraw `accessor`'s grant. A missing grant is not an error.
    pub fn revoke_access(&self, subject: &SubjectId, accessor: &SubjectId) -> Result<()> {
        self.records.access().revoke(subject, accessor)
    }

    /// Every grant made for `subject`, including revoked ones.
    pub fn grants(&self, subject: &SubjectId) -> Vec<AccessGrant> {
        self.records.access().grants_for(subject)
    }

    /// The access log of every record of `subject`, in creation order.
    ///
    /// # Errors
    /// - `AccessDenied` if the accessor holds no active grant
    pub fn read_audit_log(
        &self,
        subject: &SubjectId,
        accessor: &SubjectId,
    ) -> Result<Vec<AccessLogEntry>> {
        self.records.get_access_log(subject, accessor)
    }

    /// Queue an explicit anchor of the record's current ciphertext.
    ///
    /// Returns the index of the block that will hold the anchor.
    ///
    /// # Errors
    /// - `NotFound` if there is no such record
    pub fn anchor(&self, subject: &SubjectId, index: u64) -> Result<u64> {
        let id = RecordId::new(subject.clone(), index);
        self.anchor_write(subject, &id, PayloadAction::Anchored)
    }

    fn anchor_write(&self, sender: &SubjectId, id: &RecordId, action: PayloadAction) -> Result<u64> {
        let payload = PayloadRef {
            action,
            record_id: id.clone(),
            content_hash: self.records.fingerprint(id)?,
        };
        let block_index = self
            .ledger
            .add_transaction(sender.clone(), id.subject.clone(), payload);
        self.ledger.save(self.backend.as_ref())?;
        Ok(block_index)
    }

    /// Mine pending anchors into a block and persist the chain.
    ///
    /// # Errors
    /// - `MiningExhausted` if no nonce satisfies the difficulty
    pub fn mine(&self, miner: &SubjectId) -> Result<Block> {
        self.mine_cancellable(miner, &AtomicBool::new(false))
    }

    /// [`MedLedger::mine`], stopping early once `cancel` is set.
    ///
    /// # Errors
    /// - `MiningCancelled` if `cancel` was set before a block was found
    pub fn mine_cancellable(&self, miner: &SubjectId, cancel: &AtomicBool) -> Result<Block> {
        let block = self.ledger.mine_block_cancellable(miner, cancel)?;
        self.ledger.save(self.backend.as_ref())?;
        Ok(block)
    }

    /// Whether the chain is intact.
    pub fn verify_ledger(&self) -> bool {
        self.ledger.is_chain_valid()
    }

    /// Like [`MedLedger::verify_ledger`], reporting the first violation.
    ///
    /// # Errors
    /// - `IntegrityViolation` naming the first bad block
    pub fn verify_ledger_detailed(&self) -> Result<()> {
        self.ledger.verify_chain()
    }

    /// Committed anchors for `subject`, in chain order.
    pub fn subject_transactions(&self, subject: &SubjectId) -> Vec<Transaction> {
        self.ledger.get_subject_transactions(subject)
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Number of records stored for `subject`.
    pub fn record_count(&self, subject: &SubjectId) -> usize {
        self.records.record_count(subject)
    }

    /// Subjects with at least one record.
    pub fn subjects(&self) -> Vec<SubjectId> {
        self.records.subjects()
    }

    /// Persist the ledger and refresh the stored configuration.
    ///
    /// Records and grants are written as they change; this writes what is
    /// left.
    pub fn flush(&mut self) -> Result<()> {
        self.ledger.save(self.backend.as_ref())?;
        if let Some(config) = self.config.as_mut() {
            config.modified_at = chrono::Utc::now();
            self.backend
                .put(&StorageKey::parse(CONFIG_FILENAME)?, config.to_bytes()?)?;
        }
        debug!("Flushed record ledger");
        Ok(())
    }

    /// Clear every key from memory. All record operations fail afterwards.
    pub fn lock(&self) {
        self.keyring.lock();
    }

    /// Whether record keys are available.
    pub fn is_unlocked(&self) -> bool {
        self.keyring.is_unlocked()
    }
}

impl Drop for MedLedger {
    fn drop(&mut self) {
        // Ensure keys are zeroized
        self.lock();
    }
}

impl std::fmt::Debug for MedLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MedLedger")
            .field("backend", &self.backend.name())
            .field("blocks", &self.ledger.len())
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

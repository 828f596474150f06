//! The single-writer, hash-chained ledger.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info, warn};

use crate::block::{search_nonce, Block};
use crate::codec::{decode_chain, encode_chain};
use crate::difficulty::Difficulty;
use crate::transaction::{PayloadRef, Transaction};
use medledger_common::{Error, Result, StorageKey, SubjectId};
use medledger_storage::StorageBackend;

const CHAIN_KEY: &str = "ledger/chain.bin";
const PENDING_KEY: &str = "ledger/pending.json";

struct LedgerState {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
}

/// Append-only block chain with a pending-transaction queue.
///
/// One lock guards both the chain and the queue. Mining snapshots the queue
/// under the lock, searches for a nonce without it, then re-checks the tip
/// before appending. If another miner appended first, the search restarts
/// from a fresh snapshot.
///
/// Saves are serialized by a second lock taken before the snapshot, so a
/// stored file is never replaced by an older one.
pub struct Ledger {
    difficulty: Difficulty,
    state: Mutex<LedgerState>,
    save_lock: Mutex<()>,
}

impl Ledger {
    /// Create a ledger holding only the genesis block.
    pub fn new(difficulty: Difficulty) -> Self {
        Self::from_parts(difficulty, vec![Block::genesis()], Vec::new())
    }

    fn from_parts(difficulty: Difficulty, chain: Vec<Block>, pending: Vec<Transaction>) -> Self {
        Self {
            difficulty,
            state: Mutex::new(LedgerState { chain, pending }),
            save_lock: Mutex::new(()),
        }
    }

    /// Difficulty every mined block must satisfy.
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    /// Queue a transaction.
    ///
    /// Returns the index of the block that will contain it if mined next.
    pub fn add_transaction(
        &self,
        sender: SubjectId,
        recipient: SubjectId,
        payload: PayloadRef,
    ) -> u64 {
        let tx = Transaction::new(sender, recipient, payload);
        let mut state = self.state.lock();
        debug!(
            record = %tx.payload.record_id,
            action = %tx.payload.action,
            pending = state.pending.len() + 1,
            "Queued transaction"
        );
        state.pending.push(tx);
        state.chain.len() as u64
    }

    /// Mine the pending transactions into a new block.
    ///
    /// # Errors
    /// - `MiningExhausted` if the nonce space runs out
    pub fn mine_block(&self, miner: &SubjectId) -> Result<Block> {
        self.mine_block_cancellable(miner, &AtomicBool::new(false))
    }

    /// Mine the pending transactions, stopping early if `cancel` is set.
    ///
    /// # Errors
    /// - `MiningCancelled` if `cancel` is set before a nonce is found
    /// - `MiningExhausted` if the nonce space runs out
    pub fn mine_block_cancellable(&self, miner: &SubjectId, cancel: &AtomicBool) -> Result<Block> {
        loop {
            let (index, previous_hash, transactions) = {
                let state = self.state.lock();
                let tip = state
                    .chain
                    .last()
                    .ok_or_else(|| Error::Configuration("Ledger has no genesis block".to_string()))?;
                (tip.index + 1, tip.hash, state.pending.clone())
            };

            let timestamp = Utc::now();
            let header = Block::header_bytes(index, &timestamp, &previous_hash, &transactions)?;
            let (nonce, hash) = search_nonce(&header, self.difficulty, cancel, index)?;

            let mut state = self.state.lock();
            let tip_hash = state.chain.last().map(|b| b.hash);
            if tip_hash != Some(previous_hash) {
                debug!(index, "Chain advanced during search, retrying");
                continue;
            }

            // The queue is only appended to while the tip is unchanged, so
            // the snapshot is still its prefix.
            state.pending.drain(..transactions.len());
            let block = Block {
                index,
                timestamp,
                transactions,
                previous_hash,
                nonce,
                hash,
            };
            state.chain.push(block.clone());

            info!(
                index,
                nonce,
                transactions = block.transactions.len(),
                miner = %miner,
                hash = %block.hash,
                "Mined block"
            );
            return Ok(block);
        }
    }

    /// Check every block and report the first violation.
    ///
    /// Checks that genesis is intact, that each block's index matches its
    /// position, that it links to its predecessor's stored hash, that its
    /// stored hash matches a recomputation, and that the hash satisfies the
    /// difficulty.
    ///
    /// # Errors
    /// - `IntegrityViolation` naming the first bad block
    pub fn verify_chain(&self) -> Result<()> {
        let state = self.state.lock();
        verify_blocks(&state.chain, self.difficulty)
    }

    /// Whether the chain passes [`Ledger::verify_chain`].
    pub fn is_chain_valid(&self) -> bool {
        match self.verify_chain() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Ledger verification failed");
                false
            }
        }
    }

    /// Committed transactions whose recipient is `subject`, in chain order.
    pub fn get_subject_transactions(&self, subject: &SubjectId) -> Vec<Transaction> {
        let state = self.state.lock();
        state
            .chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|tx| &tx.recipient == subject)
            .cloned()
            .collect()
    }

    /// Transactions waiting to be mined.
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().pending.clone()
    }

    /// A copy of the committed chain.
    pub fn blocks(&self) -> Vec<Block> {
        self.state.lock().chain.clone()
    }

    /// Number of committed blocks, genesis included.
    pub fn len(&self) -> usize {
        self.state.lock().chain.len()
    }

    /// Always false once constructed; genesis is never removed.
    pub fn is_empty(&self) -> bool {
        self.state.lock().chain.is_empty()
    }

    /// The most recent block.
    pub fn last_block(&self) -> Option<Block> {
        self.state.lock().chain.last().cloned()
    }

    /// Write the chain and the pending queue to `backend`.
    ///
    /// # Errors
    /// - Serialization or storage failure
    pub fn save(&self, backend: &dyn StorageBackend) -> Result<()> {
        let _saving = self.save_lock.lock();
        let (chain_bytes, pending_bytes, blocks) = {
            let state = self.state.lock();
            (
                encode_chain(&state.chain)?,
                serde_json::to_vec(&state.pending)?,
                state.chain.len(),
            )
        };

        backend.put(&StorageKey::parse(CHAIN_KEY)?, chain_bytes)?;
        backend.put(&StorageKey::parse(PENDING_KEY)?, pending_bytes)?;
        debug!(blocks, "Saved ledger");
        Ok(())
    }

    /// Load a ledger from `backend`, or start a fresh one if none is stored.
    ///
    /// The loaded chain is not verified here; call
    /// [`Ledger::verify_chain`] to detect tampering.
    ///
    /// # Errors
    /// - `Serialization` if the chain file is corrupt or empty
    pub fn load(backend: &dyn StorageBackend, difficulty: Difficulty) -> Result<Self> {
        let chain = match backend.get_optional(&StorageKey::parse(CHAIN_KEY)?)? {
            Some(bytes) => decode_chain(&bytes)?,
            None => {
                debug!("No stored chain, starting from genesis");
                return Ok(Self::new(difficulty));
            }
        };
        if chain.is_empty() {
            return Err(Error::Serialization(
                "Stored chain has no genesis block".to_string(),
            ));
        }

        let pending = match backend.get_optional(&StorageKey::parse(PENDING_KEY)?)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };

        debug!(blocks = chain.len(), "Loaded ledger");
        Ok(Self::from_parts(difficulty, chain, pending))
    }
}

fn violation(index: u64, reason: impl Into<String>) -> Error {
    Error::IntegrityViolation {
        index,
        reason: reason.into(),
    }
}

fn verify_blocks(chain: &[Block], difficulty: Difficulty) -> Result<()> {
    let genesis = chain
        .first()
        .ok_or_else(|| violation(0, "chain is empty"))?;
    if *genesis != Block::genesis() {
        return Err(violation(0, "genesis block does not match"));
    }

    for (position, pair) in chain.windows(2).enumerate() {
        let (prev, block) = (&pair[0], &pair[1]);
        let expected_index = position as u64 + 1;

        if block.index != expected_index {
            return Err(violation(
                expected_index,
                format!("block claims index {}", block.index),
            ));
        }
        if block.previous_hash != prev.hash {
            return Err(violation(block.index, "previous hash does not match"));
        }
        if block.compute_hash()? != block.hash {
            return Err(violation(block.index, "stored hash does not match contents"));
        }
        if !difficulty.is_satisfied_by(&block.hash) {
            return Err(violation(
                block.index,
                format!("hash does not meet difficulty {}", difficulty),
            ));
        }
    }
    Ok(())
}

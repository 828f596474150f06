//! Blocks and the proof-of-work nonce search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::codec::{Decoder, Encoder};
use crate::difficulty::Difficulty;
use crate::transaction::Transaction;
use medledger_common::{Digest, Error, Result};
use medledger_crypto::Hasher;

/// How many nonces are tried between polls of the cancel flag.
const CANCEL_POLL_INTERVAL: u64 = 4096;

/// A committed batch of transactions.
///
/// `hash` is SHA-256 over the canonical encoding of every other field. The
/// nonce is encoded last so the search can hash the rest once and only
/// feed the nonce per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    pub previous_hash: Digest,
    pub nonce: u64,
    pub hash: Digest,
}

impl Block {
    /// The fixed first block: index 0, no transactions, zero link, epoch time.
    ///
    /// Genesis is exempt from the difficulty predicate, so its hash is the
    /// same for every ledger regardless of difficulty.
    pub fn genesis() -> Self {
        let mut block = Self {
            index: 0,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            transactions: Vec::new(),
            previous_hash: Digest::ZERO,
            nonce: 0,
            hash: Digest::ZERO,
        };
        // Genesis has no fields that can fail to encode.
        block.hash = block.compute_hash().unwrap_or(Digest::ZERO);
        block
    }

    /// Encode everything except the nonce and hash.
    pub(crate) fn header_bytes(
        index: u64,
        timestamp: &DateTime<Utc>,
        previous_hash: &Digest,
        transactions: &[Transaction],
    ) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.put_u64(index);
        enc.put_timestamp(timestamp)?;
        enc.put_digest(previous_hash);
        let count = u32::try_from(transactions.len())
            .map_err(|_| Error::InvalidInput("Too many transactions in one block".to_string()))?;
        enc.put_u32(count);
        for tx in transactions {
            tx.encode(&mut enc)?;
        }
        Ok(enc.finish())
    }

    /// Canonical encoding of the block without its hash.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Self::header_bytes(
            self.index,
            &self.timestamp,
            &self.previous_hash,
            &self.transactions,
        )?;
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        Ok(bytes)
    }

    /// Recompute the hash from the current field values.
    pub fn compute_hash(&self) -> Result<Digest> {
        Ok(medledger_crypto::hash(&self.canonical_bytes()?))
    }

    /// Rebuild a block from its canonical encoding and stored hash.
    ///
    /// The stored hash is not checked here.
    pub fn from_canonical(bytes: &[u8], hash: Digest) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let index = dec.u64()?;
        let timestamp = dec.timestamp()?;
        let previous_hash = dec.digest()?;
        let count = dec.u32()?;
        let mut transactions = Vec::new();
        for _ in 0..count {
            transactions.push(Transaction::decode(&mut dec)?);
        }
        let nonce = dec.u64()?;
        dec.finish()?;

        Ok(Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce,
            hash,
        })
    }
}

/// Find the smallest nonce whose hash over `header` satisfies `difficulty`.
///
/// Nonces are tried in ascending order from 0. The `cancel` flag is polled
/// every few thousand attempts.
///
/// # Errors
/// - `MiningCancelled` if `cancel` is set during the search
/// - `MiningExhausted` if no nonce up to `u64::MAX` satisfies the predicate
pub(crate) fn search_nonce(
    header: &[u8],
    difficulty: Difficulty,
    cancel: &AtomicBool,
    index: u64,
) -> Result<(u64, Digest)> {
    let mut prefix = Hasher::new();
    prefix.update(header);

    let mut nonce: u64 = 0;
    loop {
        if nonce % CANCEL_POLL_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Err(Error::MiningCancelled(index));
        }

        let mut hasher = prefix.clone();
        hasher.update(&nonce.to_be_bytes());
        let hash = hasher.finalize();
        if difficulty.is_satisfied_by(&hash) {
            return Ok((nonce, hash));
        }

        nonce = nonce
            .checked_add(1)
            .ok_or(Error::MiningExhausted(index))?;
    }
}

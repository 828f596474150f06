//! Hash-chained ledger for MedLedger.
//!
//! This module provides:
//! - Blocks and reference-only transactions with a canonical byte encoding
//! - A configurable leading-zero difficulty predicate
//! - A single-writer proof-of-work ledger with an optimistic append
//! - A framed, checksummed file format for persisting the chain
//!
//! # Architecture
//! The ledger never sees record plaintext. Writers submit a record id and
//! a ciphertext fingerprint; mining batches those references into blocks
//! whose hashes link each block to its predecessor.

pub mod block;
pub mod chain;
pub mod codec;
pub mod difficulty;
pub mod transaction;

pub use block::Block;
pub use chain::Ledger;
pub use difficulty::Difficulty;
pub use transaction::{PayloadAction, PayloadRef, Transaction};

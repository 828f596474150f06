//! Medical record ledger core for MedLedger.
//!
//! This module provides:
//! - The synchronous call surface used by outer layers
//! - Store creation and unlocking with a password
//! - Configuration persisted at the storage root
//!
//! # Architecture
//! The app crate wires the record store, access control and the ledger
//! together over one storage backend. Record writes flow into the store,
//! and a reference to each write is anchored on the ledger; plaintext never
//! leaves the record store except to the caller.

pub mod config;
pub mod manager;
pub mod service;

pub use config::{CoreConfig, CreateOptions, FormatVersion, CONFIG_FILENAME};
pub use manager::MedLedgerManager;
pub use service::MedLedger;

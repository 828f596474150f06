//! Storage backend abstraction for MedLedger.
//!
//! The ledger, record store and grant table persist through a small
//! key/value interface so a durable backend can replace the in-memory
//! default without touching ledger or record logic.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in ledger, records or crypto
//! - Synchronous operations: the core performs no network I/O
//! - Append/replace by key: nothing is deleted (regulatory retention)

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use provider::StorageBackend;
pub use registry::{create_default_registry, BackendFactory, BackendRegistry};

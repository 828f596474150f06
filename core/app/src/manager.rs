//! Creating and opening stores.

use std::sync::Arc;
use tracing::info;

use crate::config::{CoreConfig, CreateOptions, CONFIG_FILENAME};
use crate::service::MedLedger;
use medledger_common::{Error, Result, StorageKey};
use medledger_storage::{create_default_registry, BackendRegistry, StorageBackend};

/// Creates and opens stores on any registered backend.
pub struct MedLedgerManager {
    registry: BackendRegistry,
}

impl MedLedgerManager {
    /// Create a manager with the built-in backends.
    pub fn new() -> Self {
        Self {
            registry: create_default_registry(),
        }
    }

    /// Create with custom registry.
    pub fn with_registry(registry: BackendRegistry) -> Self {
        Self { registry }
    }

    /// Get the backend registry.
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Get mutable backend registry.
    pub fn registry_mut(&mut self) -> &mut BackendRegistry {
        &mut self.registry
    }

    /// Create a new store.
    ///
    /// # Preconditions
    /// - Backend type must be registered
    /// - Password must not be empty
    ///
    /// # Postconditions
    /// - Configuration is persisted at the backend root
    /// - Returns an unlocked handle
    ///
    /// # Errors
    /// - `NotFound` if the backend is not registered
    /// - `AlreadyExists` if the backend already holds a store
    pub fn create(
        &self,
        password: &[u8],
        backend_type: &str,
        backend_config: serde_json::Value,
        options: CreateOptions,
    ) -> Result<MedLedger> {
        let backend = self.registry.resolve(backend_type, backend_config.clone())?;
        let config_key = StorageKey::parse(CONFIG_FILENAME)?;
        if backend.exists(&config_key)? {
            return Err(Error::AlreadyExists(
                "A store already exists at this location".to_string(),
            ));
        }

        let (config, master_key) = CoreConfig::new(password, backend_type, backend_config, options)?;
        backend.put(&config_key, config.to_bytes()?)?;
        info!(
            backend = backend_type,
            difficulty = %config.difficulty,
            key_policy = %config.key_policy,
            "Created store"
        );

        Self::open_on(backend, config, master_key)
    }

    /// Open an existing store.
    ///
    /// # Errors
    /// - `NotFound` if there is no configuration at the location
    /// - `Decryption` if the password is wrong
    /// - `Configuration` if the format version is incompatible
    pub fn open(
        &self,
        backend_type: &str,
        backend_config: serde_json::Value,
        password: &[u8],
    ) -> Result<MedLedger> {
        let backend = self.registry.resolve(backend_type, backend_config)?;
        let config_key = StorageKey::parse(CONFIG_FILENAME)?;
        let bytes = backend
            .get_optional(&config_key)?
            .ok_or_else(|| Error::NotFound("Store configuration not found".to_string()))?;

        let config = CoreConfig::from_bytes(&bytes)?;
        let master_key = config.unlock(password)?;
        Self::open_on(backend, config, master_key)
    }

    fn open_on(
        backend: Arc<dyn StorageBackend>,
        config: CoreConfig,
        master_key: medledger_crypto::MasterKey,
    ) -> Result<MedLedger> {
        let core = MedLedger::open_with_key(backend, master_key, config.difficulty, config.key_policy)?;
        Ok(core.with_config(config))
    }

    /// Check if a store exists at the given location.
    pub fn exists(&self, backend_type: &str, backend_config: serde_json::Value) -> Result<bool> {
        let backend = self.registry.resolve(backend_type, backend_config)?;
        backend.exists(&StorageKey::parse(CONFIG_FILENAME)?)
    }
}

impl Default for MedLedgerManager {
    fn default() -> Self {
        Self::new()
    }
}

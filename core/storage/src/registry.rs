//! Backend registry for resolving storage backends by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::StorageBackend;
use medledger_common::{Error, Result};

/// Factory function type for creating backends.
pub type BackendFactory = Box<dyn Fn(Value) -> Result<Arc<dyn StorageBackend>> + Send + Sync>;

/// Registry for storage backend factories.
///
/// Allows registration and resolution of storage backends by name and
/// configuration.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a backend by name and configuration.
    ///
    /// # Errors
    /// - Backend not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn StorageBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Backend '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered backend names, sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in backends.
///
/// - `memory`: ignores its configuration
/// - `local`: requires `{"root": "<directory>"}`
pub fn create_default_registry() -> BackendRegistry {
    let mut factories: HashMap<String, BackendFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryBackend::new()))),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config.get("root").and_then(|v| v.as_str()).ok_or_else(|| {
                Error::InvalidInput("Local backend requires 'root' path".to_string())
            })?;
            Ok(Arc::new(crate::local::LocalBackend::new(root)?))
        }),
    );

    BackendRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = BackendRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))))
            .unwrap();

        let backend = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = BackendRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = BackendRegistry::new();
        let err = registry.resolve("unknown", Value::Null).err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.backends(), vec!["local", "memory"]);

        assert!(registry.resolve("local", Value::Null).is_err());

        let temp = tempfile::TempDir::new().unwrap();
        let backend = registry
            .resolve("local", serde_json::json!({ "root": temp.path() }))
            .unwrap();
        assert_eq!(backend.name(), "local");
    }
}

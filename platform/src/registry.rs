//! Resource registry.
//!
//! The central binder: bootstrap registers every shared resource here
//! under a name, and unrelated subsystems retrieve them without knowing
//! how they were built. The registry has two states, encoded in two
//! types:
//!
//! - [`ServiceRegistry`] - the bootstrap-phase registry. Mutable,
//!   single-threaded, register and look up by name.
//! - [`RegistryHandle`] - the frozen registry. Cheap to clone, lock-free
//!   concurrent reads, no way to register.
//!
//! [`ServiceRegistry::freeze`] consumes the mutable registry, so
//! registration after bootstrap is unrepresentable rather than a runtime
//! error. A lookup of a name that was never published is a
//! [`WiringError`], surfaced during startup validation rather than at
//! request time.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use tally_core::error::WiringError;

/// Well-known names resources are published under.
pub mod names {
    /// The selected time source
    pub const CLOCK: &str = "clock";
    /// Derived pool construction settings
    pub const DATABASE_SETTINGS: &str = "database.pool-settings";
    /// The shared transaction policy chain
    pub const TRANSACTION_POLICY: &str = "transaction-policy";
    /// Sink for transaction boundary events
    pub const NOTIFICATION_SINK: &str = "transaction-notifications";
    /// The full parsed configuration
    pub const PLATFORM_CONFIG: &str = "config.platform";
    /// Primary published data source
    pub const MAIN_DATA_SOURCE: &str = "datasource.main";
    /// Authorization-subsystem published data source
    pub const AUTH_DATA_SOURCE: &str = "datasource.auth";
    /// Ordered startup/shutdown hooks
    pub const LIFECYCLE: &str = "lifecycle";
    /// In-process event bus
    pub const MAIN_BUS: &str = "bus.main";
    /// Persistent event bus
    pub const EXTERNAL_BUS: &str = "bus.external";
    /// Future-dated notification queue
    pub const NOTIFICATION_QUEUE: &str = "notification-queue";
    /// Extension host
    pub const EXTENSION_HOST: &str = "extension-host";
    /// Resource name directory
    pub const NAMING_SERVICE: &str = "naming-service";
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

fn lookup<T: Send + Sync + 'static>(
    entries: &HashMap<String, Entry>,
    name: &str,
) -> Result<Arc<T>, WiringError> {
    let entry = entries.get(name).ok_or_else(|| WiringError::UnknownName {
        name: name.to_string(),
    })?;
    Arc::clone(&entry.value)
        .downcast::<T>()
        .map_err(|_| WiringError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
        })
}

fn sorted_names(entries: &HashMap<String, Entry>) -> Vec<String> {
    let mut names: Vec<String> = entries.keys().cloned().collect();
    names.sort();
    names
}

/// Bootstrap-phase registry. See the module docs for the two-state model.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: HashMap<String, Entry>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::Duplicate`] if the name is already taken;
    /// resources are published exactly once.
    pub fn register<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: Arc<T>,
    ) -> Result<(), WiringError> {
        if self.entries.contains_key(name) {
            return Err(WiringError::Duplicate {
                name: name.to_string(),
            });
        }
        tracing::debug!(name, resource_type = type_name::<T>(), "resource registered");
        self.entries.insert(
            name.to_string(),
            Entry {
                value,
                type_name: type_name::<T>(),
            },
        );
        Ok(())
    }

    /// Resolve `name` as a `T`. Later bootstrap steps use this to read
    /// what earlier steps registered.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError`] when the name was never published or holds
    /// a different type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, WiringError> {
        lookup(&self.entries, name)
    }

    /// Whether a resource is published under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Published names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        sorted_names(&self.entries)
    }

    /// The registered type of `name`, for diagnostics.
    #[must_use]
    pub fn type_of(&self, name: &str) -> Option<&'static str> {
        self.entries.get(name).map(|e| e.type_name)
    }

    /// End the bootstrap phase: no further registrations, lock-free
    /// shared reads from here on.
    #[must_use]
    pub fn freeze(self) -> RegistryHandle {
        RegistryHandle {
            entries: Arc::new(self.entries),
        }
    }
}

/// Read-only shared view of the frozen registry.
///
/// Entries are immutable after publication, so concurrent readers need no
/// synchronization.
#[derive(Clone)]
pub struct RegistryHandle {
    entries: Arc<HashMap<String, Entry>>,
}

impl RegistryHandle {
    /// Resolve `name` as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError`] when the name was never published or holds
    /// a different type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, WiringError> {
        lookup(&self.entries, name)
    }

    /// Whether a resource is published under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Published names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        sorted_names(&self.entries)
    }
}

impl std::fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("entries", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)] // Test code: assertions on fixtures

    use super::*;

    #[test]
    fn registered_resources_resolve_by_name_and_type() {
        let mut registry = ServiceRegistry::new();
        registry
            .register("answer", Arc::new(42u32))
            .expect("register");

        let value: Arc<u32> = registry.get("answer").expect("get");
        assert_eq!(*value, 42);
    }

    #[test]
    fn unknown_name_is_a_wiring_error() {
        let registry = ServiceRegistry::new();
        match registry.get::<u32>("missing") {
            Err(WiringError::UnknownName { name }) => assert_eq!(name, "missing"),
            other => panic!("expected UnknownName, got {other:?}"),
        }
    }

    #[test]
    fn wrong_type_is_a_wiring_error() {
        let mut registry = ServiceRegistry::new();
        registry
            .register("answer", Arc::new(42u32))
            .expect("register");

        match registry.get::<String>("answer") {
            Err(WiringError::TypeMismatch { name, expected }) => {
                assert_eq!(name, "answer");
                assert!(expected.contains("String"));
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ServiceRegistry::new();
        registry
            .register("answer", Arc::new(42u32))
            .expect("register");

        assert!(matches!(
            registry.register("answer", Arc::new(43u32)),
            Err(WiringError::Duplicate { .. })
        ));
    }

    #[test]
    fn frozen_registry_preserves_entries_and_shares_cheaply() {
        let mut registry = ServiceRegistry::new();
        registry
            .register("answer", Arc::new(42u32))
            .expect("register");

        let handle = registry.freeze();
        let clone = handle.clone();

        let value: Arc<u32> = clone.get("answer").expect("get");
        assert_eq!(*value, 42);
        assert_eq!(handle.names(), vec!["answer"]);
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = ServiceRegistry::new();
        registry.register("zeta", Arc::new(1u8)).expect("register");
        registry.register("alpha", Arc::new(2u8)).expect("register");

        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }
}

//! # Tally Extensions
//!
//! The sandboxed extension host. Extensions run against a **dedicated**
//! connection pool, created by its own factory call during bootstrap, so
//! extension work can never starve the primary or authorization pools and
//! shutting the host down touches nothing but its own pool.
//!
//! Execution semantics of the extensions themselves are outside this
//! crate; the host tracks registrations and owns the isolated pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tally_core::config::ExtensionSettings;
use tally_core::error::ConnectivityError;
use tally_database::pool::ConnectionPool;

/// Errors from extension host operations.
#[derive(Error, Debug)]
pub enum ExtensionError {
    /// The host was configured off; nothing can be registered.
    #[error("extension subsystem is disabled")]
    Disabled,

    /// An extension with this name is already registered.
    #[error("extension `{name}` is already registered")]
    AlreadyRegistered {
        /// The colliding extension name
        name: String,
    },

    /// The host has been shut down.
    #[error("extension host is shut down")]
    ShutDown,
}

/// Host for dynamically registered extensions.
///
/// Holds the only reference to its dedicated pool; the isolation
/// guarantee is structural.
pub struct ExtensionHost {
    enabled: bool,
    bundle_dir: String,
    pool: Option<Arc<dyn ConnectionPool>>,
    registered: RwLock<Vec<String>>,
    open: AtomicBool,
}

impl ExtensionHost {
    /// Build an enabled host over its dedicated pool.
    #[must_use]
    pub fn new(settings: &ExtensionSettings, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            enabled: true,
            bundle_dir: settings.bundle_dir.clone(),
            pool: Some(pool),
            registered: RwLock::new(Vec::new()),
            open: AtomicBool::new(true),
        }
    }

    /// Build the inert host registered when the subsystem is configured
    /// off. Lookups succeed; registrations fail with
    /// [`ExtensionError::Disabled`]; no pool is held.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            bundle_dir: String::new(),
            pool: None,
            registered: RwLock::new(Vec::new()),
            open: AtomicBool::new(false),
        }
    }

    /// Whether the subsystem was configured on.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Directory scanned for extension bundles.
    #[must_use]
    pub fn bundle_dir(&self) -> &str {
        &self.bundle_dir
    }

    /// The dedicated pool, when enabled.
    #[must_use]
    pub const fn pool(&self) -> Option<&Arc<dyn ConnectionPool>> {
        self.pool.as_ref()
    }

    /// Register an extension by name.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Disabled`] on the inert host,
    /// [`ExtensionError::ShutDown`] after shutdown, or
    /// [`ExtensionError::AlreadyRegistered`] on a name collision.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    pub fn register_extension(&self, name: impl Into<String>) -> Result<(), ExtensionError> {
        if !self.enabled {
            return Err(ExtensionError::Disabled);
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(ExtensionError::ShutDown);
        }

        let name = name.into();
        let mut registered = self
            .registered
            .write()
            .expect("extension lock poisoned - indicates a panic in another thread");
        if registered.contains(&name) {
            return Err(ExtensionError::AlreadyRegistered { name });
        }
        tracing::info!(extension = %name, "extension registered");
        registered.push(name);
        Ok(())
    }

    /// Names of registered extensions, in registration order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn extensions(&self) -> Vec<String> {
        self.registered
            .read()
            .expect("extension lock poisoned - indicates a panic in another thread")
            .clone()
    }

    /// Shut the host down, closing only its own pool.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectivityError::DrainTimeout`] when the dedicated
    /// pool has to be closed forcibly.
    pub async fn shut_down(&self, drain_timeout: Duration) -> Result<(), ConnectivityError> {
        self.open.store(false, Ordering::SeqCst);
        if let Some(pool) = &self.pool {
            pool.close(drain_timeout).await?;
        }
        tracing::info!("extension host shut down");
        Ok(())
    }
}

impl std::fmt::Debug for ExtensionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHost")
            .field("enabled", &self.enabled)
            .field("bundle_dir", &self.bundle_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)] // Test code: assertions on fixtures

    use super::*;
    use tally_database::pool::{PoolFactory, PoolRole};
    use tally_testing::mocks::{RecordingPoolFactory, test_pool_settings};

    #[tokio::test]
    async fn host_pool_is_isolated_from_siblings() {
        let factory = RecordingPoolFactory::new();
        let settings = test_pool_settings();
        let primary = factory
            .create_pool(&settings, PoolRole::Primary)
            .await
            .expect("primary pool");
        let dedicated = factory
            .create_pool(&settings, PoolRole::Extension)
            .await
            .expect("extension pool");

        let host = ExtensionHost::new(&ExtensionSettings::default(), dedicated);
        host.shut_down(Duration::from_millis(50))
            .await
            .expect("shutdown");

        // Closing the host's pool never touches the primary pool
        assert!(primary.is_open());
        assert!(primary.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn registrations_are_tracked_in_order() {
        let factory = RecordingPoolFactory::new();
        let pool = factory
            .create_pool(&test_pool_settings(), PoolRole::Extension)
            .await
            .expect("pool");
        let host = ExtensionHost::new(&ExtensionSettings::default(), pool);

        host.register_extension("invoice-formatter").expect("register");
        host.register_extension("payment-gateway").expect("register");

        assert_eq!(
            host.extensions(),
            vec!["invoice-formatter", "payment-gateway"]
        );
        assert!(matches!(
            host.register_extension("invoice-formatter"),
            Err(ExtensionError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn disabled_host_is_inert_but_resolvable() {
        let host = ExtensionHost::disabled();
        assert!(!host.is_enabled());
        assert!(host.pool().is_none());
        assert!(matches!(
            host.register_extension("anything"),
            Err(ExtensionError::Disabled)
        ));
    }
}

//! # Tally Testing
//!
//! Testing utilities and mocks for the tally platform.
//!
//! This crate provides:
//! - An in-memory [`mocks::MemoryPool`] implementing the pool boundary
//! - A [`mocks::RecordingPoolFactory`] that counts factory calls and keeps
//!   an ordered release log, for the bootstrap ordering properties
//! - A fixed-start [`mocks::test_clock`]
//! - Valid and deliberately-broken configuration fixtures
//!
//! ## Example
//!
//! ```
//! use tally_database::pool::{ConnectionPool, PoolFactory, PoolRole};
//! use tally_testing::mocks::{RecordingPoolFactory, test_pool_settings};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let factory = RecordingPoolFactory::new();
//! let pool = factory
//!     .create_pool(&test_pool_settings(), PoolRole::Primary)
//!     .await
//!     .expect("pool");
//! assert_eq!(factory.call_count(), 1);
//! assert!(pool.is_open());
//! # }
//! ```

/// Mock implementations of the platform's resource boundaries.
pub mod mocks {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::any::Any;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tally_core::clock::ManualClock;
    use tally_core::config::{DatabaseConfig, PlatformConfig};
    use tally_core::error::ConnectivityError;
    use tally_database::pool::{
        ConnectionLease, ConnectionPool, PoolFactory, PoolRole, PoolSettings,
    };

    /// Shared, ordered log of pool release events.
    ///
    /// Every [`MemoryPool`] close appends its role name, so tests can
    /// assert exact reverse-acquisition release order.
    #[derive(Debug, Clone, Default)]
    pub struct ReleaseLog {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl ReleaseLog {
        /// Create an empty log.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Append a release event.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned (indicates a panic in another thread)
        #[allow(clippy::expect_used)]
        pub fn record(&self, name: &str) {
            self.entries
                .lock()
                .expect("release log lock poisoned - indicates a panic in another thread")
                .push(name.to_string());
        }

        /// Snapshot of release events in occurrence order.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned (indicates a panic in another thread)
        #[allow(clippy::expect_used)]
        #[must_use]
        pub fn entries(&self) -> Vec<String> {
            self.entries
                .lock()
                .expect("release log lock poisoned - indicates a panic in another thread")
                .clone()
        }
    }

    /// Decrements the borrow counter when a lease is dropped.
    struct CheckinGuard {
        borrowed: Arc<AtomicUsize>,
    }

    impl Drop for CheckinGuard {
        fn drop(&mut self) {
            self.borrowed.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// In-memory [`ConnectionPool`] with observable state.
    pub struct MemoryPool {
        role: PoolRole,
        open: AtomicBool,
        borrowed: Arc<AtomicUsize>,
        release_log: Option<ReleaseLog>,
        close_delay: Option<Duration>,
    }

    impl MemoryPool {
        /// Create an open pool for `role`.
        #[must_use]
        pub fn new(role: PoolRole) -> Self {
            Self {
                role,
                open: AtomicBool::new(true),
                borrowed: Arc::new(AtomicUsize::new(0)),
                release_log: None,
                close_delay: None,
            }
        }

        /// Record closes into `log`.
        #[must_use]
        pub fn with_release_log(mut self, log: ReleaseLog) -> Self {
            self.release_log = Some(log);
            self
        }

        /// Make `close` take `delay` before the pool drains, to exercise
        /// the bounded drain timeout.
        #[must_use]
        pub const fn with_close_delay(mut self, delay: Duration) -> Self {
            self.close_delay = Some(delay);
            self
        }

        /// Number of currently outstanding leases.
        #[must_use]
        pub fn borrowed_count(&self) -> usize {
            self.borrowed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectionPool for MemoryPool {
        fn role(&self) -> PoolRole {
            self.role
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn borrow(&self) -> Result<ConnectionLease, ConnectivityError> {
            if !self.is_open() {
                return Err(ConnectivityError::Closed {
                    role: self.role.to_string(),
                });
            }
            self.borrowed.fetch_add(1, Ordering::SeqCst);
            let guard = CheckinGuard {
                borrowed: Arc::clone(&self.borrowed),
            };
            Ok(ConnectionLease::guarded(
                self.role,
                Box::new(guard) as Box<dyn Any + Send>,
            ))
        }

        async fn close(&self, drain_timeout: Duration) -> Result<(), ConnectivityError> {
            let result = if let Some(delay) = self.close_delay {
                if delay > drain_timeout {
                    tokio::time::sleep(drain_timeout).await;
                    Err(ConnectivityError::DrainTimeout {
                        role: self.role.to_string(),
                        timeout: drain_timeout,
                    })
                } else {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
            } else {
                Ok(())
            };

            self.open.store(false, Ordering::SeqCst);
            if let Some(log) = &self.release_log {
                log.record(self.role.as_str());
            }
            result
        }
    }

    /// [`PoolFactory`] probe: counts calls, shares one release log across
    /// every pool it creates, and can be told to fail for chosen roles.
    pub struct RecordingPoolFactory {
        calls: AtomicUsize,
        created: Mutex<Vec<Arc<MemoryPool>>>,
        release_log: ReleaseLog,
        fail_roles: Mutex<HashSet<PoolRole>>,
        close_delay: Mutex<Option<Duration>>,
    }

    impl RecordingPoolFactory {
        /// Create a factory with a fresh release log.
        #[must_use]
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                created: Mutex::new(Vec::new()),
                release_log: ReleaseLog::new(),
                fail_roles: Mutex::new(HashSet::new()),
                close_delay: Mutex::new(None),
            }
        }

        /// How many times `create_pool` was invoked (failures included).
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Pools created so far, in creation order.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned (indicates a panic in another thread)
        #[allow(clippy::expect_used)]
        #[must_use]
        pub fn pools(&self) -> Vec<Arc<MemoryPool>> {
            self.created
                .lock()
                .expect("factory lock poisoned - indicates a panic in another thread")
                .clone()
        }

        /// The release log shared by every created pool.
        #[must_use]
        pub fn release_log(&self) -> ReleaseLog {
            self.release_log.clone()
        }

        /// Simulate an unreachable database for `role`.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned (indicates a panic in another thread)
        #[allow(clippy::expect_used)]
        pub fn fail_on(&self, role: PoolRole) {
            self.fail_roles
                .lock()
                .expect("factory lock poisoned - indicates a panic in another thread")
                .insert(role);
        }

        /// Give subsequently created pools a slow close, to exercise the
        /// drain bound.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned (indicates a panic in another thread)
        #[allow(clippy::expect_used)]
        pub fn set_close_delay(&self, delay: Duration) {
            *self
                .close_delay
                .lock()
                .expect("factory lock poisoned - indicates a panic in another thread") =
                Some(delay);
        }
    }

    impl Default for RecordingPoolFactory {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PoolFactory for RecordingPoolFactory {
        #[allow(clippy::expect_used)]
        async fn create_pool(
            &self,
            _settings: &PoolSettings,
            role: PoolRole,
        ) -> Result<Arc<dyn ConnectionPool>, ConnectivityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let failing = self
                .fail_roles
                .lock()
                .expect("factory lock poisoned - indicates a panic in another thread")
                .contains(&role);
            if failing {
                return Err(ConnectivityError::OpenFailed {
                    role: role.to_string(),
                    reason: "simulated unreachable database".to_string(),
                });
            }

            let mut pool = MemoryPool::new(role).with_release_log(self.release_log.clone());
            let delay = *self
                .close_delay
                .lock()
                .expect("factory lock poisoned - indicates a panic in another thread");
            if let Some(delay) = delay {
                pool = pool.with_close_delay(delay);
            }

            let pool = Arc::new(pool);
            self.created
                .lock()
                .expect("factory lock poisoned - indicates a panic in another thread")
                .push(Arc::clone(&pool));
            Ok(pool)
        }
    }

    /// Pool settings pointing at a database that is never contacted.
    #[must_use]
    pub fn test_pool_settings() -> PoolSettings {
        PoolSettings {
            url: "postgres://localhost:5432/tally_test".to_string(),
            username: "tally".to_string(),
            password: "tally".to_string(),
            max_connections: 2,
            connect_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(1),
        }
    }

    /// Create a manual clock at a fixed instant (2025-01-01 00:00:00 UTC)
    /// for deterministic tests.
    #[must_use]
    pub fn test_clock() -> Arc<ManualClock> {
        let start = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Arc::new(ManualClock::new(start))
    }

    /// A configuration every bootstrap step accepts.
    #[must_use]
    pub fn test_platform_config() -> PlatformConfig {
        PlatformConfig {
            database: DatabaseConfig {
                url: "postgres://localhost:5432/tally_test".to_string(),
                username: "tally".to_string(),
                password: "tally".to_string(),
                pool_size: 2,
                connect_timeout_secs: 1,
                acquire_timeout_secs: 1,
            },
            ..PlatformConfig::default()
        }
    }

    /// A configuration whose database section is missing its credentials.
    #[must_use]
    pub fn config_missing_credentials() -> PlatformConfig {
        PlatformConfig::default()
    }
}

// Re-export commonly used items
pub use mocks::{
    MemoryPool, RecordingPoolFactory, ReleaseLog, config_missing_credentials, test_clock,
    test_platform_config, test_pool_settings,
};

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)] // Test code: assertions on fixtures

    use super::mocks::*;
    use tally_database::pool::{ConnectionPool, PoolFactory, PoolRole};

    #[tokio::test]
    async fn memory_pool_tracks_outstanding_leases() {
        let factory = RecordingPoolFactory::new();
        let pool = factory
            .create_pool(&test_pool_settings(), PoolRole::Primary)
            .await
            .expect("pool");
        let concrete = factory.pools().remove(0);

        let lease = pool.borrow().await.expect("borrow");
        assert_eq!(concrete.borrowed_count(), 1);
        drop(lease);
        assert_eq!(concrete.borrowed_count(), 0);
    }

    #[tokio::test]
    async fn factory_failure_is_reported_per_role() {
        let factory = RecordingPoolFactory::new();
        factory.fail_on(PoolRole::Auth);

        assert!(
            factory
                .create_pool(&test_pool_settings(), PoolRole::Primary)
                .await
                .is_ok()
        );
        assert!(
            factory
                .create_pool(&test_pool_settings(), PoolRole::Auth)
                .await
                .is_err()
        );
        assert_eq!(factory.call_count(), 2);
    }

    #[tokio::test]
    async fn release_log_orders_closes() {
        use std::time::Duration;

        let factory = RecordingPoolFactory::new();
        let first = factory
            .create_pool(&test_pool_settings(), PoolRole::Primary)
            .await
            .expect("pool");
        let second = factory
            .create_pool(&test_pool_settings(), PoolRole::Auth)
            .await
            .expect("pool");

        second
            .close(Duration::from_millis(50))
            .await
            .expect("close");
        first.close(Duration::from_millis(50)).await.expect("close");

        assert_eq!(factory.release_log().entries(), vec!["auth", "primary"]);
    }
}

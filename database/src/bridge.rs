//! Data source publication bridge.
//!
//! Publishing a pooled connection under a name and instrumenting it with
//! metrics would be circular if done in one construction pass: the proxy
//! must be registered in the resource registry before consumers are built,
//! but its metrics hooks come from the registry's own wiring. The bridge
//! breaks the cycle with two-phase construction:
//!
//! - **phase one** - [`PublishedDataSource::publish`] builds a proxy from
//!   the pool and its name alone, enough to be registered;
//! - **phase two** - the registry calls
//!   [`complete_wiring`](PublishedDataSource::complete_wiring) to inject
//!   the observer before the registry is considered ready.
//!
//! Consumers resolve the name only after phase two, so the partially-wired
//! intermediate state is never observable. Resolving the proxy never
//! re-enters pool construction.

use crate::pool::{ConnectionLease, ConnectionPool, PoolSettings};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tally_core::error::{ConnectivityError, WiringError};

/// Instrumentation hooks injected in the second wiring pass.
pub trait QueryObserver: Send + Sync {
    /// A borrow is starting on the named data source.
    fn borrow_started(&self, name: &str);

    /// A borrow finished, successfully or not.
    fn borrow_finished(&self, name: &str, elapsed: Duration, ok: bool);
}

/// [`QueryObserver`] recording to the process metrics recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl QueryObserver for MetricsObserver {
    fn borrow_started(&self, name: &str) {
        metrics::counter!("datasource.borrow.started", "name" => name.to_string()).increment(1);
    }

    fn borrow_finished(&self, name: &str, elapsed: Duration, ok: bool) {
        metrics::histogram!("datasource.borrow.duration_seconds", "name" => name.to_string())
            .record(elapsed.as_secs_f64());
        if !ok {
            metrics::counter!("datasource.borrow.errors", "name" => name.to_string())
                .increment(1);
        }
    }
}

/// A pooled connection published under a name.
///
/// Constructed eagerly with enough information to be registered; the
/// observer arrives later via deferred injection.
pub struct PublishedDataSource {
    name: String,
    settings: PoolSettings,
    pool: Arc<dyn ConnectionPool>,
    observer: OnceLock<Arc<dyn QueryObserver>>,
}

impl PublishedDataSource {
    /// Phase one: wrap `pool` as a registrable named resource.
    #[must_use]
    pub fn publish(
        settings: &PoolSettings,
        pool: Arc<dyn ConnectionPool>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            settings: settings.clone(),
            pool,
            observer: OnceLock::new(),
        }
    }

    /// Phase two: inject the instrumentation hooks. Performed by the
    /// registry exactly once, before it exposes readiness.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::AlreadyWired`] on a second call.
    pub fn complete_wiring(&self, observer: Arc<dyn QueryObserver>) -> Result<(), WiringError> {
        self.observer
            .set(observer)
            .map_err(|_| WiringError::AlreadyWired {
                name: self.name.clone(),
            })
    }

    /// Whether phase two has completed.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.observer.get().is_some()
    }

    /// The name this data source is published under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The settings the wrapped pool was built from.
    #[must_use]
    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// The wrapped pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Borrow a connection from the wrapped pool, recording metrics when
    /// wired. Never constructs a pool.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectivityError`] from the wrapped pool.
    pub async fn borrow(&self) -> Result<ConnectionLease, ConnectivityError> {
        let observer = self.observer.get();
        if let Some(obs) = observer {
            obs.borrow_started(&self.name);
        }
        let started = Instant::now();
        let result = self.pool.borrow().await;
        if let Some(obs) = observer {
            obs.borrow_finished(&self.name, started.elapsed(), result.is_ok());
        }
        result
    }
}

impl std::fmt::Debug for PublishedDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedDataSource")
            .field("name", &self.name)
            .field("role", &self.pool.role())
            .field("ready", &self.ready())
            .finish_non_exhaustive()
    }
}

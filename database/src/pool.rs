//! Pooled connection factory.
//!
//! A [`PoolFactory`] turns [`PoolSettings`] into an independently-lifecycled
//! [`ConnectionPool`]. The factory is pure: identical settings always yield
//! a new, distinct pool, never a cached one. Every logical subsystem that
//! needs isolation (primary, authorization, extension) gets its own factory
//! call, even when they target the same physical database, so shutting one
//! pool down can never starve another's in-flight work.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tally_core::config::DatabaseConfig;
use tally_core::error::ConnectivityError;

/// Which logical subsystem a pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolRole {
    /// Primary domain data
    Primary,
    /// Authorization subsystem
    Auth,
    /// Extension subsystem
    Extension,
}

impl PoolRole {
    /// Stable lowercase name used in logs, metrics, and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Auth => "auth",
            Self::Extension => "extension",
        }
    }
}

impl fmt::Display for PoolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool construction parameters, derived from [`DatabaseConfig`].
///
/// Equality on settings deliberately says nothing about pool identity: two
/// pools built from equal settings are still distinct objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Connection URL
    pub url: String,
    /// Login role
    pub username: String,
    /// Login credential
    pub password: String,
    /// Maximum connections held by the pool
    pub max_connections: u32,
    /// Bound on establishing a single connection
    pub connect_timeout: Duration,
    /// Bound on borrowing a connection
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    /// Derive settings from a validated configuration section.
    #[must_use]
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            max_connections: config.pool_size,
            connect_timeout: config.connect_timeout(),
            acquire_timeout: config.acquire_timeout(),
        }
    }
}

/// One borrowed connection. Dropping the lease returns the connection to
/// its pool.
pub struct ConnectionLease {
    role: PoolRole,
    _backing: LeaseBacking,
}

enum LeaseBacking {
    Postgres(Box<sqlx::pool::PoolConnection<sqlx::Postgres>>),
    Guard(Box<dyn Any + Send>),
}

impl ConnectionLease {
    /// Lease backed by a live `sqlx` connection.
    #[must_use]
    pub fn postgres(role: PoolRole, conn: sqlx::pool::PoolConnection<sqlx::Postgres>) -> Self {
        Self {
            role,
            _backing: LeaseBacking::Postgres(Box::new(conn)),
        }
    }

    /// Lease backed by a pool-specific guard. The guard's `Drop` is the
    /// pool's checkin hook.
    #[must_use]
    pub fn guarded(role: PoolRole, guard: Box<dyn Any + Send>) -> Self {
        Self {
            role,
            _backing: LeaseBacking::Guard(guard),
        }
    }

    /// The role of the pool this lease came from.
    #[must_use]
    pub const fn role(&self) -> PoolRole {
        self.role
    }
}

impl fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Opaque boundary over one live connection pool.
///
/// The platform core only assembles pools and hands out references; all it
/// asks of an implementation is borrow, bounded close, and open-state.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// The logical subsystem this pool serves.
    fn role(&self) -> PoolRole;

    /// Whether the pool is accepting borrows.
    fn is_open(&self) -> bool;

    /// Borrow one connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::Closed`] after close, or
    /// [`ConnectivityError::BorrowFailed`] when the pool cannot supply a
    /// connection within its acquire bound.
    async fn borrow(&self) -> Result<ConnectionLease, ConnectivityError>;

    /// Drain and close the pool.
    ///
    /// Waits at most `drain_timeout` for in-flight borrows to come back;
    /// after that the pool is closed forcibly and the timeout is reported.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::DrainTimeout`] on forced closure.
    async fn close(&self, drain_timeout: Duration) -> Result<(), ConnectivityError>;
}

/// Pure factory for connection pools.
///
/// Implementations must construct a fresh pool on every call; returning a
/// cached or shared instance would couple the callers' shutdown sequences.
#[async_trait]
pub trait PoolFactory: Send + Sync {
    /// Build a new pool for `role` from `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::OpenFailed`] when the database is
    /// unreachable at startup.
    async fn create_pool(
        &self,
        settings: &PoolSettings,
        role: PoolRole,
    ) -> Result<Arc<dyn ConnectionPool>, ConnectivityError>;
}

/// [`ConnectionPool`] over a `sqlx` Postgres pool.
pub struct PgConnectionPool {
    role: PoolRole,
    pool: PgPool,
    open: AtomicBool,
}

impl PgConnectionPool {
    fn new(role: PoolRole, pool: PgPool) -> Self {
        Self {
            role,
            pool,
            open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ConnectionPool for PgConnectionPool {
    fn role(&self) -> PoolRole {
        self.role
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.pool.is_closed()
    }

    async fn borrow(&self) -> Result<ConnectionLease, ConnectivityError> {
        if !self.is_open() {
            return Err(ConnectivityError::Closed {
                role: self.role.to_string(),
            });
        }
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ConnectivityError::BorrowFailed {
                role: self.role.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ConnectionLease::postgres(self.role, conn))
    }

    async fn close(&self, drain_timeout: Duration) -> Result<(), ConnectivityError> {
        self.open.store(false, Ordering::SeqCst);
        // `PgPool::close` resolves once every connection has been returned
        // and closed; the timeout bounds that drain.
        match tokio::time::timeout(drain_timeout, self.pool.close()).await {
            Ok(()) => {
                tracing::info!(role = %self.role, "connection pool drained and closed");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    role = %self.role,
                    timeout_ms = drain_timeout.as_millis(),
                    "connection pool did not drain in time; closing forcibly"
                );
                Err(ConnectivityError::DrainTimeout {
                    role: self.role.to_string(),
                    timeout: drain_timeout,
                })
            }
        }
    }
}

/// Factory building a fresh `sqlx` pool per call.
///
/// Stateless by construction: there is nothing to cache a pool in.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgPoolFactory;

#[async_trait]
impl PoolFactory for PgPoolFactory {
    async fn create_pool(
        &self,
        settings: &PoolSettings,
        role: PoolRole,
    ) -> Result<Arc<dyn ConnectionPool>, ConnectivityError> {
        let open_failed = |reason: String| ConnectivityError::OpenFailed {
            role: role.to_string(),
            reason,
        };

        let options = PgConnectOptions::from_str(&settings.url)
            .map_err(|e| open_failed(e.to_string()))?
            .username(&settings.username)
            .password(&settings.password);

        // Blocking on the initial connection is expected during startup;
        // the configured connect timeout bounds it.
        let connecting = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options);
        let pool = tokio::time::timeout(settings.connect_timeout, connecting)
            .await
            .map_err(|_| open_failed("timed out establishing initial connection".to_string()))?
            .map_err(|e| open_failed(e.to_string()))?;

        tracing::info!(
            role = %role,
            max_connections = settings.max_connections,
            "connection pool opened"
        );
        Ok(Arc::new(PgConnectionPool::new(role, pool)))
    }
}

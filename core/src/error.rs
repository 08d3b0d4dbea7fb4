//! Error taxonomy for platform bootstrap.
//!
//! Startup-phase errors are fatal: they propagate to the process entry
//! point, which must refuse to serve traffic. The transient-failure class
//! handled by the transaction retry stage lives with the transaction code
//! in `tally-database` and never appears here.

use std::time::Duration;
use thiserror::Error;

/// A required setting is missing or malformed.
///
/// Always raised before any connection pool is opened.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The layered configuration source could not be read or parsed.
    #[error("configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    /// A setting the platform cannot start without is absent or empty.
    #[error("missing required setting `{key}`")]
    MissingSetting {
        /// Dotted path of the offending key (e.g. `database.url`)
        key: String,
    },

    /// A setting is present but its value is unusable.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidSetting {
        /// Dotted path of the offending key
        key: String,
        /// Why the value was rejected
        reason: String,
    },
}

/// A connection pool or the database behind it is unreachable.
///
/// Fatal during bootstrap; any pools already opened in the attempt are
/// released in reverse order before the error propagates.
#[derive(Error, Debug)]
pub enum ConnectivityError {
    /// The pool could not be established at startup.
    #[error("failed to open {role} connection pool: {reason}")]
    OpenFailed {
        /// Logical subsystem the pool serves
        role: String,
        /// Underlying driver message
        reason: String,
    },

    /// A connection could not be borrowed from an open pool.
    #[error("failed to borrow connection from {role} pool: {reason}")]
    BorrowFailed {
        /// Logical subsystem the pool serves
        role: String,
        /// Underlying driver message
        reason: String,
    },

    /// The pool did not drain within the bounded timeout and was closed
    /// forcibly. Reported, never swallowed.
    #[error("{role} pool failed to drain within {timeout:?}; closed forcibly")]
    DrainTimeout {
        /// Logical subsystem the pool serves
        role: String,
        /// The drain bound that was exceeded
        timeout: Duration,
    },

    /// Operation attempted on a pool that is already closed.
    #[error("{role} pool is closed")]
    Closed {
        /// Logical subsystem the pool serves
        role: String,
    },
}

/// A consumer resolved a registry entry that was never published, or
/// violated the registry's publication protocol.
///
/// These are programming errors; the bootstrap sequence is arranged so
/// they surface during startup validation rather than at request time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WiringError {
    /// No resource was published under the requested name.
    #[error("no resource published under name `{name}`")]
    UnknownName {
        /// The name that was looked up
        name: String,
    },

    /// The named resource exists but is of a different type.
    #[error("resource `{name}` is not of the requested type `{expected}`")]
    TypeMismatch {
        /// The name that was looked up
        name: String,
        /// Fully-qualified type the caller asked for
        expected: &'static str,
    },

    /// A second resource was registered under an already-published name.
    #[error("a resource is already published under name `{name}`")]
    Duplicate {
        /// The colliding name
        name: String,
    },

    /// Second-phase wiring was performed twice on the same proxy.
    #[error("`{name}` already completed its deferred wiring")]
    AlreadyWired {
        /// The proxy's published name
        name: String,
    },
}

/// Umbrella for the error classes a bootstrap step can fail with.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// See [`ConfigurationError`]
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// See [`ConnectivityError`]
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    /// See [`WiringError`]
    #[error(transparent)]
    Wiring(#[from] WiringError),
}

/// A failed bootstrap attempt: one clear diagnostic identifying which
/// step failed, instead of a cascade of downstream symptoms.
#[derive(Error, Debug)]
#[error("bootstrap step `{step}` failed: {source}")]
pub struct BootstrapError {
    /// Name of the initialization step that failed
    pub step: &'static str,
    /// The underlying failure
    #[source]
    pub source: PlatformError,
}

impl BootstrapError {
    /// Attach a step name to an underlying failure.
    pub fn at(step: &'static str, source: impl Into<PlatformError>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

//! # Tally Database
//!
//! Database access plumbing for the tally platform: the pooled connection
//! factory, the data-source publication bridge, and the transaction policy
//! chain.
//!
//! This crate assembles and hands out database resources; it contains no
//! business transactions. The composition root in `tally-platform` calls
//! the factory once per logical subsystem (primary, authorization,
//! extension) so every subsystem owns an independently-lifecycled pool,
//! publishes the pools through the bridge, and shares one
//! [`TransactionPolicy`] with everything that touches the database.

pub mod bridge;
pub mod pool;
pub mod transaction;

// Re-export commonly used items
pub use bridge::{MetricsObserver, PublishedDataSource, QueryObserver};
pub use pool::{
    ConnectionLease, ConnectionPool, PgPoolFactory, PoolFactory, PoolRole, PoolSettings,
};
pub use transaction::{
    AttemptOutcome, NotificationSink, RetryLimit, TransactionError, TransactionEvent,
    TransactionPolicy,
};

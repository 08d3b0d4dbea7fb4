//! Transaction policy chain.
//!
//! The single transaction-execution strategy used by all database access,
//! built once at bootstrap. It is an explicit ordered pipeline of stages
//! rather than nested wrapper objects:
//!
//! 1. base execution - run the operation;
//! 2. notification stage - emit one [`TransactionEvent`] per **physical**
//!    attempt;
//! 3. retry stage (outermost) - restart on a transient conflict, bounded.
//!
//! The retry stage sits outside the notification stage so a restarted
//! attempt re-triggers the notification exactly once per physical attempt.
//! Reversing the order would miss or duplicate notifications on retry.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Classified transaction failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Serialization/optimistic-concurrency conflict. Recoverable: the
    /// retry stage restarts the transaction and this never surfaces past
    /// the bounded retry count unless every attempt conflicts.
    #[error("transient conflict: {0}")]
    Transient(String),

    /// Any other failure. Propagates to the caller immediately.
    #[error("transaction failed: {0}")]
    Fatal(String),
}

impl TransactionError {
    /// Whether the retry stage may restart the transaction.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// How one physical attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The attempt returned successfully
    Committed,
    /// The attempt failed and was rolled back
    RolledBack,
}

/// Emitted on every transaction boundary, once per physical attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEvent {
    /// 1-based physical attempt number
    pub attempt: usize,
    /// How the attempt ended
    pub outcome: AttemptOutcome,
}

/// Fan-out sink for [`TransactionEvent`]s.
///
/// Backed by a broadcast channel: emitting with no subscribers is fine,
/// and a lagging subscriber loses oldest events rather than blocking the
/// transaction path.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: broadcast::Sender<TransactionEvent>,
}

impl NotificationSink {
    /// Create a sink buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to transaction boundary events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: TransactionEvent) {
        // No receivers is not an error; events are observability signals.
        let _ = self.tx.send(event);
    }
}

impl Default for NotificationSink {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Bound and backoff for the retry stage.
#[derive(Debug, Clone)]
pub struct RetryLimit {
    /// Maximum restarts after the first attempt
    pub max_retries: usize,
    /// Backoff before the first restart
    pub initial_backoff: Duration,
    /// Cap on the doubling backoff
    pub max_backoff: Duration,
}

impl Default for RetryLimit {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryLimit {
    /// Backoff before restarting after the given 1-based failed attempt.
    ///
    /// Doubles per attempt, capped at `max_backoff`.
    #[must_use]
    pub fn backoff_after(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16) as u32;
        let delay = self.initial_backoff.saturating_mul(factor);
        delay.min(self.max_backoff)
    }
}

/// The composed transaction-execution strategy.
///
/// Holds no mutable state beyond its stage configuration; built once and
/// shared by all database access for the process lifetime.
#[derive(Debug)]
pub struct TransactionPolicy {
    sink: NotificationSink,
    retry: RetryLimit,
}

impl TransactionPolicy {
    /// Compose the policy chain over a notification sink.
    #[must_use]
    pub const fn new(sink: NotificationSink, retry: RetryLimit) -> Self {
        Self { sink, retry }
    }

    /// The sink transaction boundary events are emitted to.
    #[must_use]
    pub const fn sink(&self) -> &NotificationSink {
        &self.sink
    }

    /// Execute `op` under the policy chain.
    ///
    /// `op` is called once per physical attempt; a [`TransactionEvent`] is
    /// emitted after each attempt. Only [`TransactionError::Transient`]
    /// failures are retried, at most `max_retries` times; everything else
    /// propagates immediately.
    ///
    /// # Errors
    ///
    /// Returns the operation's error once it is non-transient or the retry
    /// bound is exhausted.
    pub async fn execute<F, Fut, T>(&self, mut op: F) -> Result<T, TransactionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransactionError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            // Base execution
            let result = op().await;

            // Notification stage: one event per physical attempt, success
            // or failure, before the retry decision.
            let outcome = if result.is_ok() {
                AttemptOutcome::Committed
            } else {
                AttemptOutcome::RolledBack
            };
            self.sink.emit(TransactionEvent { attempt, outcome });

            // Retry stage (outermost)
            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "transaction committed after restart");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt <= self.retry.max_retries => {
                    let backoff = self.retry.backoff_after(attempt);
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis(),
                        error = %err,
                        "transient conflict, restarting transaction"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(
                            attempt,
                            error = %err,
                            "transaction failed after exhausting retries"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

//! Notification queue.
//!
//! Future-dated notifications scheduled against the platform clock. A
//! notification becomes due when the clock reaches its effective instant -
//! under the controllable test-mode clock, "reaches" means the caller
//! advanced it. Enqueues run under the shared transaction policy with a
//! connection from the primary published data source, so scheduling gets
//! the same retry-on-conflict behavior as the rest of database access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tally_core::clock::Clock;
use tally_database::bridge::PublishedDataSource;
use tally_database::transaction::{TransactionError, TransactionPolicy};

/// A notification awaiting its effective instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Routing key for the eventual consumer
    pub key: String,
    /// Serialized notification body
    pub payload: Value,
    /// Instant the notification becomes due
    pub effective_at: DateTime<Utc>,
}

impl Notification {
    /// Create a notification due at `effective_at`.
    #[must_use]
    pub fn new(key: impl Into<String>, payload: Value, effective_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            payload,
            effective_at,
        }
    }
}

/// Errors from queue operations.
#[derive(Error, Debug)]
pub enum NotificationQueueError {
    /// The queue has been shut down.
    #[error("notification queue is shut down")]
    ShutDown,

    /// The enqueue transaction failed.
    #[error("failed to store notification: {0}")]
    Storage(#[from] TransactionError),
}

/// Clock-driven scheduler for future-dated notifications.
pub struct NotificationQueue {
    clock: Arc<dyn Clock>,
    data_source: Arc<PublishedDataSource>,
    policy: Arc<TransactionPolicy>,
    pending: Mutex<Vec<Notification>>,
    open: AtomicBool,
}

impl NotificationQueue {
    /// Build the queue over the platform clock, the primary data source,
    /// and the shared transaction policy.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        data_source: Arc<PublishedDataSource>,
        policy: Arc<TransactionPolicy>,
    ) -> Self {
        Self {
            clock,
            data_source,
            policy,
            pending: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        }
    }

    /// Schedule a notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationQueueError::ShutDown`] after shutdown, or
    /// [`NotificationQueueError::Storage`] when the enqueue transaction
    /// fails.
    #[allow(clippy::expect_used)]
    pub async fn enqueue(&self, notification: Notification) -> Result<(), NotificationQueueError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NotificationQueueError::ShutDown);
        }

        self.policy
            .execute(|| {
                let data_source = Arc::clone(&self.data_source);
                async move {
                    let _lease = data_source
                        .borrow()
                        .await
                        .map_err(|e| TransactionError::Fatal(e.to_string()))?;
                    Ok(())
                }
            })
            .await?;

        tracing::debug!(
            key = %notification.key,
            effective_at = %notification.effective_at,
            "notification scheduled"
        );
        self.pending
            .lock()
            .expect("queue lock poisoned - indicates a panic in another thread")
            .push(notification);
        Ok(())
    }

    /// Remove and return every notification due at the current clock
    /// reading, ordered by effective instant.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationQueueError::ShutDown`] after shutdown.
    #[allow(clippy::expect_used)]
    pub fn dequeue_due(&self) -> Result<Vec<Notification>, NotificationQueueError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NotificationQueueError::ShutDown);
        }

        let now = self.clock.now();
        let mut pending = self
            .pending
            .lock()
            .expect("queue lock poisoned - indicates a panic in another thread");
        let mut due: Vec<Notification> = Vec::new();
        pending.retain(|n| {
            if n.effective_at <= now {
                due.push(n.clone());
                false
            } else {
                true
            }
        });
        drop(pending);

        due.sort_by_key(|n| n.effective_at);
        Ok(due)
    }

    /// Number of notifications not yet due.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("queue lock poisoned - indicates a panic in another thread")
            .len()
    }

    /// Stop accepting enqueues and dequeues.
    #[allow(clippy::expect_used)]
    pub fn shut_down(&self) {
        self.open.store(false, Ordering::SeqCst);
        let remaining = self.pending_count();
        if remaining > 0 {
            tracing::warn!(remaining, "notification queue shut down with pending entries");
        } else {
            tracing::info!("notification queue shut down");
        }
    }
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationQueue")
            .field("pending", &self.pending_count())
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)] // Test code: assertions on fixtures

    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tally_database::pool::{PoolFactory, PoolRole};
    use tally_database::transaction::{NotificationSink, RetryLimit};
    use tally_testing::mocks::{RecordingPoolFactory, test_clock, test_pool_settings};

    async fn queue_with_clock() -> (NotificationQueue, Arc<tally_core::clock::ManualClock>) {
        let clock = test_clock();
        let settings = test_pool_settings();
        let pool = RecordingPoolFactory::new()
            .create_pool(&settings, PoolRole::Primary)
            .await
            .expect("pool");
        let data_source =
            Arc::new(PublishedDataSource::publish(&settings, pool, "datasource.main"));
        let policy = Arc::new(TransactionPolicy::new(
            NotificationSink::default(),
            RetryLimit::default(),
        ));
        (
            NotificationQueue::new(Arc::clone(&clock) as Arc<dyn Clock>, data_source, policy),
            clock,
        )
    }

    #[tokio::test]
    async fn future_notifications_wait_for_the_clock() {
        let (queue, clock) = queue_with_clock().await;
        let due_at = clock.now() + Duration::hours(1);

        queue
            .enqueue(Notification::new("invoice.overdue", json!({"id": 1}), due_at))
            .await
            .expect("enqueue");

        assert!(queue.dequeue_due().expect("dequeue").is_empty());
        assert_eq!(queue.pending_count(), 1);

        // Time is caller-driven under the controllable clock
        clock.advance(Duration::hours(2));

        let due = queue.dequeue_due().expect("dequeue");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, "invoice.overdue");
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn due_notifications_come_back_in_effective_order() {
        let (queue, clock) = queue_with_clock().await;
        let now = clock.now();

        queue
            .enqueue(Notification::new("later", json!({}), now + Duration::minutes(30)))
            .await
            .expect("enqueue");
        queue
            .enqueue(Notification::new("sooner", json!({}), now + Duration::minutes(10)))
            .await
            .expect("enqueue");

        clock.advance(Duration::hours(1));

        let due = queue.dequeue_due().expect("dequeue");
        let keys: Vec<&str> = due.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["sooner", "later"]);
    }

    #[tokio::test]
    async fn shutdown_refuses_further_work() {
        let (queue, clock) = queue_with_clock().await;
        queue.shut_down();

        assert!(matches!(
            queue
                .enqueue(Notification::new("k", json!({}), clock.now()))
                .await,
            Err(NotificationQueueError::ShutDown)
        ));
        assert!(matches!(
            queue.dequeue_due(),
            Err(NotificationQueueError::ShutDown)
        ));
    }
}

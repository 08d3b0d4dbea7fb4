//! Platform event buses.
//!
//! One delivery mechanism, two wirings. The in-process bus fans events out
//! to subscribers in the same process; the persistent bus journals each
//! event through the published data source, under the shared transaction
//! policy, before fanning out. The composition root installs one instance
//! of each - same mechanism, different [`BusWiring`] parameter.
//!
//! Events are persisted (where wired) before delivery, and delivery is
//! at-least-once: a lagging subscriber loses oldest events rather than
//! stalling publishers.

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tally_core::clock::Clock;
use tally_database::bridge::PublishedDataSource;
use tally_database::transaction::{TransactionError, TransactionPolicy};

/// Per-topic fan-out buffer. A subscriber this far behind starts losing
/// oldest events.
const TOPIC_BUFFER: usize = 256;

/// An event carried by the platform buses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Discriminator for subscribers
    pub event_type: String,
    /// Serialized event body
    pub payload: Value,
    /// Publication instant, stamped from the platform clock
    pub recorded_at: DateTime<Utc>,
}

/// Errors from bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// The event could not be journaled or delivered.
    #[error("publish failed on topic `{topic}`: {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// The bus has been shut down.
    #[error("bus `{name}` is shut down")]
    ShutDown {
        /// The bus that refused the operation
        name: String,
    },
}

/// Delivery wiring for one bus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWiring {
    /// Fan out to in-process subscribers only
    InProcess,
    /// Journal through the data source before fan-out
    Persistent,
}

impl BusWiring {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::Persistent => "persistent",
        }
    }
}

impl fmt::Display for BusWiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream of events for one subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = BusEvent> + Send>>;

/// Publish/subscribe boundary the rest of the platform sees.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// The name this bus is published under.
    fn name(&self) -> &str;

    /// How this instance is wired.
    fn wiring(&self) -> BusWiring;

    /// Publish an event on `topic`, stamping it from the platform clock.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ShutDown`] after shutdown, or
    /// [`BusError::PublishFailed`] when the persistent journal rejects the
    /// event.
    async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<BusEvent, BusError>;

    /// Subscribe to `topic`. The stream ends when the bus shuts down.
    fn subscribe(&self, topic: &str) -> EventStream;
}

/// Journal half of the persistent wiring.
///
/// Each record is written under the shared transaction policy with a
/// connection borrowed from the published data source, so journal writes
/// get the same retry-on-conflict and notification behavior as any other
/// database access.
struct Journal {
    data_source: Arc<PublishedDataSource>,
    policy: Arc<TransactionPolicy>,
    entries: Mutex<Vec<(String, BusEvent)>>,
}

impl Journal {
    #[allow(clippy::expect_used)]
    async fn record(&self, topic: &str, event: &BusEvent) -> Result<(), TransactionError> {
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

        self.entries
            .lock()
            .expect("journal lock poisoned - indicates a panic in another thread")
            .push((topic.to_string(), event.clone()));
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("journal lock poisoned - indicates a panic in another thread")
            .len()
    }
}

/// The platform's bus implementation: broadcast fan-out, optionally
/// journaled.
pub struct PlatformBus {
    name: String,
    wiring: BusWiring,
    clock: Arc<dyn Clock>,
    topics: RwLock<HashMap<String, broadcast::Sender<BusEvent>>>,
    journal: Option<Journal>,
    open: AtomicBool,
}

impl PlatformBus {
    /// Build a bus with in-process wiring.
    #[must_use]
    pub fn in_process(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            wiring: BusWiring::InProcess,
            clock,
            topics: RwLock::new(HashMap::new()),
            journal: None,
            open: AtomicBool::new(true),
        }
    }

    /// Build a bus with persistent wiring over `data_source` and `policy`.
    #[must_use]
    pub fn persistent(
        name: impl Into<String>,
        clock: Arc<dyn Clock>,
        data_source: Arc<PublishedDataSource>,
        policy: Arc<TransactionPolicy>,
    ) -> Self {
        Self {
            name: name.into(),
            wiring: BusWiring::Persistent,
            clock,
            topics: RwLock::new(HashMap::new()),
            journal: Some(Journal {
                data_source,
                policy,
                entries: Mutex::new(Vec::new()),
            }),
            open: AtomicBool::new(true),
        }
    }

    /// Number of journaled events (always 0 for in-process wiring).
    #[must_use]
    pub fn journal_len(&self) -> usize {
        self.journal.as_ref().map_or(0, Journal::len)
    }

    /// Stop accepting publishes and end every subscription stream.
    pub fn shut_down(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.clear_topics();
        tracing::info!(bus = %self.name, "event bus shut down");
    }

    #[allow(clippy::expect_used)]
    fn clear_topics(&self) {
        self.topics
            .write()
            .expect("bus topic lock poisoned - indicates a panic in another thread")
            .clear();
    }

    #[allow(clippy::expect_used)]
    fn topic_sender(&self, topic: &str) -> broadcast::Sender<BusEvent> {
        let topics = self
            .topics
            .read()
            .expect("bus topic lock poisoned - indicates a panic in another thread");
        if let Some(sender) = topics.get(topic) {
            return sender.clone();
        }
        drop(topics);

        let mut topics = self
            .topics
            .write()
            .expect("bus topic lock poisoned - indicates a panic in another thread");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for PlatformBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn wiring(&self) -> BusWiring {
        self.wiring
    }

    async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<BusEvent, BusError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BusError::ShutDown {
                name: self.name.clone(),
            });
        }

        let event = BusEvent {
            event_type: event_type.to_string(),
            payload,
            recorded_at: self.clock.now(),
        };

        // Journal before delivery (persistent wiring only)
        if let Some(journal) = &self.journal {
            journal
                .record(topic, &event)
                .await
                .map_err(|e| BusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;
        }

        // No subscribers is not an error
        let _ = self.topic_sender(topic).send(event.clone());
        tracing::debug!(
            bus = %self.name,
            topic,
            event_type,
            "event published"
        );
        Ok(event)
    }

    fn subscribe(&self, topic: &str) -> EventStream {
        let mut rx = self.topic_sender(topic).subscribe();
        Box::pin(stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged; oldest events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl fmt::Debug for PlatformBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformBus")
            .field("name", &self.name)
            .field("wiring", &self.wiring)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)] // Test code: assertions on fixtures

    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use tally_database::bridge::PublishedDataSource;
    use tally_database::pool::{PoolFactory, PoolRole};
    use tally_database::transaction::{NotificationSink, RetryLimit};
    use tally_testing::mocks::{RecordingPoolFactory, test_clock, test_pool_settings};

    fn policy() -> Arc<TransactionPolicy> {
        Arc::new(TransactionPolicy::new(
            NotificationSink::default(),
            RetryLimit::default(),
        ))
    }

    async fn data_source() -> Arc<PublishedDataSource> {
        let settings = test_pool_settings();
        let pool = RecordingPoolFactory::new()
            .create_pool(&settings, PoolRole::Primary)
            .await
            .expect("pool");
        Arc::new(PublishedDataSource::publish(&settings, pool, "datasource.main"))
    }

    #[tokio::test]
    async fn in_process_delivery_reaches_subscribers() {
        let bus = PlatformBus::in_process("bus.main", test_clock());
        let mut stream = bus.subscribe("invoice");

        bus.publish("invoice", "InvoiceCreated", json!({"id": 7}))
            .await
            .expect("publish");

        let event = stream.next().await.expect("event");
        assert_eq!(event.event_type, "InvoiceCreated");
        assert_eq!(event.payload, json!({"id": 7}));
        assert_eq!(bus.journal_len(), 0);
    }

    #[tokio::test]
    async fn events_are_stamped_from_the_platform_clock() {
        let clock = test_clock();
        let expected = clock.now();
        let bus = PlatformBus::in_process("bus.main", clock);

        let event = bus
            .publish("invoice", "InvoiceCreated", json!({}))
            .await
            .expect("publish");
        assert_eq!(event.recorded_at, expected);
    }

    #[tokio::test]
    async fn persistent_wiring_journals_before_delivery() {
        let bus = PlatformBus::persistent(
            "bus.external",
            test_clock(),
            data_source().await,
            policy(),
        );
        let mut stream = bus.subscribe("invoice");

        bus.publish("invoice", "InvoiceCreated", json!({"id": 7}))
            .await
            .expect("publish");

        assert_eq!(bus.journal_len(), 1);
        assert!(stream.next().await.is_some());
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = PlatformBus::in_process("bus.main", test_clock());
        let mut payments = bus.subscribe("payment");

        bus.publish("invoice", "InvoiceCreated", json!({}))
            .await
            .expect("publish");
        bus.publish("payment", "PaymentSettled", json!({}))
            .await
            .expect("publish");

        let event = payments.next().await.expect("event");
        assert_eq!(event.event_type, "PaymentSettled");
    }

    #[tokio::test]
    async fn shutdown_refuses_publishes_and_ends_streams() {
        let bus = PlatformBus::in_process("bus.main", test_clock());
        let mut stream = bus.subscribe("invoice");

        bus.shut_down();

        assert!(matches!(
            bus.publish("invoice", "InvoiceCreated", json!({})).await,
            Err(BusError::ShutDown { .. })
        ));
        assert!(stream.next().await.is_none());
    }
}

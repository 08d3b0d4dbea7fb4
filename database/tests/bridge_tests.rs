//! Integration tests for the data-source publication bridge.
//!
//! These tests live here rather than in a `#[cfg(test)]` module inside
//! `src/bridge.rs` because they depend on `tally-testing`, which itself
//! depends on `tally-database`. Kept inline, the lib-test build would link
//! two distinct instances of this crate and the mock's types would fail to
//! unify with the crate-under-test's types.

#![allow(clippy::expect_used, clippy::panic)] // Test code: assertions on fixtures

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tally_core::error::WiringError;
use tally_database::bridge::{MetricsObserver, PublishedDataSource, QueryObserver};
use tally_database::pool::{PoolFactory, PoolRole};
use tally_testing::mocks::{RecordingPoolFactory, test_pool_settings};

#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<(String, bool)>>,
}

impl QueryObserver for RecordingObserver {
    fn borrow_started(&self, _name: &str) {}

    fn borrow_finished(&self, name: &str, _elapsed: Duration, ok: bool) {
        self.seen
            .lock()
            .expect("observer lock poisoned")
            .push((name.to_string(), ok));
    }
}

async fn published() -> PublishedDataSource {
    let settings = test_pool_settings();
    let pool = RecordingPoolFactory::new()
        .create_pool(&settings, PoolRole::Primary)
        .await
        .expect("pool");
    PublishedDataSource::publish(&settings, pool, "datasource.main")
}

#[tokio::test]
async fn not_ready_until_second_phase() {
    let source = published().await;
    assert!(!source.ready());

    source
        .complete_wiring(Arc::new(MetricsObserver))
        .expect("first wiring");
    assert!(source.ready());
}

#[tokio::test]
async fn second_wiring_pass_is_rejected() {
    let source = published().await;
    source
        .complete_wiring(Arc::new(MetricsObserver))
        .expect("first wiring");

    match source.complete_wiring(Arc::new(MetricsObserver)) {
        Err(WiringError::AlreadyWired { name }) => assert_eq!(name, "datasource.main"),
        other => panic!("expected AlreadyWired, got {other:?}"),
    }
}

#[tokio::test]
async fn borrow_records_through_injected_observer() {
    let source = published().await;
    let observer = Arc::new(RecordingObserver::default());
    source
        .complete_wiring(Arc::clone(&observer) as Arc<dyn QueryObserver>)
        .expect("wiring");

    source.borrow().await.expect("borrow");

    let seen = observer.seen.lock().expect("observer lock poisoned");
    assert_eq!(seen.as_slice(), &[("datasource.main".to_string(), true)]);
}

#[tokio::test]
async fn borrow_works_before_wiring_but_is_unobserved() {
    // The registry never exposes this state to consumers; the proxy
    // itself still functions so phase ordering bugs fail loudly in
    // tests rather than deadlocking bootstrap.
    let source = published().await;
    assert!(source.borrow().await.is_ok());
}

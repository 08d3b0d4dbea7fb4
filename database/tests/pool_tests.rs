//! Integration tests for the pooled connection factory.
//!
//! These tests live here rather than in a `#[cfg(test)]` module inside
//! `src/pool.rs` because they depend on `tally-testing`, which itself
//! depends on `tally-database`. Kept inline, the lib-test build would link
//! two distinct instances of this crate and the mock's types would fail to
//! unify with the crate-under-test's types.

#![allow(clippy::expect_used, clippy::panic)] // Test code: assertions on fixtures

use std::sync::Arc;
use std::time::Duration;

use tally_core::config::DatabaseConfig;
use tally_core::error::ConnectivityError;
use tally_database::pool::{ConnectionPool, PoolFactory, PoolRole, PoolSettings};
use tally_testing::mocks::{RecordingPoolFactory, test_pool_settings};

#[tokio::test]
async fn equal_settings_yield_distinct_pools() {
    let factory = RecordingPoolFactory::new();
    let settings = test_pool_settings();

    let first = factory
        .create_pool(&settings, PoolRole::Primary)
        .await
        .expect("first pool");
    let second = factory
        .create_pool(&settings, PoolRole::Auth)
        .await
        .expect("second pool");

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(factory.call_count(), 2);
}

#[tokio::test]
async fn closing_one_pool_leaves_its_sibling_open() {
    let factory = RecordingPoolFactory::new();
    let settings = test_pool_settings();

    let first = factory
        .create_pool(&settings, PoolRole::Primary)
        .await
        .expect("first pool");
    let second = factory
        .create_pool(&settings, PoolRole::Auth)
        .await
        .expect("second pool");

    first
        .close(Duration::from_millis(100))
        .await
        .expect("close first");

    assert!(!first.is_open());
    assert!(second.is_open());
    assert!(second.borrow().await.is_ok());
}

#[tokio::test]
async fn borrow_after_close_is_refused() {
    let factory = RecordingPoolFactory::new();
    let pool = factory
        .create_pool(&test_pool_settings(), PoolRole::Primary)
        .await
        .expect("pool");

    pool.close(Duration::from_millis(100)).await.expect("close");

    match pool.borrow().await {
        Err(ConnectivityError::Closed { role }) => assert_eq!(role, "primary"),
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[test]
fn settings_derive_from_config() {
    let config = DatabaseConfig {
        url: "postgres://localhost/tally".to_string(),
        username: "tally".to_string(),
        password: "secret".to_string(),
        pool_size: 4,
        connect_timeout_secs: 2,
        acquire_timeout_secs: 3,
    };
    let settings = PoolSettings::from_config(&config);
    assert_eq!(settings.max_connections, 4);
    assert_eq!(settings.connect_timeout, Duration::from_secs(2));
    assert_eq!(settings.acquire_timeout, Duration::from_secs(3));
}

//! Latch and drain behavior seen by ordinary database callers
//!
//! Run with: cargo test --test latch_tests

use livemigrate::database::{DrainHelper, LatchState, NoopConnector};
use livemigrate::{DataSourceConfig, DatabaseManager, LatchMode, MigrationError};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_pending, assert_ready_ok, block_on, task};

fn open_manager() -> DatabaseManager {
    block_on(DatabaseManager::open(
        DataSourceConfig::new("source", "app", "secret"),
        Arc::new(NoopConnector),
    ))
    .unwrap()
}

#[test]
fn test_parked_caller_resumes_on_new_database() {
    let manager = open_manager();
    let target = block_on(manager.open_handle(DataSourceConfig::new("target", "app", "secret"))).unwrap();

    let latch = manager.acquire_latch(LatchMode::Local).unwrap();
    let mut parked = task::spawn(manager.acquire());
    assert_pending!(parked.poll());

    latch.unlatch_to(Arc::clone(&target)).unwrap();
    assert!(parked.is_woken());
    let guard = assert_ready_ok!(parked.poll());
    assert!(Arc::ptr_eq(guard.handle(), &target));
    assert_eq!(latch.state(), LatchState::Switched);
}

#[test]
fn test_caller_is_not_parked_without_latch() {
    let manager = open_manager();
    let mut acquire = task::spawn(manager.acquire());
    let guard = assert_ready_ok!(acquire.poll());
    assert_eq!(guard.handle().in_flight(), 1);
}

#[tokio::test]
async fn test_second_latch_is_refused() {
    let manager = DatabaseManager::open(
        DataSourceConfig::new("source", "app", "secret"),
        Arc::new(NoopConnector),
    )
    .await
    .unwrap();

    let _held = manager.acquire_latch(LatchMode::Cluster).unwrap();
    assert!(matches!(
        manager.acquire_latch(LatchMode::Local),
        Err(MigrationError::AlreadyLatched(_))
    ));
}

#[tokio::test]
async fn test_zero_timeout_drain_reports_busy_and_switch_still_works() {
    let manager = DatabaseManager::open(
        DataSourceConfig::new("source", "app", "secret"),
        Arc::new(NoopConnector),
    )
    .await
    .unwrap();
    let target = manager
        .open_handle(DataSourceConfig::new("target", "app", "secret"))
        .await
        .unwrap();
    let busy = manager.acquire().await.unwrap();

    let latch = manager.acquire_latch(LatchMode::Local).unwrap();
    let started = std::time::Instant::now();
    assert!(!DrainHelper::drain(&latch, Duration::ZERO, Duration::ZERO).await);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(busy.is_interrupted());

    latch.unlatch_to(Arc::clone(&target)).unwrap();
    assert!(Arc::ptr_eq(&manager.handle(), &target));
    assert!(!manager.is_latched());
}

//! Reconnect timer and stale event tests.

use super::harness::{
    handle_next, mock_backend, mock_config, msgs, pump, ConnectBehavior, LogCapture,
};
use crate::{BackendConfig, BackendStatus, Signal};
use std::time::Duration;
use tokio::time::Instant;

/// Paused time advances straight to timer deadlines, rounded up to the millisecond.
fn assert_elapsed(since: Instant, expected: Duration) {
    let elapsed = since.elapsed();
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(1),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn failed_connect_retries_after_interval() {
    let (mut backend, mut signals, mocks) = mock_backend(mock_config());
    mocks.script_connect(ConnectBehavior::Fail("refused".to_string()));
    let (logs, _guard) = LogCapture::install();

    backend.connect().await;
    pump(&mut backend, &mut signals).await;
    assert_eq!(backend.status(), BackendStatus::Ready);

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert_eq!(pump(&mut backend, &mut signals).await, 0);
    assert_eq!(mocks.created(), 1);

    let signal = handle_next(&mut backend, &mut signals).await;
    assert!(matches!(signal, Signal::RetryDue { .. }));
    assert!(logs.contains("Reconnecting with backend"));
    assert_eq!(mocks.created(), 2);
    assert_eq!(backend.generation(), 2);

    pump(&mut backend, &mut signals).await;
    assert_eq!(backend.status(), BackendStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn lost_connection_retries_after_same_interval() {
    let config = BackendConfig {
        reconnect_interval_ms: 250,
        ..mock_config()
    };
    let (mut backend, mut signals, mocks) = mock_backend(config);

    backend.connect().await;
    pump(&mut backend, &mut signals).await;
    mocks.sink(1).disconnected("broken pipe");
    pump(&mut backend, &mut signals).await;

    let started = Instant::now();
    handle_next(&mut backend, &mut signals).await;

    assert_elapsed(started, Duration::from_millis(250));
    assert_eq!(mocks.created(), 2);
    assert_eq!(mocks.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn keeps_retrying_at_fixed_interval() {
    let (mut backend, mut signals, mocks) = mock_backend(mock_config());
    mocks.set_default_connect(ConnectBehavior::Fail("down".to_string()));

    backend.connect().await;
    pump(&mut backend, &mut signals).await;

    let mut last = Instant::now();
    for attempt in 2..=5 {
        handle_next(&mut backend, &mut signals).await;
        assert_elapsed(last, Duration::from_millis(1000));
        last = Instant::now();

        assert_eq!(mocks.created(), attempt);
        pump(&mut backend, &mut signals).await;
        assert_eq!(backend.status(), BackendStatus::Ready);
    }
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_cancels_pending_retry() {
    let (mut backend, mut signals, mocks) = mock_backend(mock_config());
    mocks.script_connect(ConnectBehavior::Fail("refused".to_string()));

    backend.connect().await;
    pump(&mut backend, &mut signals).await;
    assert!(backend.reconnect_pending());

    backend.connect().await;
    assert!(!backend.reconnect_pending());
    pump(&mut backend, &mut signals).await;
    assert_eq!(backend.status(), BackendStatus::Connected);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pump(&mut backend, &mut signals).await, 0);
    assert_eq!(mocks.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_retry_is_ignored() {
    let (mut backend, mut signals, mocks) = mock_backend(mock_config());
    mocks.script_connect(ConnectBehavior::Fail("refused".to_string()));

    backend.connect().await;
    pump(&mut backend, &mut signals).await;

    backend.handle_signal(Signal::RetryDue { ticket: 999 }).await;

    assert_eq!(mocks.created(), 1);
    assert_eq!(backend.status(), BackendStatus::Ready);
    assert!(backend.reconnect_pending());
}

#[tokio::test]
async fn events_from_replaced_transport_are_ignored() {
    let (mut backend, mut signals, mocks) = mock_backend(mock_config());
    mocks.set_default_connect(ConnectBehavior::Silent);

    backend.connect().await;
    mocks.sink(1).failed("timeout");
    pump(&mut backend, &mut signals).await;

    backend.connect().await;
    assert_eq!(backend.generation(), 2);
    assert_eq!(mocks.closed(), 1);

    // The first transport wakes up late
    mocks.sink(1).connected();
    pump(&mut backend, &mut signals).await;
    assert_eq!(backend.status(), BackendStatus::Connecting);

    mocks.sink(2).connected();
    pump(&mut backend, &mut signals).await;
    assert_eq!(backend.status(), BackendStatus::Connected);

    mocks.sink(1).disconnected("late close");
    pump(&mut backend, &mut signals).await;
    assert_eq!(backend.status(), BackendStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn messages_survive_reconnect_cycle() {
    let (mut backend, mut signals, mocks) = mock_backend(mock_config());
    mocks.script_connect(ConnectBehavior::Fail("refused".to_string()));

    backend.send(b"1".to_vec()).await;
    pump(&mut backend, &mut signals).await;
    backend.send(b"2".to_vec()).await;
    assert_eq!(backend.status(), BackendStatus::Ready);

    handle_next(&mut backend, &mut signals).await;
    pump(&mut backend, &mut signals).await;

    assert_eq!(backend.status(), BackendStatus::Connected);
    assert_eq!(mocks.sent(), msgs(&["1", "2"]));
}

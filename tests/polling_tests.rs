//! Polling schedule backoff behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchyard::core::{PollCallback, PollingManager};
use switchyard::PollingConfig;

#[test]
fn five_errors_pin_the_interval_at_the_cap() {
    let manager = PollingManager::new(PollingConfig {
        base_interval: Duration::from_millis(100),
        jitter: Duration::ZERO,
        backoff_multiplier: 2.0,
        max_interval: Duration::from_millis(400),
    });

    for _ in 0..5 {
        manager.on_error();
    }
    assert_eq!(manager.current_interval(), Duration::from_millis(400));

    manager.on_success();
    assert_eq!(manager.current_interval(), Duration::from_millis(100));
    assert_eq!(manager.consecutive_errors(), 0);
}

#[test]
fn reset_restores_base_schedule() {
    let manager = PollingManager::new(PollingConfig {
        base_interval: Duration::from_secs(30),
        ..Default::default()
    });

    manager.on_error();
    manager.on_error();
    assert!(manager.current_interval() > Duration::from_secs(30));

    manager.reset();
    assert_eq!(manager.current_interval(), Duration::from_secs(30));
}

#[tokio::test]
async fn polls_run_and_shutdown_is_clean() {
    let manager = PollingManager::new(PollingConfig {
        base_interval: Duration::from_millis(15),
        jitter: Duration::ZERO,
        ..Default::default()
    });

    let polls = Arc::new(AtomicU32::new(0));
    let polls_cb = Arc::clone(&polls);
    let callback: PollCallback = Arc::new(move || {
        let polls = Arc::clone(&polls_cb);
        Box::pin(async move {
            polls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    manager.start(callback);
    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.shutdown().await;

    let count = polls.load(Ordering::SeqCst);
    assert!(count >= 1, "expected polls to run, got {count}");
    assert!(!manager.is_running());

    // No more polls after shutdown.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(polls.load(Ordering::SeqCst), count);
}

#[tokio::test]
async fn error_results_grow_the_live_interval() {
    let manager = PollingManager::new(PollingConfig {
        base_interval: Duration::from_millis(10),
        jitter: Duration::ZERO,
        backoff_multiplier: 2.0,
        max_interval: Duration::from_secs(60),
    });

    let callback: PollCallback = Arc::new(|| Box::pin(async { Err(()) }));
    manager.start(callback);

    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.shutdown().await;

    assert!(manager.consecutive_errors() >= 1);
    assert!(manager.current_interval() > Duration::from_millis(10));
}

#[tokio::test]
async fn poll_now_does_not_wait_for_the_schedule() {
    let manager = PollingManager::new(PollingConfig {
        base_interval: Duration::from_secs(120),
        jitter: Duration::ZERO,
        ..Default::default()
    });

    let polls = Arc::new(AtomicU32::new(0));
    let polls_cb = Arc::clone(&polls);
    let callback: PollCallback = Arc::new(move || {
        let polls = Arc::clone(&polls_cb);
        Box::pin(async move {
            polls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    manager.start(callback);
    manager.poll_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.shutdown().await;

    assert!(polls.load(Ordering::SeqCst) >= 1);
}

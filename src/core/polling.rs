//! Background polling with jitter and backoff.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Polling schedule parameters.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between polls while healthy. Default: 30s.
    pub base_interval: Duration,
    /// Maximum random delay added to every scheduled poll. Default: 1s.
    pub jitter: Duration,
    /// Interval growth factor after a failed poll. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Ceiling for the backed-off interval. Default: 5 minutes.
    pub max_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(300),
        }
    }
}

impl PollingConfig {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            ..Default::default()
        }
    }
}

/// The poll operation. `Err` triggers backoff, `Ok` resets it.
pub type PollCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = std::result::Result<(), ()>> + Send>> + Send + Sync>;

/// Schedules periodic flag refreshes.
///
/// Each poll is scheduled from the then-current interval plus uniform
/// jitter. Failures multiply the interval (capped at the maximum); a success
/// snaps it back to the base. Panics escaping the callback are contained and
/// treated as poll errors.
pub struct PollingManager {
    config: PollingConfig,
    current_interval: Arc<Mutex<Duration>>,
    consecutive_errors: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    poll_now_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PollingManager {
    pub fn new(config: PollingConfig) -> Self {
        let base = config.base_interval;
        Self {
            config,
            current_interval: Arc::new(Mutex::new(base)),
            consecutive_errors: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
            poll_now_tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Starts the polling loop. The first poll fires after the base interval
    /// plus jitter.
    pub fn start(&self, on_poll: PollCallback) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (poll_now_tx, mut poll_now_rx) = mpsc::channel::<()>(8);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.poll_now_tx.lock() = Some(poll_now_tx);

        let config = self.config.clone();
        let current_interval = Arc::clone(&self.current_interval);
        let consecutive_errors = Arc::clone(&self.consecutive_errors);
        let running = Arc::clone(&self.running);

        tracing::debug!("polling started, interval {:?}", config.base_interval);

        *self.worker.lock() = Some(tokio::spawn(async move {
            loop {
                let delay = Self::next_delay(&config, *current_interval.lock());

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("polling loop shutting down");
                        break;
                    }
                    _ = poll_now_rx.recv() => {
                        Self::execute_poll(&on_poll, &config, &current_interval, &consecutive_errors).await;
                    }
                    _ = tokio::time::sleep(delay) => {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        Self::execute_poll(&on_poll, &config, &current_interval, &consecutive_errors).await;
                    }
                }
            }
            running.store(false, Ordering::Release);
        }));
    }

    async fn execute_poll(
        on_poll: &PollCallback,
        config: &PollingConfig,
        current_interval: &Arc<Mutex<Duration>>,
        consecutive_errors: &Arc<AtomicU32>,
    ) {
        // A panicking callback must not kill the scheduler.
        let outcome = std::panic::AssertUnwindSafe(on_poll())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!("poll callback panicked");
                Err(())
            });

        match outcome {
            Ok(()) => {
                consecutive_errors.store(0, Ordering::Release);
                *current_interval.lock() = config.base_interval;
            }
            Err(()) => {
                let errors = consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                let backed_off = Self::backed_off(config, *current_interval.lock());
                *current_interval.lock() = backed_off;
                tracing::debug!("poll failed ({errors} consecutive), interval now {backed_off:?}");
            }
        }
    }

    fn backed_off(config: &PollingConfig, current: Duration) -> Duration {
        let next = current.as_millis() as f64 * config.backoff_multiplier;
        Duration::from_millis(next.min(config.max_interval.as_millis() as f64) as u64)
    }

    fn next_delay(config: &PollingConfig, interval: Duration) -> Duration {
        let jitter = (rand::random::<f64>() * config.jitter.as_millis() as f64) as u64;
        interval + Duration::from_millis(jitter)
    }

    /// Runs a poll out of band without waiting for the next tick.
    pub async fn poll_now(&self) {
        let tx = self.poll_now_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    /// Resets backoff after an externally observed success.
    pub fn on_success(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
        *self.current_interval.lock() = self.config.base_interval;
    }

    /// Applies backoff after an externally observed failure.
    pub fn on_error(&self) {
        self.consecutive_errors.fetch_add(1, Ordering::AcqRel);
        let backed_off = Self::backed_off(&self.config, *self.current_interval.lock());
        *self.current_interval.lock() = backed_off;
    }

    pub fn reset(&self) {
        self.on_success();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn current_interval(&self) -> Duration {
        *self.current_interval.lock()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    /// Cancels the scheduled polls.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
        *self.poll_now_tx.lock() = None;
        tracing::debug!("polling stopped");
    }

    /// Stops polling and waits (bounded) for the worker to exit.
    pub async fn shutdown(&self) {
        self.stop().await;
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .is_err()
            {
                tracing::warn!("polling worker did not exit in time");
            }
        }
    }
}

impl Drop for PollingManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

//! Batching queue for analytics events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::context::EvaluationContext;
use crate::error::Result;
use crate::SDK_VERSION;

/// Maximum accepted event type length.
const MAX_EVENT_TYPE_LEN: usize = 256;

/// Event queue sizing and cadence.
#[derive(Debug, Clone)]
pub struct EventQueueConfig {
    /// Queue capacity; new events are dropped once it is full. Default: 1000.
    pub max_size: usize,
    /// Queue length that triggers an early flush. Default: 10.
    pub batch_size: usize,
    /// Interval between periodic flushes. Default: 30s.
    pub flush_interval: Duration,
    /// Master switch; a disabled queue accepts nothing. Default: true.
    pub enabled: bool,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            batch_size: 10,
            flush_interval: Duration::from_secs(30),
            enabled: true,
        }
    }
}

/// A single analytics event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    /// RFC 3339.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    pub sdk_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,
    /// Context snapshot with private attributes already stripped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    events: Vec<Event>,
}

/// Sends a drained batch. Injected so the queue can be exercised without a
/// live transport.
pub type EventSender =
    Arc<dyn Fn(Vec<Event>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Builds the wire body for a batch submission.
pub fn batch_body(events: Vec<Event>) -> serde_json::Value {
    serde_json::to_value(BatchRequest { events }).unwrap_or(serde_json::Value::Null)
}

/// Bounded mailbox of analytics events with batched, best-effort delivery.
///
/// `track` never blocks: a full queue drops the new event. Reaching the
/// batch size schedules a flush on the worker; a periodic flush runs
/// regardless. A flush drains the buffer under the lock, then sends outside
/// it; a failed send discards the batch.
pub struct EventQueue {
    config: EventQueueConfig,
    events: Arc<Mutex<Vec<Event>>>,
    session_id: String,
    environment_id: Arc<RwLock<Option<String>>>,
    sender: Option<EventSender>,
    running: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    flush_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EventQueue {
    pub fn new(config: EventQueueConfig, session_id: impl Into<String>) -> Self {
        Self {
            config,
            events: Arc::new(Mutex::new(Vec::new())),
            session_id: session_id.into(),
            environment_id: Arc::new(RwLock::new(None)),
            sender: None,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
            flush_tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Installs the delivery function. Must be set before [`start`](Self::start).
    pub fn set_sender(&mut self, sender: EventSender) {
        self.sender = Some(sender);
    }

    /// Environment id stamped onto subsequent events, learned from
    /// `/sdk/init`.
    pub fn set_environment_id(&self, id: impl Into<String>) {
        *self.environment_id.write() = Some(id.into());
    }

    /// Starts the periodic flush worker.
    pub fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (flush_tx, mut flush_rx) = mpsc::channel::<()>(8);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.flush_tx.lock() = Some(flush_tx);

        let events = Arc::clone(&self.events);
        let sender = self.sender.clone();
        let flush_interval = self.config.flush_interval;

        *self.worker.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        Self::drain_and_send(&events, &sender).await;
                        tracing::debug!("event queue worker shutting down");
                        break;
                    }
                    _ = flush_rx.recv() => {
                        Self::drain_and_send(&events, &sender).await;
                    }
                    _ = ticker.tick() => {
                        Self::drain_and_send(&events, &sender).await;
                    }
                }
            }
        }));

        tracing::debug!("event queue started");
    }

    /// Drains the buffer into a local batch, then sends outside the lock.
    /// A failed send discards the batch.
    async fn drain_and_send(events: &Arc<Mutex<Vec<Event>>>, sender: &Option<EventSender>) {
        let Some(sender) = sender else { return };

        let batch = {
            let mut events = events.lock();
            if events.is_empty() {
                return;
            }
            std::mem::take(&mut *events)
        };

        let count = batch.len();
        if let Err(e) = sender(batch).await {
            tracing::warn!("failed to send {count} events, batch dropped: {e}");
        } else {
            tracing::debug!("sent {count} events");
        }
    }

    /// Enqueues an event. Non-blocking; dropped when the queue is full.
    pub fn track(
        &self,
        event_type: impl Into<String>,
        data: Option<HashMap<String, serde_json::Value>>,
    ) {
        self.enqueue(event_type, data, None);
    }

    /// Enqueues an event carrying a context snapshot. Private attributes are
    /// stripped before the snapshot is taken.
    pub fn track_with_context(
        &self,
        event_type: impl Into<String>,
        data: Option<HashMap<String, serde_json::Value>>,
        context: &EvaluationContext,
    ) {
        let snapshot = context.strip_private_attributes().to_map();
        self.enqueue(event_type, data, Some(snapshot));
    }

    fn enqueue(
        &self,
        event_type: impl Into<String>,
        data: Option<HashMap<String, serde_json::Value>>,
        context: Option<HashMap<String, serde_json::Value>>,
    ) {
        if !self.config.enabled {
            return;
        }

        let event_type = event_type.into();
        if event_type.is_empty() || event_type.len() > MAX_EVENT_TYPE_LEN {
            tracing::warn!("invalid event type, dropping event");
            return;
        }

        let event = Event {
            event_type,
            timestamp: chrono::Utc::now().to_rfc3339(),
            session_id: Some(self.session_id.clone()),
            environment_id: self.environment_id.read().clone(),
            sdk_version: SDK_VERSION.to_string(),
            data,
            context,
        };

        let should_flush = {
            let mut events = self.events.lock();
            if events.len() >= self.config.max_size {
                tracing::warn!("event queue full, dropping event: {}", event.event_type);
                return;
            }
            events.push(event);
            events.len() >= self.config.batch_size
        };

        if should_flush {
            if let Some(ref tx) = *self.flush_tx.lock() {
                let _ = tx.try_send(());
            }
        }
    }

    /// Asks the worker to flush now.
    pub async fn flush(&self) {
        let tx = self.flush_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    /// Current buffer length.
    pub fn size(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the periodic flush, runs one final flush, and waits (bounded)
    /// for the worker.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
        *self.flush_tx.lock() = None;

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .is_err()
            {
                tracing::warn!("event queue worker did not exit in time");
            }
        }
        tracing::debug!("event queue stopped");
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

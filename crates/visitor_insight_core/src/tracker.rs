//! crates/visitor_insight_core/src/tracker.rs
//!
//! Client-side event batching. Critical events go straight to the transport;
//! everything else is queued and flushed when the queue reaches its threshold
//! or after a quiet period since the last enqueue. A background task owns the
//! quiet-period timer and the heartbeat; it is started and stopped explicitly.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{Event, EventData, HeartbeatData};
use crate::ingest::{with_retry, RetryPolicy};
use crate::ports::{EventTransport, PortResult};

#[derive(Debug, Clone, Copy)]
pub struct BatcherSettings {
    pub max_batch: usize,
    pub flush_after: Duration,
    pub heartbeat_every: Option<Duration>,
    pub critical_retry: RetryPolicy,
    pub routine_retry: RetryPolicy,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            max_batch: 10,
            flush_after: Duration::from_secs(5),
            heartbeat_every: Some(Duration::from_secs(30)),
            critical_retry: RetryPolicy::critical(),
            routine_retry: RetryPolicy::routine(),
        }
    }
}

/// Supplies the activity counters accumulated since the previous heartbeat.
pub trait HeartbeatSource: Send + Sync {
    fn snapshot(&self) -> HeartbeatData;
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct EventBatcher {
    transport: Arc<dyn EventTransport>,
    visitor_id: Uuid,
    session_id: Option<Uuid>,
    settings: BatcherSettings,
    heartbeat: Option<Arc<dyn HeartbeatSource>>,
    queue: Mutex<Vec<Event>>,
    last_enqueue: Mutex<Instant>,
    enqueued: Notify,
    worker: Mutex<Option<Worker>>,
}

impl EventBatcher {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        visitor_id: Uuid,
        session_id: Option<Uuid>,
        settings: BatcherSettings,
    ) -> Self {
        Self {
            transport,
            visitor_id,
            session_id,
            settings,
            heartbeat: None,
            queue: Mutex::new(Vec::new()),
            last_enqueue: Mutex::new(Instant::now()),
            enqueued: Notify::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn with_heartbeat(mut self, source: Arc<dyn HeartbeatSource>) -> Self {
        self.heartbeat = Some(source);
        self
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Tracks an event. Critical events are delivered before this returns.
    pub async fn track(&self, payload: EventData) -> PortResult<()> {
        let event = Event::new(self.visitor_id, self.session_id, payload, Utc::now());
        if event.event_type().is_critical() {
            return self.send_critical(event).await;
        }

        let full = {
            let mut queue = self.queue.lock().await;
            queue.push(event);
            queue.len() >= self.settings.max_batch
        };
        *self.last_enqueue.lock().await = Instant::now();
        self.enqueued.notify_one();

        if full {
            self.flush().await;
        }
        Ok(())
    }

    async fn send_critical(&self, event: Event) -> PortResult<()> {
        let batch = [event];
        let label = batch[0].event_type().as_str();
        let sent = with_retry(self.settings.critical_retry, label, || {
            self.transport.send(&batch)
        })
        .await;
        if let Err(e) = &sent {
            error!(
                event_id = %batch[0].id,
                event_type = label,
                error = %e,
                "Critical event delivery failed after retries; possible lead/revenue loss"
            );
        }
        sent
    }

    /// Sends everything queued. Returns how many events were delivered.
    pub async fn flush(&self) -> usize {
        let batch: Vec<Event> = std::mem::take(&mut *self.queue.lock().await);
        if batch.is_empty() {
            return 0;
        }

        match with_retry(self.settings.routine_retry, "flush", || self.transport.send(&batch)).await {
            Ok(()) => {
                debug!(count = batch.len(), "Flushed event batch");
                batch.len()
            }
            Err(e) => {
                warn!(count = batch.len(), error = %e, "Dropping event batch after failed flush");
                0
            }
        }
    }

    /// Starts the background flush/heartbeat task. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.run(token).await });
        *worker = Some(Worker { handle, cancel });
        info!(visitor_id = %self.visitor_id, "Event batcher started");
    }

    async fn run(&self, cancel: CancellationToken) {
        let beat_every = self
            .settings
            .heartbeat_every
            .unwrap_or(Duration::from_secs(3600));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + beat_every, beat_every);
        let beats = self.heartbeat.is_some() && self.settings.heartbeat_every.is_some();

        loop {
            let has_pending = !self.queue.lock().await.is_empty();
            let deadline = *self.last_enqueue.lock().await + self.settings.flush_after;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.enqueued.notified() => continue,
                _ = tokio::time::sleep_until(deadline), if has_pending => {
                    self.flush().await;
                }
                _ = heartbeat.tick(), if beats => {
                    if let Some(source) = &self.heartbeat {
                        if let Err(e) = self.track(EventData::Heartbeat(source.snapshot())).await {
                            warn!(error = %e, "Heartbeat could not be queued");
                        }
                    }
                }
            }
        }
    }

    /// Stops the background task and flushes whatever is still queued.
    pub async fn shutdown(&self) -> usize {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                warn!(error = %e, "Event batcher task ended abnormally");
            }
        }
        let flushed = self.flush().await;
        info!(visitor_id = %self.visitor_id, flushed, "Event batcher stopped");
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EmailCaptureData, EventType, PageViewData};
    use crate::ports::PortError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingTransport {
        batches: std::sync::Mutex<Vec<Vec<Event>>>,
        failures: AtomicU32,
    }

    impl RecordingTransport {
        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    #[async_trait]
    impl EventTransport for RecordingTransport {
        async fn send(&self, events: &[Event]) -> PortResult<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(PortError::Unavailable("offline".to_string()));
            }
            self.batches.lock().unwrap().push(events.to_vec());
            Ok(())
        }
    }

    struct FixedBeat;

    impl HeartbeatSource for FixedBeat {
        fn snapshot(&self) -> HeartbeatData {
            HeartbeatData {
                seconds_active: 30,
                ..Default::default()
            }
        }
    }

    fn page(path: &str) -> EventData {
        EventData::PageView(PageViewData {
            path: path.to_string(),
            title: None,
            referrer: None,
        })
    }

    fn batcher(transport: Arc<RecordingTransport>) -> Arc<EventBatcher> {
        Arc::new(EventBatcher::new(
            transport,
            Uuid::new_v4(),
            None,
            BatcherSettings {
                heartbeat_every: None,
                ..Default::default()
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn queue_flushes_when_it_reaches_the_threshold() {
        let transport = Arc::new(RecordingTransport::default());
        let batcher = batcher(transport.clone());

        for i in 0..9 {
            batcher.track(page(&format!("/p{}", i))).await.unwrap();
        }
        assert!(transport.batch_sizes().is_empty());

        batcher.track(page("/p9")).await.unwrap();
        assert_eq!(transport.batch_sizes(), vec![10]);
        assert_eq!(batcher.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_period_flushes_a_partial_batch() {
        let transport = Arc::new(RecordingTransport::default());
        let batcher = batcher(transport.clone());
        batcher.start().await;

        batcher.track(page("/a")).await.unwrap();
        batcher.track(page("/b")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(transport.batch_sizes().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.batch_sizes(), vec![2]);
        batcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn critical_events_bypass_the_queue_and_are_retried() {
        let transport = Arc::new(RecordingTransport::default());
        transport.failures.store(2, Ordering::SeqCst);
        let batcher = batcher(transport.clone());

        batcher.track(page("/a")).await.unwrap();
        batcher
            .track(EventData::EmailCapture(EmailCaptureData {
                email: "a@x.com".to_string(),
                name: None,
                source: None,
            }))
            .await
            .unwrap();

        let batches = transport.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].event_type(), EventType::EmailCapture);
        assert_eq!(batcher.pending().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_routine_flush_is_dropped_after_one_retry() {
        let transport = Arc::new(RecordingTransport::default());
        transport.failures.store(2, Ordering::SeqCst);
        let batcher = batcher(transport.clone());

        batcher.track(page("/a")).await.unwrap();
        assert_eq!(batcher.flush().await, 0);
        assert_eq!(batcher.pending().await, 0);
        assert!(transport.batch_sizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_remaining_events() {
        let transport = Arc::new(RecordingTransport::default());
        let batcher = batcher(transport.clone());
        batcher.start().await;
        batcher.track(page("/a")).await.unwrap();

        assert_eq!(batcher.shutdown().await, 1);
        assert_eq!(transport.batch_sizes(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_is_queued_on_schedule() {
        let transport = Arc::new(RecordingTransport::default());
        let batcher = Arc::new(
            EventBatcher::new(
                transport.clone(),
                Uuid::new_v4(),
                None,
                BatcherSettings {
                    heartbeat_every: Some(Duration::from_secs(30)),
                    ..Default::default()
                },
            )
            .with_heartbeat(Arc::new(FixedBeat)),
        );
        batcher.start().await;

        tokio::time::sleep(Duration::from_secs(36)).await;
        let batches = transport.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].event_type(), EventType::Heartbeat);
        batcher.shutdown().await;
    }
}

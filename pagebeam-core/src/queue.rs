//! In-memory batching of event records
//!
//! The queue buffers records and flushes them when the batch-size threshold
//! is hit, when the flush timer fires, or when the owner tears the pipeline
//! down. Records in a flushed batch are delivered individually and
//! concurrently; a failed delivery is counted and dropped, never retried.
//! This is an at-most-once, best-effort model: tracking data is non-critical
//! telemetry, not business-critical state.
//!
//! Exactly-once flushing holds under the timer-vs-threshold race because
//! both paths swap the pending batch out under the same lock; whichever
//! loses finds an empty queue and does nothing. The armed timer task only
//! ever sleeps; it hands the actual flush to a fresh task, so aborting the
//! timer can never cancel an in-flight batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};

use crate::config::TrackerConfig;
use crate::delivery::DeliveryClient;
use crate::event::EventRecord;

/// Snapshot of queue counters.
#[derive(Debug, Default, Clone)]
pub struct QueueStats {
    /// Number of non-empty flushes performed
    pub flushes: usize,
    /// Records delivered successfully (including suppressed synthetic successes)
    pub delivered: usize,
    /// Records dropped after a failed delivery
    pub failed: usize,
}

#[derive(Default)]
struct StatsInner {
    flushes: AtomicUsize,
    delivered: AtomicUsize,
    failed: AtomicUsize,
}

struct Inner {
    pending: Vec<EventRecord>,
    /// Armed flush timer. Non-`None` only while the queue is non-empty and
    /// no size-threshold flush has been scheduled.
    timer: Option<JoinHandle<()>>,
}

/// Buffers event records and flushes them to the [`DeliveryClient`].
///
/// Cheap to clone; clones share the same pending batch and counters. `add`
/// and the timer require a Tokio runtime context.
#[derive(Clone)]
pub struct BatchQueue {
    inner: Arc<Mutex<Inner>>,
    client: Arc<DeliveryClient>,
    stats: Arc<StatsInner>,
    batch_size: usize,
    flush_interval: Duration,
}

impl BatchQueue {
    pub fn new(client: Arc<DeliveryClient>, batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pending: Vec::new(),
                timer: None,
            })),
            client,
            stats: Arc::new(StatsInner::default()),
            batch_size: batch_size.max(1),
            flush_interval,
        }
    }

    pub fn from_config(client: Arc<DeliveryClient>, config: &TrackerConfig) -> Self {
        Self::new(client, config.batch_size, config.flush_interval())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record to the pending batch.
    ///
    /// Reaching the batch-size threshold cancels any armed timer and
    /// triggers an immediate background flush; otherwise a timer is armed
    /// for the flush interval if none is running.
    pub fn add(&self, record: EventRecord) {
        let batch = {
            let mut inner = self.lock();
            inner.pending.push(record);

            if inner.pending.len() >= self.batch_size {
                if let Some(timer) = inner.timer.take() {
                    timer.abort();
                }
                Some(std::mem::take(&mut inner.pending))
            } else {
                if inner.timer.is_none() {
                    inner.timer = Some(self.arm_timer());
                }
                None
            }
        };

        if let Some(batch) = batch {
            let queue = self.clone();
            tokio::spawn(async move { queue.deliver(batch).await });
        }
    }

    fn arm_timer(&self) -> JoinHandle<()> {
        let queue = self.clone();
        let interval = self.flush_interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            // Hand off to a fresh task: aborting the timer must only ever
            // cancel the sleep, never a batch already taken for delivery.
            let flusher = queue.clone();
            tokio::spawn(async move { flusher.flush().await });
        })
    }

    /// Swap the pending batch for an empty one, cancel any armed timer, and
    /// deliver every swapped-out record concurrently, waiting for all of
    /// them to settle. No-op when the queue is empty.
    pub async fn flush(&self) {
        let batch = {
            let mut inner = self.lock();
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut inner.pending)
        };

        self.deliver(batch).await;
    }

    async fn deliver(&self, batch: Vec<EventRecord>) {
        if batch.is_empty() {
            return;
        }

        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        let count = batch.len();

        let mut tasks = JoinSet::new();
        for record in batch {
            let client = Arc::clone(&self.client);
            tasks.spawn(async move { client.send(&record).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) if result.success => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(result) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Event dropped after failed delivery"
                    );
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Delivery task did not complete");
                }
            }
        }

        tracing::debug!(count, "Batch flushed");
    }

    /// Number of records waiting in the pending batch.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether any records are waiting.
    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Current counter snapshot.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            flushes: self.stats.flushes.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_events(&self) -> Vec<EventRecord> {
        self.lock().pending.clone()
    }
}

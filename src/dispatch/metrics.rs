use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

/// Highest trackable dispatch lag: one hour in milliseconds
const MAX_LAG_MS: u64 = 3_600_000;

/// Dispatcher counters plus an HDR histogram of receive-to-send lag
pub struct DispatchMetrics {
    enqueued: AtomicU64,
    drained: AtomicU64,
    sent: AtomicU64,
    coalesced: AtomicU64,
    flushed_on_stop: AtomicU64,
    dropped_on_stop: AtomicU64,
    queue_warnings: AtomicU64,
    lag_ms: Mutex<Histogram<u64>>,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        // Constant bounds: 1ms to 1h, 3 significant figures
        let lag_ms = Histogram::new_with_bounds(1, MAX_LAG_MS, 3).expect("static histogram bounds");

        Self {
            enqueued: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            flushed_on_stop: AtomicU64::new(0),
            dropped_on_stop: AtomicU64::new(0),
            queue_warnings: AtomicU64::new(0),
            lag_ms: Mutex::new(lag_ms),
        }
    }

    #[inline]
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_drained(&self, count: usize) {
        self.drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queue_warning(&self) {
        self.queue_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self, count: usize) {
        self.flushed_on_stop.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: usize) {
        self.dropped_on_stop.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Count one send and its lag (server send time minus receive time)
    pub fn record_sent(&self, lag_ms: i64) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        let lag = (lag_ms.max(1) as u64).min(MAX_LAG_MS);
        let _ = self.lag_ms.lock().record(lag);
    }

    pub fn snapshot(&self, queue_depth: usize, pending: usize, channels: usize) -> DispatcherStats {
        let lag = self.lag_ms.lock();
        let (p50, p95, p99, max) = if lag.len() == 0 {
            (0, 0, 0, 0)
        } else {
            (
                lag.value_at_percentile(50.0),
                lag.value_at_percentile(95.0),
                lag.value_at_percentile(99.0),
                lag.max(),
            )
        };

        DispatcherStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            flushed_on_stop: self.flushed_on_stop.load(Ordering::Relaxed),
            dropped_on_stop: self.dropped_on_stop.load(Ordering::Relaxed),
            queue_warnings: self.queue_warnings.load(Ordering::Relaxed),
            queue_depth,
            pending_throttled: pending,
            channels,
            lag_p50_ms: p50,
            lag_p95_ms: p95,
            lag_p99_ms: p99,
            lag_max_ms: max,
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time dispatcher statistics
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DispatcherStats {
    /// Records accepted by enqueue (lifetime)
    pub enqueued: u64,
    /// Records taken off the queue by the drain loop
    pub drained: u64,
    /// Messages handed to the fan-out sink
    pub sent: u64,
    /// Records superseded in a throttle slot before they were sent
    pub coalesced: u64,
    pub flushed_on_stop: u64,
    pub dropped_on_stop: u64,
    pub queue_warnings: u64,
    pub queue_depth: usize,
    pub pending_throttled: usize,
    /// Channels with a latest value
    pub channels: usize,
    pub lag_p50_ms: u64,
    pub lag_p95_ms: u64,
    pub lag_p99_ms: u64,
    pub lag_max_ms: u64,
}

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::config::DispatcherConfig;
use crate::models::TickRecord;
use crate::utils::time::now_ms;

use super::metrics::{DispatchMetrics, DispatcherStats};
use super::throttle::{Offer, ThrottleSlots};

/// Channel prefix for best-bid/offer updates
pub const BBO_CHANNEL_PREFIX: &str = "bbo:";

/// Channel a symbol's updates are published on: `bbo:{SYMBOL}`
pub fn channel_for(symbol: &str) -> String {
    format!("{}{}", BBO_CHANNEL_PREFIX, symbol)
}

/// BBO update as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BboBroadcast {
    pub symbol: String,
    #[schema(value_type = String)]
    pub bid_price: Decimal,
    #[schema(value_type = String)]
    pub bid_qty: Decimal,
    #[schema(value_type = String)]
    pub ask_price: Decimal,
    #[schema(value_type = String)]
    pub ask_qty: Decimal,
    /// Exchange event time (ms)
    pub timestamp: i64,
    /// When the dispatcher processed the record (ms)
    pub server_timestamp: i64,
    pub backend_latency: Option<i64>,
}

impl BboBroadcast {
    pub fn from_record(record: &TickRecord, server_timestamp: i64) -> Self {
        Self {
            symbol: record.symbol.clone(),
            bid_price: record.bid_price,
            bid_qty: record.bid_qty,
            ask_price: record.ask_price,
            ask_qty: record.ask_qty,
            timestamp: record.event_time,
            server_timestamp,
            backend_latency: record.latency_ms,
        }
    }
}

/// Destination for throttled updates
///
/// Implementations must not block; they are called from the drain loop.
pub trait FanoutSink: Send + Sync {
    fn dispatch(&self, channel: &str, payload: &BboBroadcast);
}

/// A payload waiting in a throttle slot, with the receive time used for lag
#[derive(Debug, Clone)]
struct Outbound {
    payload: BboBroadcast,
    received_ms: i64,
}

/// Queue-fed, per-channel throttled broadcaster
///
/// Producers call [`enqueue`](Self::enqueue), which never blocks. A single
/// background task drains the queue in small batches, remembers the latest
/// value per channel and forwards updates to the [`FanoutSink`] at most once
/// per `throttle_interval` per channel. Values arriving inside the interval
/// replace each other; the newest one is sent when the interval elapses.
///
/// # Example
/// ```ignore
/// let dispatcher = Arc::new(BroadcastDispatcher::new(DispatcherConfig::default(), sink));
/// dispatcher.start();
/// dispatcher.enqueue(record);
/// dispatcher.stop().await;
/// ```
pub struct BroadcastDispatcher {
    config: DispatcherConfig,
    sink: Arc<dyn FanoutSink>,

    tx: mpsc::UnboundedSender<TickRecord>,

    /// Receiver (taken when start() is called)
    rx: Mutex<Option<mpsc::UnboundedReceiver<TickRecord>>>,

    depth: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,

    /// Latest processed value per channel, throttled or not
    latest: Arc<DashMap<String, BboBroadcast>>,

    metrics: Arc<DispatchMetrics>,
    cancel: CancellationToken,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastDispatcher {
    pub fn new(config: DispatcherConfig, sink: Arc<dyn FanoutSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tracing::info!(
            "📡 BroadcastDispatcher created: batch_size={}, throttle={}ms",
            config.batch_size,
            config.throttle_interval.as_millis()
        );

        Self {
            config,
            sink,
            tx,
            rx: Mutex::new(Some(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
            latest: Arc::new(DashMap::new()),
            metrics: Arc::new(DispatchMetrics::new()),
            cancel: CancellationToken::new(),
            task_handle: Mutex::new(None),
        }
    }

    /// Queue a record for broadcast; never blocks
    pub fn enqueue(&self, record: TickRecord) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        if self.tx.send(record).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!("📡 Dispatcher stopped, record not queued");
            return;
        }
        self.metrics.record_enqueued();

        if depth > self.config.queue_warn_threshold {
            self.metrics.record_queue_warning();
            tracing::warn!(
                "⚠️  Broadcast queue depth {} exceeds {}",
                depth,
                self.config.queue_warn_threshold
            );
        }
    }

    /// Spawn the drain loop
    ///
    /// A second call (or a call after stop) logs a warning and does nothing.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            tracing::warn!("⚠️  BroadcastDispatcher already started");
            return;
        };

        let worker = DispatchWorker {
            throttle: ThrottleSlots::new(self.config.throttle_interval),
            config: self.config.clone(),
            sink: Arc::clone(&self.sink),
            rx,
            depth: Arc::clone(&self.depth),
            pending: Arc::clone(&self.pending),
            latest: Arc::clone(&self.latest),
            metrics: Arc::clone(&self.metrics),
            cancel: self.cancel.clone(),
        };

        let handle = tokio::spawn(worker.run());
        *self.task_handle.lock() = Some(handle);

        tracing::info!("📡 BroadcastDispatcher started");
    }

    /// Stop the drain loop, flushing pending throttled values once
    ///
    /// Waits up to `shutdown_timeout`; a loop that does not finish in time is
    /// aborted and its pending values are lost.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task_handle.lock().take();
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => tracing::info!("📡 BroadcastDispatcher stopped"),
            Ok(Err(e)) => tracing::error!("❌ Dispatch task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "⚠️  Dispatch loop did not stop within {:?}, aborting",
                    self.config.shutdown_timeout
                );
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Last processed value for a channel (`bbo:{SYMBOL}`)
    pub fn latest(&self, channel: &str) -> Option<BboBroadcast> {
        self.latest.get(channel).map(|entry| entry.value().clone())
    }

    pub fn latest_for_symbol(&self, symbol: &str) -> Option<BboBroadcast> {
        self.latest(&channel_for(symbol))
    }

    /// Every channel's last value, ordered by symbol
    pub fn latest_all(&self) -> Vec<BboBroadcast> {
        let mut all: Vec<BboBroadcast> = self.latest.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> DispatcherStats {
        self.metrics.snapshot(
            self.queue_depth(),
            self.pending.load(Ordering::Relaxed),
            self.latest.len(),
        )
    }
}

/// State owned by the drain task
struct DispatchWorker {
    config: DispatcherConfig,
    sink: Arc<dyn FanoutSink>,
    rx: mpsc::UnboundedReceiver<TickRecord>,
    throttle: ThrottleSlots<Outbound>,
    depth: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    latest: Arc<DashMap<String, BboBroadcast>>,
    metrics: Arc<DispatchMetrics>,
    cancel: CancellationToken,
}

impl DispatchWorker {
    async fn run(mut self) {
        tracing::info!("📡 Broadcast dispatch loop started");
        let mut batch = Vec::with_capacity(self.config.batch_size);

        loop {
            let wait = self
                .throttle
                .next_due_in(Instant::now())
                .map_or(self.config.poll_timeout, |due| due.min(self.config.poll_timeout));

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = tokio::time::timeout(wait, self.rx.recv()) => received,
            };

            match received {
                Ok(Some(record)) => {
                    batch.push(record);
                    while batch.len() < self.config.batch_size {
                        match self.rx.try_recv() {
                            Ok(record) => batch.push(record),
                            Err(_) => break,
                        }
                    }
                }
                Ok(None) => {
                    tracing::warn!("📡 Dispatch queue closed");
                    break;
                }
                // Idle wait elapsed; fall through to flush due values
                Err(_) => {}
            }

            if !batch.is_empty() {
                self.depth.fetch_sub(batch.len(), Ordering::Relaxed);
                self.metrics.record_drained(batch.len());
                tracing::debug!("📡 Dispatching batch of {}", batch.len());

                let now = Instant::now();
                for record in batch.drain(..) {
                    self.process(record, now);
                }
            }

            for (channel, outbound) in self.throttle.take_due(Instant::now()) {
                self.send(&channel, &outbound);
            }
            self.pending.store(self.throttle.pending_count(), Ordering::Relaxed);
        }

        self.shutdown();
    }

    fn process(&mut self, record: TickRecord, now: Instant) {
        let channel = channel_for(&record.symbol);
        let outbound = Outbound {
            payload: BboBroadcast::from_record(&record, now_ms()),
            received_ms: record.received_time,
        };

        self.latest.insert(channel.clone(), outbound.payload.clone());

        match self.throttle.offer(&channel, outbound, now) {
            Offer::Send(outbound) => self.send(&channel, &outbound),
            Offer::Deferred { replaced } => {
                if replaced {
                    self.metrics.record_coalesced();
                }
            }
        }
    }

    fn send(&self, channel: &str, outbound: &Outbound) {
        self.sink.dispatch(channel, &outbound.payload);
        self.metrics.record_sent(now_ms() - outbound.received_ms);
    }

    fn shutdown(mut self) {
        let pending = self.throttle.drain_pending();
        for (channel, outbound) in &pending {
            self.send(channel, outbound);
        }
        self.metrics.record_flushed(pending.len());
        self.pending.store(0, Ordering::Relaxed);

        self.rx.close();
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            self.depth.fetch_sub(dropped, Ordering::Relaxed);
            self.metrics.record_dropped(dropped);
            tracing::warn!("⚠️  Dropped {} queued records on shutdown", dropped);
        }

        tracing::info!(
            "📡 Broadcast dispatch loop ended (flushed {} pending)",
            pending.len()
        );
    }
}

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::config::CacheConfig;
use crate::dispatch::BroadcastDispatcher;
use crate::ingest::{normalize, Rejection};
use crate::models::TickRecord;
use crate::utils::time::now_ms;

use super::persistence::{LoadedSnapshot, PersistSummary, PersistenceError, SnapshotStore};
use super::store::{InsertOutcome, TickCache};

/// Result of admitting one raw update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted(TickRecord),
    Duplicate,
    Rejected(Rejection),
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("no snapshot files written ({failures} symbols failed)")]
    NothingWritten { failures: usize },
}

/// Manager counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ManagerStats {
    pub admitted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub replayed: u64,
    pub eviction_runs: u64,
    pub records_evicted: u64,
    pub persistence_runs: u64,
    pub persistence_failures: u64,
    pub running: bool,
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    replayed: AtomicU64,
    eviction_runs: AtomicU64,
    records_evicted: AtomicU64,
    persistence_runs: AtomicU64,
    persistence_failures: AtomicU64,
}

/// Eviction and persistence shared by the background loop and `stop()`
#[derive(Clone)]
struct Maintenance {
    cache: Arc<TickCache>,
    config: CacheConfig,
    store: Option<SnapshotStore>,
    counters: Arc<Counters>,
}

impl Maintenance {
    /// Copy recent records under the cache lock, write them on the blocking pool
    async fn persist_now(&self) -> Result<PersistSummary, MaintenanceError> {
        let Some(store) = self.store.clone() else {
            return Ok(PersistSummary::default());
        };

        let snapshot = self.cache.recent_snapshot(self.config.persist_max_records);
        let result = tokio::task::spawn_blocking(move || store.write_snapshot(&snapshot, Utc::now())).await;

        match result {
            Ok(Ok(summary)) => {
                self.counters
                    .persistence_failures
                    .fetch_add(summary.failures as u64, Ordering::Relaxed);
                // Every write failed: not a persistence, leave the mark alone
                if summary.files_written == 0 && summary.failures > 0 {
                    return Err(MaintenanceError::NothingWritten {
                        failures: summary.failures,
                    });
                }

                self.cache.mark_persisted(now_ms());
                self.counters.persistence_runs.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "💾 Persisted {} records across {} files",
                    summary.records_written,
                    summary.files_written
                );
                Ok(summary)
            }
            Ok(Err(e)) => {
                self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
            Err(e) => {
                self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    fn evict(&self) -> usize {
        let removed = self.cache.evict_older_than(self.config.retention.as_millis() as i64);
        self.counters.eviction_runs.fetch_add(1, Ordering::Relaxed);
        self.counters.records_evicted.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

/// Loop-local bookkeeping
struct LoopState {
    last_insert_count: u64,
    last_persist_attempt_ms: i64,
}

/// Owns the cache lifecycle: admission, periodic maintenance, persistence
///
/// Admission works whether or not the background loop is running. The loop
/// wakes every `tick_interval` and:
/// - persists the most recent records when `persistence_interval` has passed
/// - evicts records older than `retention` when the insert counter crosses a
///   multiple of `eviction_insert_step`, or when `cleanup_interval` has passed
///   since the last persistence or eviction mark
pub struct CacheManager {
    maintenance: Maintenance,
    dispatcher: Option<Arc<BroadcastDispatcher>>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let cache = Arc::new(TickCache::with_persistence(
            config.max_items_per_symbol,
            config.persist_to_disk,
            config.cache_dir.clone(),
        ));
        let store = config
            .persist_to_disk
            .then(|| SnapshotStore::new(config.cache_dir.clone()));

        Self {
            maintenance: Maintenance {
                cache,
                config,
                store,
                counters: Arc::new(Counters::default()),
            },
            dispatcher: None,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            task_handle: Mutex::new(None),
        }
    }

    /// Forward admitted records to a dispatcher
    pub fn with_dispatcher(mut self, dispatcher: Arc<BroadcastDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn cache(&self) -> Arc<TickCache> {
        Arc::clone(&self.maintenance.cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.maintenance.config
    }

    /// Normalize, dedup and store one raw update
    ///
    /// Malformed input is logged and reported as `Rejected`; it never panics
    /// or disturbs the cache.
    pub fn admit(&self, payload: &Value) -> AdmitOutcome {
        self.admit_value(payload, true)
    }

    fn admit_value(&self, payload: &Value, broadcast: bool) -> AdmitOutcome {
        match normalize(payload, now_ms()) {
            Ok(record) => self.store_record(record, broadcast),
            Err(rejection) => {
                self.maintenance.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("⚠️  Rejected update: {}", rejection);
                AdmitOutcome::Rejected(rejection)
            }
        }
    }

    fn store_record(&self, record: TickRecord, broadcast: bool) -> AdmitOutcome {
        let counters = &self.maintenance.counters;

        match self.maintenance.cache.insert_if_absent(record.clone()) {
            InsertOutcome::Duplicate => {
                counters.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("🔁 Duplicate {} @ {}", record.symbol, record.event_time);
                AdmitOutcome::Duplicate
            }
            InsertOutcome::Inserted => {
                counters.admitted.fetch_add(1, Ordering::Relaxed);
                if broadcast {
                    if let Some(dispatcher) = &self.dispatcher {
                        dispatcher.enqueue(record.clone());
                    }
                }
                AdmitOutcome::Admitted(record)
            }
        }
    }

    /// Replay persisted snapshots, then spawn the maintenance loop
    ///
    /// A second call logs a warning and returns.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("⚠️  CacheManager already running");
            return;
        }

        if let Some(store) = self.maintenance.store.clone() {
            match tokio::task::spawn_blocking(move || store.load_latest()).await {
                Ok(Ok(snapshots)) => self.replay(snapshots),
                Ok(Err(e)) => tracing::error!("❌ Failed to load persisted cache: {}", e),
                Err(e) => tracing::error!("❌ Cache load task failed: {}", e),
            }
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let maintenance = self.maintenance.clone();
        let handle = tokio::spawn(run_loop(maintenance, cancel));
        *self.task_handle.lock() = Some(handle);

        tracing::info!(
            "🚀 CacheManager started (tick={:?}, retention={:?})",
            self.maintenance.config.tick_interval,
            self.maintenance.config.retention
        );
    }

    fn replay(&self, snapshots: Vec<LoadedSnapshot>) {
        for snapshot in snapshots {
            let mut admitted = 0u64;
            for value in &snapshot.records {
                if let AdmitOutcome::Admitted(_) = self.admit_value(value, false) {
                    admitted += 1;
                }
            }
            self.maintenance.counters.replayed.fetch_add(admitted, Ordering::Relaxed);
            tracing::info!(
                "📂 Replayed {}/{} records for {}",
                admitted,
                snapshot.records.len(),
                snapshot.symbol
            );
        }
    }

    /// Stop the loop and flush to disk
    ///
    /// Waits up to `shutdown_timeout` for the loop, aborting it otherwise.
    /// The final persistence runs regardless and is awaited before returning.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("⚠️  CacheManager not running");
            return;
        }

        self.cancel.lock().cancel();

        let handle = self.task_handle.lock().take();
        if let Some(mut handle) = handle {
            let timeout = self.maintenance.config.shutdown_timeout;
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("❌ Maintenance task failed: {}", e),
                Err(_) => {
                    tracing::warn!("⚠️  Maintenance loop did not stop within {:?}, aborting", timeout);
                    handle.abort();
                }
            }
        }

        if self.maintenance.store.is_some() {
            if let Err(e) = self.maintenance.persist_now().await {
                tracing::error!("❌ Final persistence failed: {}", e);
            }
        }

        tracing::info!("🛑 CacheManager stopped");
    }

    /// Run one persistence cycle immediately
    pub async fn persist_now(&self) -> Result<PersistSummary, MaintenanceError> {
        self.maintenance.persist_now().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ManagerStats {
        let c = &self.maintenance.counters;
        ManagerStats {
            admitted: c.admitted.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            replayed: c.replayed.load(Ordering::Relaxed),
            eviction_runs: c.eviction_runs.load(Ordering::Relaxed),
            records_evicted: c.records_evicted.load(Ordering::Relaxed),
            persistence_runs: c.persistence_runs.load(Ordering::Relaxed),
            persistence_failures: c.persistence_failures.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }
}

async fn run_loop(maintenance: Maintenance, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(maintenance.config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    let mut state = LoopState {
        last_insert_count: maintenance.cache.insert_count(),
        last_persist_attempt_ms: now_ms(),
    };

    tracing::info!("🔄 Cache maintenance loop started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = run_iteration(&maintenance, &mut state).await {
            tracing::error!("❌ Cache maintenance iteration failed: {}", e);
        }
    }

    tracing::info!("🔄 Cache maintenance loop ended");
}

async fn run_iteration(maintenance: &Maintenance, state: &mut LoopState) -> Result<(), MaintenanceError> {
    let config = &maintenance.config;
    let now = now_ms();
    let mut result = Ok(());

    // Scheduled on attempts, so a failing disk retries at the interval, not every tick
    if maintenance.store.is_some()
        && now - state.last_persist_attempt_ms >= config.persistence_interval.as_millis() as i64
    {
        state.last_persist_attempt_ms = now;
        result = maintenance.persist_now().await.map(|_| ());
    }

    let inserts = maintenance.cache.insert_count();
    let step = config.eviction_insert_step.max(1);
    let crossed_step = inserts / step > state.last_insert_count / step;
    state.last_insert_count = inserts;

    let since_mark = now - maintenance.cache.last_persistence_ms();
    let cleanup_due = since_mark > config.cleanup_interval.as_millis() as i64;

    if crossed_step || cleanup_due {
        let removed = maintenance.evict();
        tracing::debug!(
            "🧹 Eviction pass removed {} (step crossed: {}, cleanup due: {})",
            removed,
            crossed_step,
            cleanup_due
        );
        if maintenance.store.is_none() {
            maintenance.cache.mark_persisted(now);
        }
    }

    result
}

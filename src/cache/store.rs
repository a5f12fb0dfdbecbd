use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use utoipa::ToSchema;

use crate::models::TickRecord;
use crate::utils::time::now_ms;

use super::latency::{LatencyStats, LatencyTracker};
use super::series::{TimeSeries, Timestamped};

/// Default per-symbol capacity
pub const DEFAULT_MAX_ITEMS_PER_SYMBOL: usize = 1_000_000;

impl Timestamped for TickRecord {
    fn timestamp(&self) -> i64 {
        self.event_time
    }
}

/// Tick series and latency history for one instrument
#[derive(Debug, Clone)]
struct SymbolEntry {
    ticks: TimeSeries<TickRecord>,
    latency: LatencyTracker,
}

impl SymbolEntry {
    fn new(capacity: usize) -> Self {
        Self {
            ticks: TimeSeries::new(capacity),
            latency: LatencyTracker::new(capacity),
        }
    }
}

/// Everything guarded by the cache lock
#[derive(Debug, Default)]
struct CacheState {
    symbols: HashMap<String, SymbolEntry>,
    insert_count: u64,
    last_persistence_ms: i64,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CacheStats {
    pub total_symbols: usize,
    pub total_records: usize,
    pub per_symbol_counts: BTreeMap<String, usize>,
    pub per_symbol_latency_counts: BTreeMap<String, usize>,
    pub capacity: usize,
    pub persistence_enabled: bool,
    pub cache_dir: String,
    pub total_inserts: u64,
}

/// Result of a dedup-checked insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Bounded, time-ordered BBO cache for all instruments
///
/// Features:
/// - Per-symbol tick series + latency tracker, created lazily on first insert
/// - Binary-search range queries returning owned copies
/// - Linear-interpolated latency percentiles
/// - Age-based eviction
///
/// One coarse `parking_lot::Mutex` guards all per-symbol state. Every public
/// method takes it for a bounded amount of work (copy-out, O(log n + k)
/// insert or evict) and never performs I/O or formatting under it.
pub struct TickCache {
    state: Mutex<CacheState>,
    max_items_per_symbol: usize,
    persistence_enabled: bool,
    cache_dir: String,
}

impl TickCache {
    pub fn new(max_items_per_symbol: usize) -> Self {
        Self::with_persistence(max_items_per_symbol, false, "cache_data")
    }

    pub fn with_persistence(
        max_items_per_symbol: usize,
        persistence_enabled: bool,
        cache_dir: impl Into<String>,
    ) -> Self {
        let cache_dir = cache_dir.into();
        // A series always holds at least one record
        let max_items_per_symbol = max_items_per_symbol.max(1);
        tracing::info!(
            "🗃️  TickCache initialized: max_items_per_symbol={}, persist_to_disk={}",
            max_items_per_symbol,
            persistence_enabled
        );

        Self {
            state: Mutex::new(CacheState::default()),
            max_items_per_symbol,
            persistence_enabled,
            cache_dir,
        }
    }

    /// Admit one tick unconditionally (no dedup)
    pub fn insert(&self, tick: TickRecord) {
        let mut state = self.state.lock();
        Self::insert_locked(&mut state, tick, self.max_items_per_symbol);
    }

    /// Dedup check and insert in one critical section
    ///
    /// Ticks are keyed by `(symbol, event_time)`; two near-simultaneous
    /// duplicates cannot both pass the check.
    pub fn insert_if_absent(&self, tick: TickRecord) -> InsertOutcome {
        let mut state = self.state.lock();

        let duplicate = state
            .symbols
            .get(&tick.symbol)
            .is_some_and(|entry| entry.ticks.contains_timestamp(tick.event_time));
        if duplicate {
            return InsertOutcome::Duplicate;
        }

        Self::insert_locked(&mut state, tick, self.max_items_per_symbol);
        InsertOutcome::Inserted
    }

    fn insert_locked(state: &mut CacheState, tick: TickRecord, capacity: usize) {
        let entry = state.symbols.entry(tick.symbol.clone()).or_insert_with(|| {
            tracing::info!("🆕 Creating series for symbol: {}", tick.symbol);
            SymbolEntry::new(capacity)
        });

        if let Some(latency) = tick.latency_ms {
            entry.latency.record(tick.event_time, latency);
        }
        entry.ticks.insert(tick);
        state.insert_count += 1;
    }

    /// Whether a tick with exactly this event time is stored
    pub fn contains(&self, symbol: &str, event_time: i64) -> bool {
        self.state
            .lock()
            .symbols
            .get(symbol)
            .is_some_and(|entry| entry.ticks.contains_timestamp(event_time))
    }

    /// Ticks with `start <= event_time <= end`, oldest first
    ///
    /// Without bounds, returns the most recent `limit` ticks (or all). With
    /// bounds and a limit, keeps the most recent `limit` inside the window.
    /// Unknown symbols give an empty vector.
    pub fn query(
        &self,
        symbol: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<TickRecord> {
        let state = self.state.lock();
        state
            .symbols
            .get(symbol)
            .map(|entry| entry.ticks.range(start, end, limit))
            .unwrap_or_default()
    }

    /// Latency statistics over the inclusive window
    pub fn latency_stats(&self, symbol: &str, start: Option<i64>, end: Option<i64>) -> LatencyStats {
        // Copy the window out, sort and interpolate after releasing the lock
        let samples = {
            let state = self.state.lock();
            match state.symbols.get(symbol) {
                Some(entry) => entry.latency.window(start, end),
                None => return LatencyStats::default(),
            }
        };
        LatencyStats::from_samples(samples)
    }

    /// Known symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.state.lock().symbols.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Drop every record older than `now - max_age_ms`
    pub fn evict_older_than(&self, max_age_ms: i64) -> usize {
        self.evict_before(now_ms() - max_age_ms)
    }

    /// Drop every record with `event_time < cutoff` from ticks and latency
    ///
    /// Returns the number of ticks removed across all symbols.
    pub fn evict_before(&self, cutoff: i64) -> usize {
        let mut state = self.state.lock();
        let mut removed = 0;

        for entry in state.symbols.values_mut() {
            removed += entry.ticks.evict_before(cutoff);
            entry.latency.evict_before(cutoff);
        }

        if removed > 0 {
            tracing::info!("🧹 Evicted {} ticks older than {}", removed, cutoff);
        }
        removed
    }

    /// Most recent `max_per_symbol` ticks of every symbol
    ///
    /// The lock is held only for the copy; serialization happens outside.
    pub fn recent_snapshot(&self, max_per_symbol: usize) -> Vec<(String, Vec<TickRecord>)> {
        let state = self.state.lock();
        state
            .symbols
            .iter()
            .filter(|(_, entry)| !entry.ticks.is_empty())
            .map(|(symbol, entry)| (symbol.clone(), entry.ticks.tail(max_per_symbol)))
            .collect()
    }

    /// Lifetime insert counter
    pub fn insert_count(&self) -> u64 {
        self.state.lock().insert_count
    }

    pub fn last_persistence_ms(&self) -> i64 {
        self.state.lock().last_persistence_ms
    }

    pub fn mark_persisted(&self, at_ms: i64) {
        self.state.lock().last_persistence_ms = at_ms;
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.state
            .lock()
            .symbols
            .get(symbol)
            .map_or(0, |entry| entry.ticks.len())
    }

    pub fn cache_stats(&self) -> CacheStats {
        let state = self.state.lock();

        let per_symbol_counts: BTreeMap<String, usize> = state
            .symbols
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.ticks.len()))
            .collect();
        let per_symbol_latency_counts = state
            .symbols
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.latency.len()))
            .collect();

        CacheStats {
            total_symbols: state.symbols.len(),
            total_records: per_symbol_counts.values().sum(),
            per_symbol_counts,
            per_symbol_latency_counts,
            capacity: self.max_items_per_symbol,
            persistence_enabled: self.persistence_enabled,
            cache_dir: self.cache_dir.clone(),
            total_inserts: state.insert_count,
        }
    }

    /// Full reset, including counters
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = CacheState::default();
        tracing::warn!("🗑️  TickCache cleared");
    }
}

impl Default for TickCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS_PER_SYMBOL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::thread;

    fn tick(symbol: &str, event_time: i64) -> TickRecord {
        TickRecord::new(
            symbol,
            event_time,
            event_time + 15,
            dec!(100.0),
            dec!(1),
            dec!(100.5),
            dec!(2),
        )
    }

    fn times(ticks: &[TickRecord]) -> Vec<i64> {
        ticks.iter().map(|t| t.event_time).collect()
    }

    #[test]
    fn test_query_is_ordered_after_out_of_order_inserts() {
        let cache = TickCache::new(100);
        for ts in [1000, 3000, 2000] {
            cache.insert(tick("BTCUSDT", ts));
        }
        assert_eq!(times(&cache.query("BTCUSDT", None, None, None)), vec![1000, 2000, 3000]);
        assert_eq!(cache.insert_count(), 3);
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        let cache = TickCache::new(100);
        assert!(cache.query("NOPE", None, None, Some(5)).is_empty());
        assert_eq!(cache.latency_stats("NOPE", None, None).count, 0);
    }

    #[test]
    fn test_insert_if_absent_dedups() {
        let cache = TickCache::new(100);
        assert_eq!(cache.insert_if_absent(tick("BTCUSDT", 2000)), InsertOutcome::Inserted);
        assert_eq!(cache.insert_if_absent(tick("BTCUSDT", 2000)), InsertOutcome::Duplicate);
        assert_eq!(cache.insert_if_absent(tick("ETHUSDT", 2000)), InsertOutcome::Inserted);
        assert_eq!(cache.len("BTCUSDT"), 1);
        assert_eq!(cache.insert_count(), 2);
    }

    #[test]
    fn test_capacity_keeps_newest() {
        let cache = TickCache::new(5);
        for ts in 0..8 {
            cache.insert(tick("BTCUSDT", ts * 10));
        }
        assert_eq!(times(&cache.query("BTCUSDT", None, None, None)), vec![30, 40, 50, 60, 70]);
    }

    #[test]
    fn test_zero_capacity_holds_one_record() {
        let cache = TickCache::new(0);
        cache.insert(tick("BTCUSDT", 10));
        cache.insert(tick("BTCUSDT", 20));

        assert_eq!(times(&cache.query("BTCUSDT", None, None, None)), vec![20]);
        assert_eq!(cache.cache_stats().capacity, 1);
    }

    #[test]
    fn test_query_with_bounds_and_limit() {
        let cache = TickCache::new(100);
        for ts in 1..=10 {
            cache.insert(tick("BTCUSDT", ts * 100));
        }
        assert_eq!(times(&cache.query("BTCUSDT", Some(300), Some(600), None)), vec![300, 400, 500, 600]);
        assert_eq!(times(&cache.query("BTCUSDT", Some(300), Some(600), Some(2))), vec![500, 600]);
        assert_eq!(times(&cache.query("BTCUSDT", None, None, Some(3))), vec![800, 900, 1000]);
    }

    #[test]
    fn test_evict_before_trims_ticks_and_latency() {
        let cache = TickCache::new(100);
        for ts in [1000, 2000, 3000] {
            cache.insert(tick("BTCUSDT", ts));
        }

        assert_eq!(cache.evict_before(2000), 1);
        assert_eq!(times(&cache.query("BTCUSDT", None, None, None)), vec![2000, 3000]);
        assert_eq!(cache.latency_stats("BTCUSDT", None, None).count, 2);
    }

    #[test]
    fn test_evict_older_than_uses_wall_clock() {
        let cache = TickCache::new(100);
        let now = now_ms();
        cache.insert(tick("BTCUSDT", now - 60_000));
        cache.insert(tick("BTCUSDT", now - 1_000));

        assert_eq!(cache.evict_older_than(30_000), 1);
        assert_eq!(cache.len("BTCUSDT"), 1);
    }

    #[test]
    fn test_latency_stats_window() {
        let cache = TickCache::new(100);
        for (i, ts) in (1..=100).map(|i| (i, i * 10)) {
            let mut t = tick("BTCUSDT", ts);
            t.latency_ms = Some(i);
            cache.insert(t);
        }
        let mut no_latency = tick("BTCUSDT", 5_000);
        no_latency.latency_ms = None;
        cache.insert(no_latency);

        let all = cache.latency_stats("BTCUSDT", None, None);
        assert_eq!(all.count, 100);
        assert_eq!(all.min, 1);
        assert_eq!(all.max, 100);

        let window = cache.latency_stats("BTCUSDT", Some(100), Some(200));
        assert_eq!(window.count, 11);
        assert_eq!(window.min, 10);
        assert_eq!(window.max, 20);
    }

    #[test]
    fn test_symbols_and_stats() {
        let cache = TickCache::with_persistence(50, true, "somewhere");
        cache.insert(tick("ETHUSDT", 1));
        cache.insert(tick("BTCUSDT", 1));
        cache.insert(tick("BTCUSDT", 2));

        assert_eq!(cache.symbols(), vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);

        let stats = cache.cache_stats();
        assert_eq!(stats.total_symbols, 2);
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.per_symbol_counts["BTCUSDT"], 2);
        assert_eq!(stats.per_symbol_latency_counts["ETHUSDT"], 1);
        assert_eq!(stats.capacity, 50);
        assert!(stats.persistence_enabled);

        cache.clear();
        assert!(cache.symbols().is_empty());
        assert_eq!(cache.insert_count(), 0);
    }

    #[test]
    fn test_recent_snapshot_copies_tail() {
        let cache = TickCache::new(100);
        for ts in 0..20 {
            cache.insert(tick("BTCUSDT", ts));
        }
        let snapshot = cache.recent_snapshot(5);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(times(&snapshot[0].1), vec![15, 16, 17, 18, 19]);
    }

    #[test]
    fn test_concurrent_duplicate_admission() {
        let cache = Arc::new(TickCache::new(10_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    (0..500)
                        .filter(|ts| cache.insert_if_absent(tick("BTCUSDT", *ts)) == InsertOutcome::Inserted)
                        .count()
                })
            })
            .collect();

        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(inserted, 500);
        assert_eq!(cache.len("BTCUSDT"), 500);
    }
}

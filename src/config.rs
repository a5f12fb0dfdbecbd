use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;

const HOUR: Duration = Duration::from_secs(3600);

/// Cache and lifecycle-manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CacheConfig {
    /// Maximum ticks (and latency samples) kept per symbol
    #[serde(default = "default_max_items")]
    pub max_items_per_symbol: usize,

    /// Write JSON snapshots periodically and on shutdown, replay them on start
    #[serde(default)]
    pub persist_to_disk: bool,

    /// Directory for snapshot files
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Evict when this much time has passed since the last persistence
    #[serde(default = "default_cleanup_interval", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub cleanup_interval: Duration,

    /// Records older than this are evicted
    #[serde(default = "default_retention", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub retention: Duration,

    /// Evict whenever the insert counter crosses a multiple of this
    #[serde(default = "default_eviction_insert_step")]
    pub eviction_insert_step: u64,

    /// Minimum spacing between periodic persistence cycles
    #[serde(default = "default_persistence_interval", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub persistence_interval: Duration,

    /// Most recent records per symbol written per cycle
    #[serde(default = "default_persist_max_records")]
    pub persist_max_records: usize,

    /// Background loop wake-up period
    #[serde(default = "default_tick_interval", with = "duration_millis")]
    #[schema(value_type = u64)]
    pub tick_interval: Duration,

    /// How long stop() waits for the background loop before abandoning it
    #[serde(default = "default_shutdown_timeout", with = "duration_millis")]
    #[schema(value_type = u64)]
    pub shutdown_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items_per_symbol: default_max_items(),
            persist_to_disk: false,
            cache_dir: default_cache_dir(),
            cleanup_interval: default_cleanup_interval(),
            retention: default_retention(),
            eviction_insert_step: default_eviction_insert_step(),
            persistence_interval: default_persistence_interval(),
            persist_max_records: default_persist_max_records(),
            tick_interval: default_tick_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_items_per_symbol: env_or("BBO_CACHE_CAPACITY", defaults.max_items_per_symbol).max(1),
            persist_to_disk: env_or("BBO_PERSIST", defaults.persist_to_disk),
            cache_dir: std::env::var("BBO_CACHE_DIR").unwrap_or(defaults.cache_dir),
            cleanup_interval: env_hours("BBO_CLEANUP_INTERVAL_HOURS").unwrap_or(defaults.cleanup_interval),
            retention: env_hours("BBO_RETENTION_HOURS").unwrap_or(defaults.retention),
            eviction_insert_step: env_or("BBO_EVICTION_INSERT_STEP", defaults.eviction_insert_step),
            persistence_interval: Duration::from_secs(env_or(
                "BBO_PERSIST_INTERVAL_SECS",
                defaults.persistence_interval.as_secs(),
            )),
            persist_max_records: env_or("BBO_PERSIST_MAX_RECORDS", defaults.persist_max_records),
            tick_interval: defaults.tick_interval,
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }
}

/// Broadcast dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DispatcherConfig {
    /// Records drained per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum spacing between sends on one channel
    #[serde(default = "default_throttle_interval", with = "duration_millis")]
    #[schema(value_type = u64)]
    pub throttle_interval: Duration,

    /// Longest blocking wait on an empty queue
    #[serde(default = "default_poll_timeout", with = "duration_millis")]
    #[schema(value_type = u64)]
    pub poll_timeout: Duration,

    /// Queue depth above which enqueue logs a warning
    #[serde(default = "default_queue_warn_threshold")]
    pub queue_warn_threshold: usize,

    /// How long stop() waits for the drain loop
    #[serde(default = "default_shutdown_timeout", with = "duration_millis")]
    #[schema(value_type = u64)]
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            throttle_interval: default_throttle_interval(),
            poll_timeout: default_poll_timeout(),
            queue_warn_threshold: default_queue_warn_threshold(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_or("BBO_BATCH_SIZE", defaults.batch_size).max(1),
            throttle_interval: Duration::from_millis(env_or(
                "BBO_THROTTLE_MS",
                defaults.throttle_interval.as_millis() as u64,
            )),
            poll_timeout: defaults.poll_timeout,
            queue_warn_threshold: env_or("BBO_QUEUE_WARN", defaults.queue_warn_threshold),
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cache: CacheConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| default_bind_addr()),
            cache: CacheConfig::from_env(),
            dispatcher: DispatcherConfig::from_env(),
        }
    }
}

/// Parse an env var, falling back to `default` when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️  Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Fractional hours from an env var; `None` when unset or unusable
fn env_hours(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    let hours = parse_hours(&raw);
    if hours.is_none() {
        tracing::warn!("⚠️  Ignoring invalid {}={:?}", key, raw);
    }
    hours
}

/// Negative, non-finite and overflowing values are rejected
fn parse_hours(raw: &str) -> Option<Duration> {
    let hours = raw.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(hours * 3600.0).ok()
}

// Default value functions for serde
fn default_max_items() -> usize {
    crate::cache::store::DEFAULT_MAX_ITEMS_PER_SYMBOL
}

fn default_cache_dir() -> String {
    "cache_data".to_string()
}

fn default_cleanup_interval() -> Duration {
    6 * HOUR
}

fn default_retention() -> Duration {
    24 * HOUR
}

fn default_eviction_insert_step() -> u64 {
    10_000
}

fn default_persistence_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_persist_max_records() -> usize {
    10_000
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_batch_size() -> usize {
    5
}

fn default_throttle_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_poll_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_queue_warn_threshold() -> usize {
    50
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_items_per_symbol, 1_000_000);
        assert!(!config.persist_to_disk);
        assert_eq!(config.cleanup_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.retention, Duration::from_secs(24 * 3600));
        assert_eq!(config.eviction_insert_step, 10_000);
        assert_eq!(config.persist_max_records, 10_000);
    }

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.throttle_interval, Duration::from_millis(100));
        assert_eq!(config.poll_timeout, Duration::from_millis(500));
        assert_eq!(config.queue_warn_threshold, 50);
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_hours("1.5"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_hours(" 24 "), Some(Duration::from_secs(24 * 3600)));
        assert_eq!(parse_hours("0"), Some(Duration::ZERO));
        assert_eq!(parse_hours("1e300"), None);
        assert_eq!(parse_hours("-1"), None);
        assert_eq!(parse_hours("inf"), None);
        assert_eq!(parse_hours("NaN"), None);
        assert_eq!(parse_hours("six"), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"cache": {"persist_to_disk": true, "retention": 60}}"#).unwrap();
        assert!(config.cache.persist_to_disk);
        assert_eq!(config.cache.retention, Duration::from_secs(60));
        assert_eq!(config.cache.cache_dir, "cache_data");
        assert_eq!(config.dispatcher.batch_size, 5);
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
    }
}

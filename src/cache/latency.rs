use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::series::{TimeSeries, Timestamped};

/// One (timestamp, latency) observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    pub timestamp: i64,
    pub latency_ms: i64,
}

impl Timestamped for LatencySample {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Per-instrument latency history
///
/// Same capacity and eviction policy as the tick series, sized independently:
/// ticks without a plausible latency contribute nothing here.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    samples: TimeSeries<LatencySample>,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: TimeSeries::new(capacity),
        }
    }

    #[inline]
    pub fn record(&mut self, timestamp: i64, latency_ms: i64) {
        self.samples.insert(LatencySample {
            timestamp,
            latency_ms,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Latency values within the inclusive time window, oldest first
    pub fn window(&self, start: Option<i64>, end: Option<i64>) -> Vec<i64> {
        self.samples
            .iter_range(start, end)
            .map(|sample| sample.latency_ms)
            .collect()
    }

    pub fn evict_before(&mut self, cutoff: i64) -> usize {
        self.samples.evict_before(cutoff)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Summary statistics over a latency window, in milliseconds
///
/// Percentiles use linear interpolation between closest ranks:
/// rank = p/100 * (n - 1), blending the two neighbouring order statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LatencyStats {
    pub avg: f64,
    pub min: i64,
    pub max: i64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

impl LatencyStats {
    /// Compute stats from unsorted samples; empty input gives all zeros
    pub fn from_samples(mut samples: Vec<i64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        samples.sort_unstable();
        let count = samples.len();
        let sum: i128 = samples.iter().map(|&v| v as i128).sum();

        Self {
            avg: sum as f64 / count as f64,
            min: samples[0],
            max: samples[count - 1],
            p50: percentile(&samples, 50.0),
            p95: percentile(&samples, 95.0),
            p99: percentile(&samples, 99.0),
            count,
        }
    }
}

/// Linear-interpolated percentile of an ascending, non-empty slice
pub fn percentile(sorted: &[i64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let weight = rank - lo as f64;
    sorted[lo] as f64 + (sorted[hi] - sorted[lo]) as f64 * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_empty_window_is_zeroed() {
        assert_eq!(LatencyStats::from_samples(Vec::new()), LatencyStats::default());
    }

    #[test]
    fn test_known_distribution() {
        // 1..=100 in scrambled order
        let samples: Vec<i64> = (1..=100).map(|i| (i * 37) % 100 + 1).collect();
        let stats = LatencyStats::from_samples(samples);

        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1);
        assert_eq!(stats.max, 100);
        assert!((stats.avg - 50.5).abs() < 1e-9);
        assert!((stats.p50 - 50.5).abs() < 1e-9);
        assert!((stats.p95 - 95.05).abs() < 1e-9);
        assert!((stats.p99 - 99.01).abs() < 1e-9);
    }

    #[test]
    fn test_single_sample() {
        let stats = LatencyStats::from_samples(vec![42]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.p50, 42.0);
        assert_eq!(stats.p99, 42.0);
    }

    #[test]
    fn test_percentiles_are_ordered_for_random_samples() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let n = rng.random_range(1..500);
            let samples: Vec<i64> = (0..n).map(|_| rng.random_range(0..10_000)).collect();
            let stats = LatencyStats::from_samples(samples);

            assert_eq!(stats.count, n);
            assert!(stats.min as f64 <= stats.p50);
            assert!(stats.p50 <= stats.p95);
            assert!(stats.p95 <= stats.p99);
            assert!(stats.p99 <= stats.max as f64);
        }
    }

    #[test]
    fn test_tracker_window() {
        let mut tracker = LatencyTracker::new(3);
        tracker.record(100, 5);
        tracker.record(300, 7);
        tracker.record(200, 6);
        tracker.record(400, 8);

        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.window(None, None), vec![6, 7, 8]);
        assert_eq!(tracker.window(Some(250), Some(400)), vec![7, 8]);
        assert_eq!(tracker.evict_before(400), 2);
        assert_eq!(tracker.window(None, None), vec![8]);
    }
}

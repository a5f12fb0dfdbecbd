use std::collections::VecDeque;

/// Anything that can live in a [`TimeSeries`]
pub trait Timestamped {
    /// Millisecond ordering key
    fn timestamp(&self) -> i64;
}

/// Bounded, timestamp-ordered buffer for one instrument
///
/// Invariants:
/// - entries are non-decreasing by timestamp at all times
/// - `len() <= capacity`; when full, the entry with the smallest timestamp goes first
///
/// Ticks almost always arrive in time order, so the common insert is a
/// `push_back`. Late arrivals are placed by binary search and shifted in.
#[derive(Debug, Clone)]
pub struct TimeSeries<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Timestamped + Clone> TimeSeries<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest timestamp currently held
    pub fn last_timestamp(&self) -> Option<i64> {
        self.entries.back().map(Timestamped::timestamp)
    }

    /// Smallest timestamp currently held
    pub fn first_timestamp(&self) -> Option<i64> {
        self.entries.front().map(Timestamped::timestamp)
    }

    /// Insert preserving order, evicting the oldest entry when at capacity
    ///
    /// Equal timestamps keep arrival order (the new entry goes after them).
    /// Returns the evicted entry, if any.
    pub fn insert(&mut self, entry: T) -> Option<T> {
        let ts = entry.timestamp();

        match self.last_timestamp() {
            Some(last) if ts < last => {
                let idx = self.upper_bound(ts);
                self.entries.insert(idx, entry);
            }
            _ => self.entries.push_back(entry),
        }

        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Exact timestamp lookup, O(log n)
    pub fn contains_timestamp(&self, ts: i64) -> bool {
        let idx = self.lower_bound(ts);
        self.entries
            .get(idx)
            .is_some_and(|entry| entry.timestamp() == ts)
    }

    /// Index range `[lo, hi)` of entries with `start <= ts <= end`
    ///
    /// Either bound may be open. An inverted range yields an empty span.
    pub fn index_range(&self, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
        let lo = start.map_or(0, |s| self.lower_bound(s));
        let hi = end.map_or(self.entries.len(), |e| self.upper_bound(e));
        (lo, hi.max(lo))
    }

    /// Copy out the inclusive range, keeping only the most recent `limit`
    pub fn range(&self, start: Option<i64>, end: Option<i64>, limit: Option<usize>) -> Vec<T> {
        let (lo, hi) = self.index_range(start, end);
        let lo = match limit {
            Some(limit) => lo.max(hi.saturating_sub(limit)),
            None => lo,
        };
        self.entries.range(lo..hi).cloned().collect()
    }

    /// Iterate the inclusive range without copying
    pub fn iter_range(&self, start: Option<i64>, end: Option<i64>) -> impl Iterator<Item = &T> {
        let (lo, hi) = self.index_range(start, end);
        self.entries.range(lo..hi)
    }

    /// The most recent `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<T> {
        let lo = self.entries.len().saturating_sub(n);
        self.entries.range(lo..).cloned().collect()
    }

    /// Drop every entry with `ts < cutoff`, returning how many were removed
    pub fn evict_before(&mut self, cutoff: i64) -> usize {
        let idx = self.lower_bound(cutoff);
        self.entries.drain(..idx);
        idx
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// First index whose timestamp is `>= ts`
    fn lower_bound(&self, ts: i64) -> usize {
        self.entries.partition_point(|entry| entry.timestamp() < ts)
    }

    /// First index whose timestamp is `> ts`
    fn upper_bound(&self, ts: i64) -> usize {
        self.entries.partition_point(|entry| entry.timestamp() <= ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point(i64, &'static str);

    impl Timestamped for Point {
        fn timestamp(&self) -> i64 {
            self.0
        }
    }

    fn timestamps(series: &TimeSeries<Point>) -> Vec<i64> {
        series.range(None, None, None).iter().map(|p| p.0).collect()
    }

    #[test]
    fn test_out_of_order_insert_keeps_order() {
        let mut series = TimeSeries::new(10);
        for ts in [1000, 3000, 2000, 500, 3000, 2500] {
            series.insert(Point(ts, ""));
        }
        assert_eq!(timestamps(&series), vec![500, 1000, 2000, 2500, 3000, 3000]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut series = TimeSeries::new(10);
        series.insert(Point(10, "a"));
        series.insert(Point(20, "c"));
        series.insert(Point(10, "b"));
        let labels: Vec<_> = series.range(None, None, None).iter().map(|p| p.1).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_capacity_evicts_oldest_by_time() {
        let mut series = TimeSeries::new(3);
        series.insert(Point(20, ""));
        series.insert(Point(30, ""));
        series.insert(Point(40, ""));

        // A late arrival older than everything is itself the oldest
        let evicted = series.insert(Point(10, ""));
        assert_eq!(evicted, Some(Point(10, "")));
        assert_eq!(timestamps(&series), vec![20, 30, 40]);

        let evicted = series.insert(Point(50, ""));
        assert_eq!(evicted, Some(Point(20, "")));
        assert_eq!(timestamps(&series), vec![30, 40, 50]);
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let mut series = TimeSeries::new(100);
        for ts in (0..10).map(|i| i * 100) {
            series.insert(Point(ts, ""));
        }

        for i in 0..10 {
            for j in i..10 {
                let (start, end) = (i * 100, j * 100);
                let got: Vec<i64> = series
                    .range(Some(start), Some(end), None)
                    .iter()
                    .map(|p| p.0)
                    .collect();
                let expected: Vec<i64> = (i..=j).map(|k| k * 100).collect();
                assert_eq!(got, expected);
            }
        }

        assert!(series.range(Some(900), Some(100), None).is_empty());
        assert_eq!(series.range(Some(150), None, None).len(), 8);
        assert_eq!(series.range(None, Some(150), None).len(), 2);
    }

    #[test]
    fn test_limit_keeps_most_recent() {
        let mut series = TimeSeries::new(100);
        for ts in 1..=10 {
            series.insert(Point(ts, ""));
        }
        let got: Vec<i64> = series.range(Some(2), Some(8), Some(3)).iter().map(|p| p.0).collect();
        assert_eq!(got, vec![6, 7, 8]);

        let got: Vec<i64> = series.range(None, None, Some(2)).iter().map(|p| p.0).collect();
        assert_eq!(got, vec![9, 10]);
        assert_eq!(series.tail(4).len(), 4);
    }

    #[test]
    fn test_contains_and_evict() {
        let mut series = TimeSeries::new(100);
        for ts in [100, 200, 200, 300, 400] {
            series.insert(Point(ts, ""));
        }
        assert!(series.contains_timestamp(200));
        assert!(!series.contains_timestamp(250));

        assert_eq!(series.evict_before(300), 3);
        assert_eq!(timestamps(&series), vec![300, 400]);
        assert_eq!(series.evict_before(0), 0);
        assert_eq!(series.first_timestamp(), Some(300));
    }
}

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Per-channel send slot
#[derive(Debug)]
struct Slot<T> {
    last_sent: Option<Instant>,
    pending: Option<T>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            last_sent: None,
            pending: None,
        }
    }
}

/// Rate limiter that keeps at most one pending value per channel
///
/// A value offered while the channel's interval has not elapsed replaces
/// whatever was pending, so the value eventually sent is always the newest.
/// Uses `tokio::time::Instant` so paused-clock tests drive it.
#[derive(Debug)]
pub struct ThrottleSlots<T> {
    interval: Duration,
    slots: HashMap<String, Slot<T>>,
}

/// What `offer` decided
#[derive(Debug, PartialEq, Eq)]
pub enum Offer<T> {
    /// Interval elapsed: send this value now
    Send(T),
    /// Stored for later; `replaced` is true when an older pending value was dropped
    Deferred { replaced: bool },
}

impl<T> ThrottleSlots<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn offer(&mut self, channel: &str, value: T, now: Instant) -> Offer<T> {
        let interval = self.interval;
        let slot = self.slots.entry(channel.to_string()).or_default();

        let due = slot
            .last_sent
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);

        if due {
            slot.last_sent = Some(now);
            // A pending value is older than this one
            slot.pending = None;
            Offer::Send(value)
        } else {
            let replaced = slot.pending.replace(value).is_some();
            Offer::Deferred { replaced }
        }
    }

    /// Pending values whose interval has elapsed, marked as sent at `now`
    pub fn take_due(&mut self, now: Instant) -> Vec<(String, T)> {
        let interval = self.interval;
        let mut due = Vec::new();

        for (channel, slot) in self.slots.iter_mut() {
            let ready = slot
                .last_sent
                .map_or(true, |last| now.saturating_duration_since(last) >= interval);
            if !ready {
                continue;
            }
            if let Some(value) = slot.pending.take() {
                slot.last_sent = Some(now);
                due.push((channel.clone(), value));
            }
        }

        due
    }

    /// Time until the earliest pending value becomes due
    pub fn next_due_in(&self, now: Instant) -> Option<Duration> {
        self.slots
            .values()
            .filter(|slot| slot.pending.is_some())
            .map(|slot| match slot.last_sent {
                Some(last) => (last + self.interval).saturating_duration_since(now),
                None => Duration::ZERO,
            })
            .min()
    }

    /// Remove every pending value regardless of interval
    pub fn drain_pending(&mut self) -> Vec<(String, T)> {
        self.slots
            .iter_mut()
            .filter_map(|(channel, slot)| slot.pending.take().map(|v| (channel.clone(), v)))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.pending.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn test_first_offer_sends() {
        let mut slots = ThrottleSlots::new(INTERVAL);
        let now = Instant::now();
        assert_eq!(slots.offer("bbo:BTCUSDT", 1, now), Offer::Send(1));
        assert_eq!(slots.pending_count(), 0);
    }

    #[test]
    fn test_burst_keeps_newest_pending() {
        let mut slots = ThrottleSlots::new(INTERVAL);
        let t0 = Instant::now();

        assert_eq!(slots.offer("bbo:BTCUSDT", 1, t0), Offer::Send(1));
        assert_eq!(slots.offer("bbo:BTCUSDT", 2, t0), Offer::Deferred { replaced: false });
        assert_eq!(slots.offer("bbo:BTCUSDT", 3, t0), Offer::Deferred { replaced: true });

        assert!(slots.take_due(t0 + Duration::from_millis(50)).is_empty());
        assert_eq!(slots.next_due_in(t0 + Duration::from_millis(50)), Some(Duration::from_millis(50)));

        let due = slots.take_due(t0 + INTERVAL);
        assert_eq!(due, vec![("bbo:BTCUSDT".to_string(), 3)]);
        assert_eq!(slots.next_due_in(t0 + INTERVAL), None);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut slots = ThrottleSlots::new(INTERVAL);
        let t0 = Instant::now();

        assert_eq!(slots.offer("bbo:BTCUSDT", 1, t0), Offer::Send(1));
        assert_eq!(slots.offer("bbo:ETHUSDT", 2, t0), Offer::Send(2));
        assert_eq!(slots.offer("bbo:ETHUSDT", 3, t0), Offer::Deferred { replaced: false });
        assert_eq!(slots.pending_count(), 1);
    }

    #[test]
    fn test_direct_send_clears_stale_pending() {
        let mut slots = ThrottleSlots::new(INTERVAL);
        let t0 = Instant::now();

        slots.offer("bbo:BTCUSDT", 1, t0);
        slots.offer("bbo:BTCUSDT", 2, t0);
        assert_eq!(slots.offer("bbo:BTCUSDT", 3, t0 + INTERVAL), Offer::Send(3));
        assert!(slots.take_due(t0 + INTERVAL * 2).is_empty());
    }

    #[test]
    fn test_drain_pending() {
        let mut slots = ThrottleSlots::new(INTERVAL);
        let t0 = Instant::now();

        slots.offer("a", 1, t0);
        slots.offer("a", 2, t0);
        slots.offer("b", 3, t0);
        slots.offer("b", 4, t0);

        let mut drained = slots.drain_pending();
        drained.sort();
        assert_eq!(drained, vec![("a".to_string(), 2), ("b".to_string(), 4)]);
        assert_eq!(slots.pending_count(), 0);
    }
}

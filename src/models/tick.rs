use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Latencies at or above this many milliseconds are treated as unknown
pub const MAX_PLAUSIBLE_LATENCY_MS: i64 = 10_000;

/// Best bid/offer snapshot for one instrument
///
/// Immutable once admitted: the cache hands out clones, never references into
/// its own storage. Field names on the wire match what browsers and persisted
/// snapshot files have always used (`timestamp`, `bidPrice`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TickRecord {
    /// Upper-cased instrument identifier (e.g. BTCUSDT)
    pub symbol: String,

    /// Exchange-assigned event time in ms, the ordering and dedup key
    #[serde(rename = "timestamp")]
    pub event_time: i64,

    /// Local ingestion time in ms
    #[serde(rename = "receivedTimestamp")]
    pub received_time: i64,

    #[schema(value_type = String, example = "50000.10")]
    pub bid_price: Decimal,

    #[schema(value_type = String, example = "1.25000000")]
    pub bid_qty: Decimal,

    #[schema(value_type = String, example = "50000.20")]
    pub ask_price: Decimal,

    #[schema(value_type = String, example = "0.80000000")]
    pub ask_qty: Decimal,

    /// `received_time - event_time`, only when plausible
    #[serde(
        rename = "backendLatency",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub latency_ms: Option<i64>,
}

impl TickRecord {
    /// Build a record, deriving the latency from the two timestamps
    pub fn new(
        symbol: impl Into<String>,
        event_time: i64,
        received_time: i64,
        bid_price: Decimal,
        bid_qty: Decimal,
        ask_price: Decimal,
        ask_qty: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            event_time,
            received_time,
            bid_price,
            bid_qty,
            ask_price,
            ask_qty,
            latency_ms: latency_from(event_time, received_time),
        }
    }

    /// Calculate spread (ask - bid)
    pub fn spread(&self) -> Decimal {
        self.ask_price - self.bid_price
    }

    /// Calculate mid price ((ask + bid) / 2)
    pub fn mid_price(&self) -> Decimal {
        (self.ask_price + self.bid_price) / Decimal::TWO
    }
}

/// Latency between exchange event and local receipt, if it is believable
///
/// Clock skew (event after receipt), negative event times and stale
/// deliveries (>= 10s) all yield `None`, never zero or a negative number.
pub fn latency_from(event_time: i64, received_time: i64) -> Option<i64> {
    if event_time < 0 || event_time > received_time {
        return None;
    }
    let delta = received_time - event_time;
    is_plausible_latency(delta).then_some(delta)
}

/// Producer-supplied latency values go through the same bounds
pub fn is_plausible_latency(latency_ms: i64) -> bool {
    (0..MAX_PLAUSIBLE_LATENCY_MS).contains(&latency_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(event_time: i64, received_time: i64) -> TickRecord {
        TickRecord::new(
            "btcusdt",
            event_time,
            received_time,
            dec!(50000.10),
            dec!(1.5),
            dec!(50000.30),
            dec!(2.0),
        )
    }

    #[test]
    fn test_symbol_is_upper_cased() {
        assert_eq!(sample(1_000, 1_010).symbol, "BTCUSDT");
    }

    #[test]
    fn test_latency_rules() {
        assert_eq!(latency_from(1_000, 1_042), Some(42));
        assert_eq!(latency_from(1_000, 1_000), Some(0));
        assert_eq!(latency_from(2_000, 1_000), None);
        assert_eq!(latency_from(-5, 1_000), None);
        assert_eq!(latency_from(0, 10_000), None);
        assert_eq!(latency_from(0, 9_999), Some(9_999));
    }

    #[test]
    fn test_spread_and_mid() {
        let tick = sample(1_000, 1_010);
        assert_eq!(tick.spread(), dec!(0.20));
        assert_eq!(tick.mid_price(), dec!(50000.20));
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample(1_000, 1_010)).unwrap();
        assert_eq!(json["timestamp"], 1_000);
        assert_eq!(json["receivedTimestamp"], 1_010);
        assert_eq!(json["bidPrice"], "50000.10");
        assert_eq!(json["backendLatency"], 10);

        let stale = serde_json::to_value(sample(1_000, 20_000)).unwrap();
        assert!(stale.get("backendLatency").is_none());
    }
}

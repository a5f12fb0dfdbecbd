//! Payload normalization
//!
//! Producers disagree on naming: the exchange sends single-letter keys
//! (`s`, `b`, `B`, `a`, `A`, `E`), some internal stages emit camelCase
//! (`bidPrice`), others snake_case (`bid_price`), and any of them may arrive
//! wrapped in a `{stream, data}` envelope. Everything is resolved here, once,
//! into a [`TickRecord`]; nothing downstream looks at raw keys again.
//!
//! Key priority within each field is camelCase, then snake_case, then the
//! native exchange key.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::tick::{is_plausible_latency, latency_from, TickRecord};
use crate::utils::validation::is_valid_symbol;

const SYMBOL_KEYS: &[&str] = &["symbol", "s"];
const BID_PRICE_KEYS: &[&str] = &["bidPrice", "bid_price", "b"];
const BID_QTY_KEYS: &[&str] = &["bidQty", "bid_qty", "B"];
const ASK_PRICE_KEYS: &[&str] = &["askPrice", "ask_price", "a"];
const ASK_QTY_KEYS: &[&str] = &["askQty", "ask_qty", "A"];
const EVENT_TIME_KEYS: &[&str] = &["timestamp", "exchangeTime", "exchange_time", "E", "T"];
const RECEIVED_TIME_KEYS: &[&str] = &["receivedTimestamp", "received_timestamp"];
const LATENCY_KEYS: &[&str] = &["backendLatency", "latency"];

/// Why a payload was not turned into a tick
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The text was not valid JSON
    #[error("unparseable payload: {0}")]
    Malformed(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing symbol")]
    MissingSymbol,

    /// Symbols become file names and channel names, so they are restricted
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// A required price/quantity field is absent under every accepted spelling
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid numeric value for field: {0}")]
    InvalidNumber(&'static str),
}

/// Parse raw text from the transport and normalize it
pub fn normalize_str(text: &str, now_ms: i64) -> Result<TickRecord, Rejection> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Rejection::Malformed(e.to_string()))?;
    normalize(&value, now_ms)
}

/// Normalize one already-parsed payload into a canonical tick
///
/// `now_ms` is the local wall clock; it backs the received time and is the
/// last resort for the event time when the payload carries no timestamp.
pub fn normalize(payload: &Value, now_ms: i64) -> Result<TickRecord, Rejection> {
    let outer = payload.as_object().ok_or(Rejection::NotAnObject)?;

    let (fields, stream_symbol) = match outer.get("data") {
        Some(Value::Object(inner)) => (
            inner,
            outer
                .get("stream")
                .and_then(Value::as_str)
                .and_then(symbol_from_stream),
        ),
        _ => (outer, None),
    };

    let symbol = first_present(fields, SYMBOL_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .or(stream_symbol)
        .ok_or(Rejection::MissingSymbol)?;
    if !is_valid_symbol(&symbol) {
        return Err(Rejection::InvalidSymbol(symbol));
    }

    let bid_price = required_decimal(fields, "bidPrice", BID_PRICE_KEYS)?;
    let bid_qty = required_decimal(fields, "bidQty", BID_QTY_KEYS)?;
    let ask_price = required_decimal(fields, "askPrice", ASK_PRICE_KEYS)?;
    let ask_qty = required_decimal(fields, "askQty", ASK_QTY_KEYS)?;

    let received = optional_int(fields, "receivedTimestamp", RECEIVED_TIME_KEYS)?;
    let received_time = received.unwrap_or(now_ms);
    let event_time = optional_int(fields, "timestamp", EVENT_TIME_KEYS)?
        .or(received)
        .unwrap_or(now_ms);

    // A latency the producer already measured wins when it is plausible
    let latency_ms = optional_int(fields, "backendLatency", LATENCY_KEYS)
        .ok()
        .flatten()
        .filter(|l| is_plausible_latency(*l))
        .or_else(|| latency_from(event_time, received_time));

    Ok(TickRecord {
        symbol,
        event_time,
        received_time,
        bid_price,
        bid_qty,
        ask_price,
        ask_qty,
        latency_ms,
    })
}

/// `btcusdt@bookTicker` -> `BTCUSDT`
fn symbol_from_stream(stream: &str) -> Option<String> {
    stream
        .split('@')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !value.is_null())
}

fn required_decimal(
    fields: &Map<String, Value>,
    name: &'static str,
    keys: &[&str],
) -> Result<Decimal, Rejection> {
    let value = first_present(fields, keys).ok_or(Rejection::MissingField(name))?;
    to_decimal(value).ok_or(Rejection::InvalidNumber(name))
}

fn optional_int(
    fields: &Map<String, Value>,
    name: &'static str,
    keys: &[&str],
) -> Result<Option<i64>, Rejection> {
    match first_present(fields, keys) {
        None => Ok(None),
        Some(value) => to_millis(value).map(Some).ok_or(Rejection::InvalidNumber(name)),
    }
}

fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        // Go through the literal text so 0.1 stays 0.1 instead of its binary approximation
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        _ => None,
    }
}

/// Millisecond timestamps arrive as integers, floats (wall clocks with
/// sub-ms precision) or numeric strings
fn to_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

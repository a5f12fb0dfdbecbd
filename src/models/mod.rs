pub mod tick;

pub use tick::{is_plausible_latency, latency_from, TickRecord, MAX_PLAUSIBLE_LATENCY_MS};

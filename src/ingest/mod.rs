//! Ingestion: turning producer payloads into canonical ticks

pub mod normalize;

pub use normalize::{normalize, normalize_str, Rejection};

// Library Crate Root
// lib.rs

// Tick ingestion, caching and throttled fan-out for best bid/offer data.
// main.rs wires these modules into an HTTP + WebSocket service.
pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod models;
pub mod utils;
pub mod websocket;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use cache::{AdmitOutcome, CacheManager, TickCache};
pub use config::{AppConfig, CacheConfig, DispatcherConfig};
pub use dispatch::{BboBroadcast, BroadcastDispatcher, FanoutSink};
pub use error::ApiError;
pub use models::TickRecord;
pub use websocket::Broadcaster;

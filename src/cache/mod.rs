pub mod latency;
pub mod manager;
pub mod persistence;
pub mod series;
pub mod store;

pub use latency::{LatencyStats, LatencyTracker};
pub use manager::{AdmitOutcome, CacheManager, MaintenanceError, ManagerStats};
pub use persistence::{PersistenceError, SnapshotStore};
pub use series::{TimeSeries, Timestamped};
pub use store::{CacheStats, InsertOutcome, TickCache};

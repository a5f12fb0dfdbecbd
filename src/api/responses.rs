use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::cache::{CacheStats, LatencyStats, ManagerStats};
use crate::dispatch::BboBroadcast;
use crate::models::TickRecord;

/// Successful response wrapper: `{"status": "success", "data": ...}`
#[derive(Debug, Serialize, ToSchema)]
#[aliases(
    SymbolsResponse = Envelope<SymbolsData>,
    UpdatesResponse = Envelope<UpdatesData>,
    LatencyResponse = Envelope<LatencyData>,
    StatsResponse = Envelope<StatsData>,
    LatestResponse = Envelope<LatestData>,
    IngestResponse = Envelope<IngestData>
)]
pub struct Envelope<T> {
    pub status: String,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}

/// Time-window query for history endpoints
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Trading pair, e.g. BTCUSDT (required)
    pub symbol: Option<String>,
    /// Inclusive start, ms since epoch (default: one hour ago)
    pub start_time: Option<i64>,
    /// Inclusive end, ms since epoch (default: open-ended)
    pub end_time: Option<i64>,
    /// Maximum updates returned, most recent kept (default: 10,000,000)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SymbolsData {
    pub symbols: Vec<String>,
    pub count: usize,
}

/// One cached update plus a human-readable event time
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateView {
    #[serde(flatten)]
    pub record: TickRecord,
    /// `YYYYMMDD HH:MM:SS.mmm` (UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_formatted: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdatesData {
    pub symbol: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub count: usize,
    pub updates: Vec<UpdateView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LatencyData {
    pub symbol: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub stats: LatencyStats,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsData {
    #[serde(flatten)]
    pub cache: CacheStats,
    pub manager: ManagerStats,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LatestData {
    pub count: usize,
    pub updates: Vec<BboBroadcast>,
}

/// Admission result for `POST /api/ingest`
#[derive(Debug, Serialize, ToSchema)]
pub struct IngestData {
    /// "admitted" or "duplicate"
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<TickRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub symbols: usize,
    pub manager_running: bool,
    pub dispatcher_running: bool,
}

use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::cache::{CacheStats, LatencyStats, ManagerStats};
use crate::dispatch::{BboBroadcast, DispatcherStats};
use crate::error::ErrorResponse;
use crate::models::TickRecord;

/// OpenAPI specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "BBO Cache API",
        version = "1.0.0",
        description = "Best bid/offer tick cache with history queries, latency statistics and throttled live fan-out",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::health_check,
        handlers::get_symbols,
        handlers::get_updates,
        handlers::get_latency_stats,
        handlers::get_cache_stats,
        handlers::get_latest_all,
        handlers::get_latest,
        handlers::ingest_update,
        handlers::get_dispatcher_stats,
    ),
    components(
        schemas(
            TickRecord,
            BboBroadcast,
            LatencyStats,
            CacheStats,
            ManagerStats,
            DispatcherStats,
            SymbolsData,
            UpdateView,
            UpdatesData,
            LatencyData,
            StatsData,
            LatestData,
            IngestData,
            HealthResponse,
            SymbolsResponse,
            UpdatesResponse,
            LatencyResponse,
            StatsResponse,
            LatestResponse,
            IngestResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "History", description = "Cached BBO history and latency statistics"),
        (name = "Latest", description = "Last dispatched value per symbol"),
        (name = "Ingest", description = "Manual update admission"),
        (name = "Metrics", description = "Dispatcher metrics"),
    )
)]
pub struct ApiDoc;

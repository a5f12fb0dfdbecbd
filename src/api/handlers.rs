use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::cache::{AdmitOutcome, CacheManager};
use crate::dispatch::{BroadcastDispatcher, DispatcherStats};
use crate::error::ApiError;
use crate::utils::time::{format_millis, now_ms};
use crate::utils::validation::is_valid_symbol;

use super::responses::*;

/// Default look-back window for history endpoints
const DEFAULT_WINDOW_MS: i64 = 3_600_000;
/// Effectively unlimited
const DEFAULT_UPDATE_LIMIT: usize = 10_000_000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CacheManager>,
    pub dispatcher: Arc<BroadcastDispatcher>,
}

fn require_symbol(symbol: Option<&str>) -> Result<String, ApiError> {
    let symbol = symbol.map(str::trim).filter(|s| !s.is_empty()).ok_or(ApiError::MissingSymbol)?;
    let symbol = symbol.to_uppercase();
    if !is_valid_symbol(&symbol) {
        return Err(ApiError::InvalidSymbol(symbol));
    }
    Ok(symbol)
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        symbols: state.manager.cache().symbols().len(),
        manager_running: state.manager.is_running(),
        dispatcher_running: state.dispatcher.is_running(),
    })
}

/// List cached symbols
#[utoipa::path(
    get,
    path = "/api/history/symbols",
    tag = "History",
    responses(
        (status = 200, description = "Known symbols, sorted", body = SymbolsResponse)
    )
)]
pub async fn get_symbols(State(state): State<AppState>) -> Json<Envelope<SymbolsData>> {
    let symbols = state.manager.cache().symbols();
    tracing::debug!("Retrieved {} symbols", symbols.len());

    Json(Envelope::success(SymbolsData {
        count: symbols.len(),
        symbols,
    }))
}

/// Cached updates for a symbol and time window
#[utoipa::path(
    get,
    path = "/api/history/updates",
    tag = "History",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Updates ordered by event time", body = UpdatesResponse),
        (status = 400, description = "Missing or invalid symbol", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_updates(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Envelope<UpdatesData>>, ApiError> {
    let symbol = require_symbol(query.symbol.as_deref())?;
    let start_time = query.start_time.unwrap_or_else(|| now_ms() - DEFAULT_WINDOW_MS);
    let limit = query.limit.unwrap_or(DEFAULT_UPDATE_LIMIT);

    let records = state
        .manager
        .cache()
        .query(&symbol, Some(start_time), query.end_time, Some(limit));

    tracing::debug!(
        "Retrieved {} updates for {} (start={}, end={:?}, limit={})",
        records.len(),
        symbol,
        start_time,
        query.end_time,
        limit
    );

    let updates: Vec<UpdateView> = records
        .into_iter()
        .map(|record| UpdateView {
            timestamp_formatted: format_millis(record.event_time),
            record,
        })
        .collect();

    Ok(Json(Envelope::success(UpdatesData {
        symbol,
        start_time,
        end_time: query.end_time,
        count: updates.len(),
        updates,
    })))
}

/// Latency statistics for a symbol and time window
#[utoipa::path(
    get,
    path = "/api/history/latency",
    tag = "History",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Latency statistics (all zero when no samples)", body = LatencyResponse),
        (status = 400, description = "Missing or invalid symbol", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_latency_stats(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Envelope<LatencyData>>, ApiError> {
    let symbol = require_symbol(query.symbol.as_deref())?;
    let start_time = query.start_time.unwrap_or_else(|| now_ms() - DEFAULT_WINDOW_MS);

    let stats = state
        .manager
        .cache()
        .latency_stats(&symbol, Some(start_time), query.end_time);

    Ok(Json(Envelope::success(LatencyData {
        symbol,
        start_time,
        end_time: query.end_time,
        stats,
    })))
}

/// Cache and manager statistics
#[utoipa::path(
    get,
    path = "/api/history/stats",
    tag = "History",
    responses(
        (status = 200, description = "Cache statistics", body = StatsResponse)
    )
)]
pub async fn get_cache_stats(State(state): State<AppState>) -> Json<Envelope<StatsData>> {
    Json(Envelope::success(StatsData {
        cache: state.manager.cache().cache_stats(),
        manager: state.manager.stats(),
    }))
}

/// Latest processed value of every symbol
#[utoipa::path(
    get,
    path = "/api/latest",
    tag = "Latest",
    responses(
        (status = 200, description = "Latest value per symbol", body = LatestResponse)
    )
)]
pub async fn get_latest_all(State(state): State<AppState>) -> Json<Envelope<LatestData>> {
    let updates = state.dispatcher.latest_all();
    Json(Envelope::success(LatestData {
        count: updates.len(),
        updates,
    }))
}

/// Latest processed value of one symbol
#[utoipa::path(
    get,
    path = "/api/latest/{symbol}",
    tag = "Latest",
    params(
        ("symbol" = String, Path, description = "Trading pair, e.g. BTCUSDT")
    ),
    responses(
        (status = 200, description = "Latest value", body = LatestResponse),
        (status = 404, description = "Nothing dispatched for this symbol yet", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_latest(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Envelope<LatestData>>, ApiError> {
    let symbol = require_symbol(Some(&symbol))?;
    let latest = state
        .dispatcher
        .latest_for_symbol(&symbol)
        .ok_or(ApiError::NotFound(symbol))?;

    Ok(Json(Envelope::success(LatestData {
        count: 1,
        updates: vec![latest],
    })))
}

/// Admit one raw update (exchange-native, enveloped or internal shape)
#[utoipa::path(
    post,
    path = "/api/ingest",
    tag = "Ingest",
    request_body(content = Object, description = "Raw BBO update"),
    responses(
        (status = 200, description = "Admitted or recognized as duplicate", body = IngestResponse),
        (status = 422, description = "Update rejected", body = crate::error::ErrorResponse)
    )
)]
pub async fn ingest_update(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Envelope<IngestData>>, ApiError> {
    let data = match state.manager.admit(&payload) {
        AdmitOutcome::Admitted(record) => IngestData {
            outcome: "admitted".to_string(),
            record: Some(record),
        },
        AdmitOutcome::Duplicate => IngestData {
            outcome: "duplicate".to_string(),
            record: None,
        },
        AdmitOutcome::Rejected(rejection) => return Err(rejection.into()),
    };

    Ok(Json(Envelope::success(data)))
}

/// Dispatcher queue, throttle and lag statistics
#[utoipa::path(
    get,
    path = "/api/v1/dispatcher/stats",
    tag = "Metrics",
    responses(
        (status = 200, description = "Dispatcher statistics", body = DispatcherStats)
    )
)]
pub async fn get_dispatcher_stats(State(state): State<AppState>) -> Json<DispatcherStats> {
    Json(state.dispatcher.stats())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_symbol() {
        assert_eq!(require_symbol(Some(" btcusdt ")).unwrap(), "BTCUSDT");
        assert!(matches!(require_symbol(None), Err(ApiError::MissingSymbol)));
        assert!(matches!(require_symbol(Some("")), Err(ApiError::MissingSymbol)));
        assert!(matches!(require_symbol(Some("a/b")), Err(ApiError::InvalidSymbol(_))));
    }
}

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::websocket::{websocket_handler, Broadcaster, WsState};

use super::handlers::*;
use super::openapi::ApiDoc;

/// Create the API router with Swagger UI and WebSocket support
pub fn create_router(state: AppState, broadcaster: Broadcaster) -> Router {
    let ws_state = Arc::new(WsState {
        broadcaster,
        dispatcher: Arc::clone(&state.dispatcher),
    });

    let ws_router = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(ws_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        // History endpoints
        .route("/api/history/symbols", get(get_symbols))
        .route("/api/history/updates", get(get_updates))
        .route("/api/history/latency", get(get_latency_stats))
        .route("/api/history/stats", get(get_cache_stats))
        // Latest values
        .route("/api/latest", get(get_latest_all))
        .route("/api/latest/:symbol", get(get_latest))
        .route("/api/ingest", post(ingest_update))
        .route("/api/v1/dispatcher/stats", get(get_dispatcher_stats))
        .with_state(state)
        .merge(ws_router)
}

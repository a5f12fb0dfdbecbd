use bbo_cache_api::{
    create_router, AppConfig, AppState, Broadcaster, BroadcastDispatcher, CacheManager,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bbo_cache_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    tracing::info!("⚙️  Configuration: {:?}", config);

    // WebSocket fan-out, fed by the throttled dispatcher
    let broadcaster = Broadcaster::new();
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        config.dispatcher.clone(),
        Arc::new(broadcaster.clone()),
    ));
    dispatcher.start();

    // Cache lifecycle: replay persisted snapshots, then run maintenance
    let manager = Arc::new(CacheManager::new(config.cache.clone()).with_dispatcher(Arc::clone(&dispatcher)));
    manager.start().await;

    let state = AppState {
        manager: Arc::clone(&manager),
        dispatcher: Arc::clone(&dispatcher),
    };
    let app = create_router(state, broadcaster);

    let addr = config.bind_addr.as_str();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("🚀 BBO Cache API server running on http://{}", addr);
    tracing::info!("📊 Health check: http://{}/health", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws", addr);
    tracing::info!("");
    tracing::info!("📡 WebSocket Subscription Examples:");
    tracing::info!("   Subscribe to BTCUSDT best bid/offer:");
    tracing::info!(r#"   {{"action":"subscribe","channel":"bbo","symbol":"BTCUSDT"}}"#);
    tracing::info!("   Subscribe to every symbol:");
    tracing::info!(r#"   {{"action":"subscribe","channel":"bbo"}}"#);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Dispatcher first so nothing new is queued, then the final cache flush
    dispatcher.stop().await;
    manager.stop().await;

    tracing::info!("👋 Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("🛑 Shutdown signal received"),
        Err(e) => {
            tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketplace_chat_backend::{
    build_app,
    config::{Config, StoreBackend},
    services::hooks::{HookDispatcher, TracingHook},
    storage::{redis::RedisClient, ChatStore, MemoryChatStore, PgChatStore},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketplace_chat_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    tracing::info!("Starting server in {} mode", config.server.environment);

    let store: Arc<dyn ChatStore> = match config.store {
        StoreBackend::Postgres => {
            let db = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(&config.database_url())
                .await?;
            tracing::info!("Connected to PostgreSQL");

            sqlx::migrate!("./migrations").run(&db).await?;
            tracing::info!("Database migrations completed");

            Arc::new(PgChatStore::new(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, state is lost on restart");
            Arc::new(MemoryChatStore::new())
        }
    };

    let redis = if config.redis.enabled {
        let redis = RedisClient::new(&config.redis_url()).await?;
        tracing::info!("Connected to Redis");
        Some(redis)
    } else {
        tracing::info!("Redis disabled, room fan-out is local to this instance");
        None
    };

    let hooks = HookDispatcher::new().with_hook(Arc::new(TracingHook));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(store, redis, config, hooks);

    // Spawn hub relay
    let hub = state.ws_hub.clone();
    tokio::spawn(async move {
        hub.run().await;
    });

    let app = build_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

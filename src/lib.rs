use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

use api::hub::WsHub;
use config::Config;
use services::{auth::TokenVerifier, hooks::HookDispatcher, messaging::MessagingService};
use storage::{redis::RedisClient, ChatStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub redis: Option<RedisClient>,
    pub config: Arc<Config>,
    pub tokens: TokenVerifier,
    pub hooks: HookDispatcher,
    pub ws_hub: Arc<WsHub>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ChatStore>,
        redis: Option<RedisClient>,
        config: Config,
        hooks: HookDispatcher,
    ) -> Self {
        let tokens = TokenVerifier::new(&config.jwt);
        let ws_hub = Arc::new(WsHub::new(redis.clone()));
        Self {
            store,
            redis,
            config: Arc::new(config),
            tokens,
            hooks,
            ws_hub,
        }
    }

    pub fn messaging(&self) -> MessagingService {
        MessagingService::new(
            self.store.clone(),
            self.hooks.clone(),
            self.config.messaging.clone(),
        )
    }
}

/// The full HTTP and WebSocket surface.
pub fn build_app(state: AppState) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api::router::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

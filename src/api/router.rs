use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::{handlers, middleware::auth_middleware, websocket::handle_websocket};
use crate::AppState;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Conversation routes (protected)
    let conversation_routes = Router::new()
        .route(
            "/",
            get(handlers::conversations::get_conversations)
                .post(handlers::conversations::open_conversation),
        )
        .route(
            "/:id",
            get(handlers::conversations::get_conversation)
                .delete(handlers::conversations::delete_conversation),
        )
        .route(
            "/:id/messages",
            get(handlers::messages::get_messages).post(handlers::messages::send_message),
        )
        .route("/:id/read", post(handlers::messages::mark_read))
        .route("/:id/typing", post(handlers::messages::send_typing))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // WebSocket route (protected)
    let ws_route = Router::new()
        .route("/ws", get(handle_websocket))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/conversations", conversation_routes)
        .merge(ws_route)
        .with_state(state)
}

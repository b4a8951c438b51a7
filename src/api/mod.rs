pub mod handlers;
pub mod hub;
pub mod middleware;
pub mod router;
pub mod websocket;

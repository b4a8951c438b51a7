pub mod auth;
pub mod hooks;
pub mod messaging;
pub mod reconciler;

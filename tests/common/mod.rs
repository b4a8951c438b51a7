#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use marketplace_chat_backend::{
    config::{Config, StoreBackend},
    models::Participant,
    services::hooks::HookDispatcher,
    storage::MemoryChatStore,
    AppState,
};
use uuid::Uuid;

pub fn app_state() -> AppState {
    let mut config = Config::load();
    config.store = StoreBackend::Memory;
    config.redis.enabled = false;
    config.jwt.secret = "integration-test-secret".to_string();
    AppState::new(
        Arc::new(MemoryChatStore::new()),
        None,
        config,
        HookDispatcher::new(),
    )
}

pub fn token(state: &AppState, participant: Participant) -> String {
    state
        .tokens
        .issue(participant, Duration::from_secs(3600))
        .expect("token")
}

pub fn customer() -> Participant {
    Participant::Customer(Uuid::new_v4())
}

pub fn business() -> Participant {
    Participant::Business(Uuid::new_v4())
}

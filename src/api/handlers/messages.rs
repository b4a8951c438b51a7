use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Message,
    services::{auth::Claims, reconciler::ReadAdvance},
    AppState,
};

use super::super::middleware::get_participant;

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
    pub before_seq: Option<i64>,
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let participant = get_participant(&claims)?;

    let messages = state
        .messaging()
        .get_messages(conversation_id, participant, query.before_seq, query.limit)
        .await?;

    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

/// Sends over HTTP for clients without a live socket. The counterpart is
/// implied by the conversation.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<Message>> {
    let sender = get_participant(&claims)?;
    let messaging = state.messaging();

    let conversation = messaging.get_conversation(conversation_id, sender).await?;
    let receiver = conversation
        .counterpart(sender)
        .ok_or(AppError::NotParticipant)?;

    let message = messaging
        .send_message(conversation_id, sender, receiver, req.body)
        .await?;
    state.ws_hub.deliver_message(&message, None).await;

    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub through_seq: i64,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<Json<ReadAdvance>> {
    let reader = get_participant(&claims)?;

    let advance = state
        .messaging()
        .mark_read(conversation_id, reader, req.through_seq)
        .await?;
    state
        .ws_hub
        .publish_read_receipt(conversation_id, reader, advance.read_through_seq)
        .await;

    Ok(Json(advance))
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub is_typing: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn send_typing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<TypingRequest>,
) -> AppResult<Json<MessageResponse>> {
    let participant = get_participant(&claims)?;

    state
        .messaging()
        .get_conversation(conversation_id, participant)
        .await?;
    state
        .ws_hub
        .publish_typing(conversation_id, participant, req.is_typing, None)
        .await;

    Ok(Json(MessageResponse {
        message: "ok".to_string(),
    }))
}

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ConversationSummary, Participant, SoftDeleteOutcome},
    services::auth::Claims,
    AppState,
};

use super::super::middleware::get_participant;

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
}

pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PaginationQuery>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let participant = get_participant(&claims)?;

    let conversations = state
        .messaging()
        .list_conversations(participant, query.limit, query.offset)
        .await?;

    Ok(Json(conversations))
}

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    pub participant: Participant,
}

pub async fn open_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenConversationRequest>,
) -> AppResult<Json<ConversationSummary>> {
    let requester = get_participant(&claims)?;

    let conversation = state
        .messaging()
        .open_conversation(requester, req.participant)
        .await?;
    let summary = conversation
        .summary_for(requester)
        .ok_or(AppError::NotParticipant)?;

    Ok(Json(summary))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ConversationSummary>> {
    let participant = get_participant(&claims)?;

    let summary = state
        .messaging()
        .get_summary(conversation_id, participant)
        .await?;

    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub outcome: SoftDeleteOutcome,
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<DeleteResponse>> {
    let participant = get_participant(&claims)?;

    let outcome = state
        .messaging()
        .delete_conversation(conversation_id, participant)
        .await?;
    tracing::info!(%conversation_id, %participant, ?outcome, "Conversation deleted");

    Ok(Json(DeleteResponse { outcome }))
}

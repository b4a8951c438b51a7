pub mod memory;
pub mod postgres;
pub mod redis;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Conversation, Message, NewMessage, Participant, ParticipantPair, SoftDeleteOutcome},
    services::reconciler::ReadAdvance,
};

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

/// Durable conversation and message state.
///
/// All writes to a conversation's sequence counter and read pointers go through
/// this trait, and every implementation serializes them per conversation.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Returns the conversation for `pair`, creating it if absent. Exactly one
    /// record exists per pair even under concurrent calls. The flag is `true`
    /// when this call created the record. `requester` gets the conversation
    /// un-hidden if they had soft-deleted it.
    async fn create_or_get(
        &self,
        pair: ParticipantPair,
        requester: Participant,
    ) -> AppResult<(Conversation, bool)>;

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation>;

    /// Visible conversations of `participant`, most recent activity first.
    async fn list_for_participant(
        &self,
        participant: Participant,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Conversation>>;

    async fn soft_delete(
        &self,
        conversation_id: Uuid,
        participant: Participant,
    ) -> AppResult<SoftDeleteOutcome>;

    /// Appends a message, assigning the next sequence number and updating the
    /// conversation's last message in the same step.
    async fn append_message(&self, message: NewMessage) -> AppResult<Message>;

    /// Messages with `seq < before_seq` (or the latest when `None`), oldest first.
    async fn page_messages(
        &self,
        conversation_id: Uuid,
        before_seq: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<Message>>;

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        participant: Participant,
        through_seq: i64,
    ) -> AppResult<ReadAdvance>;
}

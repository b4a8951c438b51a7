use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    config::MessagingConfig,
    error::{AppError, AppResult, ErrorKind},
    models::{
        Conversation, ConversationSummary, Message, NewMessage, Participant, ParticipantPair,
        SoftDeleteOutcome,
    },
    services::{hooks::HookDispatcher, reconciler::ReadAdvance},
    storage::ChatStore,
};

const CREATE_RETRIES: usize = 3;

pub struct MessagingService {
    store: Arc<dyn ChatStore>,
    hooks: HookDispatcher,
    config: MessagingConfig,
}

impl MessagingService {
    pub fn new(store: Arc<dyn ChatStore>, hooks: HookDispatcher, config: MessagingConfig) -> Self {
        Self {
            store,
            hooks,
            config,
        }
    }

    /// Runs a store call under the configured deadline.
    async fn bounded<T>(&self, call: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Transient("store timed out".to_string())),
        }
    }

    /// Create or get the conversation between `requester` and `other`.
    pub async fn open_conversation(
        &self,
        requester: Participant,
        other: Participant,
    ) -> AppResult<Conversation> {
        let pair = ParticipantPair::new(requester, other)?;

        let mut attempt = 0;
        let (conversation, created) = loop {
            attempt += 1;
            match self.bounded(self.store.create_or_get(pair, requester)).await {
                // A racing insert lost; the winner's row is there on refetch.
                Err(e) if e.kind() == ErrorKind::Conflict && attempt < CREATE_RETRIES => {
                    tracing::debug!(%requester, %other, attempt, "Create-or-get conflict, retrying");
                }
                result => break result?,
            }
        };

        if created {
            self.hooks.conversation_created(&conversation);
        }
        Ok(conversation)
    }

    /// Get a conversation the participant belongs to.
    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        participant: Participant,
    ) -> AppResult<Conversation> {
        let conversation = self.bounded(self.store.get_conversation(conversation_id)).await?;
        if !conversation.includes(participant) {
            return Err(AppError::NotParticipant);
        }
        Ok(conversation)
    }

    pub async fn get_summary(
        &self,
        conversation_id: Uuid,
        participant: Participant,
    ) -> AppResult<ConversationSummary> {
        let conversation = self.get_conversation(conversation_id, participant).await?;
        conversation
            .summary_for(participant)
            .ok_or(AppError::NotParticipant)
    }

    /// Get a participant's conversations with their unread counts
    pub async fn list_conversations(
        &self,
        participant: Participant,
        limit: Option<i64>,
        offset: i64,
    ) -> AppResult<Vec<ConversationSummary>> {
        let limit = self.page_size(limit);
        let conversations = self
            .bounded(self.store.list_for_participant(participant, limit, offset.max(0)))
            .await?;

        Ok(conversations
            .iter()
            .filter_map(|c| c.summary_for(participant))
            .collect())
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: Uuid,
        participant: Participant,
    ) -> AppResult<SoftDeleteOutcome> {
        self.bounded(self.store.soft_delete(conversation_id, participant))
            .await
    }

    /// Send a message
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender: Participant,
        receiver: Participant,
        body: String,
    ) -> AppResult<Message> {
        self.validate_body(&body)?;

        let conversation = self.get_conversation(conversation_id, sender).await?;
        if conversation.counterpart(sender) != Some(receiver) {
            return Err(AppError::NotParticipant);
        }

        let message = self
            .bounded(self.store.append_message(NewMessage {
                conversation_id,
                sender,
                receiver,
                body,
            }))
            .await?;

        tracing::debug!(
            message_id = %message.id,
            %conversation_id,
            seq = message.seq,
            "Message appended"
        );
        self.hooks.message_delivered(&message);

        Ok(message)
    }

    /// Get messages for a conversation, oldest first, paging backwards by sequence.
    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        participant: Participant,
        before_seq: Option<i64>,
        limit: Option<i64>,
    ) -> AppResult<Vec<Message>> {
        self.get_conversation(conversation_id, participant).await?;

        let limit = self.page_size(limit);
        self.bounded(self.store.page_messages(conversation_id, before_seq, limit))
            .await
    }

    /// Advance the participant's read pointer.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        participant: Participant,
        through_seq: i64,
    ) -> AppResult<ReadAdvance> {
        self.bounded(self.store.mark_read(conversation_id, participant, through_seq))
            .await
    }

    fn page_size(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size)
    }

    fn validate_body(&self, body: &str) -> AppResult<()> {
        if body.trim().is_empty() {
            return Err(AppError::InvalidArgument("message body is empty".to_string()));
        }
        let length = body.chars().count();
        if length > self.config.max_body_chars {
            return Err(AppError::InvalidArgument(format!(
                "message body has {} characters, the limit is {}",
                length, self.config.max_body_chars
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryChatStore;

    fn service() -> MessagingService {
        MessagingService::new(
            Arc::new(MemoryChatStore::new()),
            HookDispatcher::new(),
            MessagingConfig::default(),
        )
    }

    fn parties() -> (Participant, Participant) {
        (
            Participant::Customer(Uuid::new_v4()),
            Participant::Business(Uuid::new_v4()),
        )
    }

    #[tokio::test]
    async fn offline_receiver_sees_unread_on_next_fetch() {
        let service = service();
        let (c1, b1) = parties();
        let conversation = service.open_conversation(b1, c1).await.unwrap();

        for body in ["Your order shipped", "Tracking: 123", "Thanks!"] {
            service
                .send_message(conversation.id, b1, c1, body.to_string())
                .await
                .unwrap();
        }

        let listed = service.list_conversations(c1, None, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].highest_seq, 3);
        assert_eq!(listed[0].read_through_seq, 0);
        assert_eq!(listed[0].unread_count, 3);

        let advance = service.mark_read(conversation.id, c1, 3).await.unwrap();
        assert_eq!(advance.unread_count, 0);
        let summary = service.get_summary(conversation.id, c1).await.unwrap();
        assert_eq!(summary.unread_count, 0);
    }

    #[tokio::test]
    async fn rejects_invalid_bodies() {
        let service = service();
        let (c1, b1) = parties();
        let conversation = service.open_conversation(c1, b1).await.unwrap();

        let empty = service
            .send_message(conversation.id, c1, b1, "   ".to_string())
            .await
            .unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::InvalidArgument);

        let long = "x".repeat(MessagingConfig::default().max_body_chars + 1);
        let too_long = service
            .send_message(conversation.id, c1, b1, long)
            .await
            .unwrap_err();
        assert_eq!(too_long.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn outsiders_cannot_send_or_read() {
        let service = service();
        let (c1, b1) = parties();
        let (c2, _) = parties();
        let conversation = service.open_conversation(c1, b1).await.unwrap();

        let err = service
            .send_message(conversation.id, c2, b1, "hello".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = service
            .send_message(conversation.id, c1, c2, "hello".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = service
            .get_messages(conversation.id, c2, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let service = service();
        let (c1, b1) = parties();
        let err = service
            .send_message(Uuid::new_v4(), c1, b1, "hello".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn mark_read_beyond_log_is_invalid() {
        let service = service();
        let (c1, b1) = parties();
        let conversation = service.open_conversation(c1, b1).await.unwrap();
        let err = service.mark_read(conversation.id, c1, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn page_size_is_clamped() {
        let service = service();
        assert_eq!(service.page_size(None), 50);
        assert_eq!(service.page_size(Some(0)), 1);
        assert_eq!(service.page_size(Some(10_000)), 200);
    }
}

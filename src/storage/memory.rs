//! In-process store, used by tests and single-node development setups.
//!
//! Lock order is always `pairs` before a conversation's own mutex.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::ChatStore;
use crate::{
    error::{AppError, AppResult},
    models::{Conversation, Message, NewMessage, Participant, ParticipantPair, SoftDeleteOutcome},
    services::reconciler::{advance_read_pointer, ReadAdvance},
};

struct ConversationLog {
    conversation: Conversation,
    messages: Vec<Message>,
    purged: bool,
}

#[derive(Default)]
pub struct MemoryChatStore {
    conversations: RwLock<HashMap<Uuid, Arc<Mutex<ConversationLog>>>>,
    pairs: Mutex<HashMap<ParticipantPair, Uuid>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn log(&self, conversation_id: Uuid) -> AppResult<Arc<Mutex<ConversationLog>>> {
        let conversations = self.conversations.read().await;
        conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(AppError::ConversationNotFound)
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_or_get(
        &self,
        pair: ParticipantPair,
        requester: Participant,
    ) -> AppResult<(Conversation, bool)> {
        let mut pairs = self.pairs.lock().await;

        if let Some(id) = pairs.get(&pair).copied() {
            let log = self.log(id).await?;
            let mut log = log.lock().await;
            if let Some(member) = log.conversation.member_mut(requester) {
                member.hidden_at = None;
            }
            return Ok((log.conversation.clone(), false));
        }

        let conversation = Conversation::new(pair);
        let log = ConversationLog {
            conversation: conversation.clone(),
            messages: Vec::new(),
            purged: false,
        };
        self.conversations
            .write()
            .await
            .insert(conversation.id, Arc::new(Mutex::new(log)));
        pairs.insert(pair, conversation.id);

        tracing::debug!(conversation_id = %conversation.id, "Conversation created");
        Ok((conversation, true))
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        let log = self.log(conversation_id).await?;
        let log = log.lock().await;
        if log.purged {
            return Err(AppError::ConversationNotFound);
        }
        Ok(log.conversation.clone())
    }

    async fn list_for_participant(
        &self,
        participant: Participant,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Conversation>> {
        let logs: Vec<_> = self.conversations.read().await.values().cloned().collect();

        let mut visible = Vec::new();
        for log in logs {
            let log = log.lock().await;
            let conversation = &log.conversation;
            if !log.purged && conversation.includes(participant) && !conversation.is_hidden_for(participant) {
                visible.push(conversation.clone());
            }
        }

        visible.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(visible
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn soft_delete(
        &self,
        conversation_id: Uuid,
        participant: Participant,
    ) -> AppResult<SoftDeleteOutcome> {
        let mut pairs = self.pairs.lock().await;
        let log = self.log(conversation_id).await?;
        let mut log = log.lock().await;
        if log.purged {
            return Err(AppError::ConversationNotFound);
        }

        let member = log
            .conversation
            .member_mut(participant)
            .ok_or(AppError::ConversationNotFound)?;
        if member.hidden_at.is_none() {
            member.hidden_at = Some(Utc::now());
        }

        if !log.conversation.hidden_for_both() {
            return Ok(SoftDeleteOutcome::Hidden);
        }

        log.purged = true;
        log.messages.clear();
        pairs.retain(|_, id| *id != conversation_id);
        self.conversations.write().await.remove(&conversation_id);
        tracing::info!(%conversation_id, "Conversation purged after both sides deleted it");
        Ok(SoftDeleteOutcome::Purged)
    }

    async fn append_message(&self, new: NewMessage) -> AppResult<Message> {
        let log = self.log(new.conversation_id).await?;
        let mut log = log.lock().await;
        if log.purged {
            return Err(AppError::ConversationNotFound);
        }
        if log.conversation.counterpart(new.sender) != Some(new.receiver) {
            return Err(AppError::NotParticipant);
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            seq: log.conversation.highest_seq + 1,
            sender: new.sender,
            receiver: new.receiver,
            body: new.body,
            created_at: Utc::now(),
        };

        let conversation = &mut log.conversation;
        conversation.highest_seq = message.seq;
        conversation.last_message_id = Some(message.id);
        conversation.last_activity_at = message.created_at;
        for member in conversation.members.iter_mut() {
            member.hidden_at = None;
            if member.participant == message.sender {
                member.read_through_seq = message.seq;
            }
        }
        log.messages.push(message.clone());

        Ok(message)
    }

    async fn page_messages(
        &self,
        conversation_id: Uuid,
        before_seq: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let log = self.log(conversation_id).await?;
        let log = log.lock().await;

        let end = match before_seq {
            Some(before) => log.messages.partition_point(|m| m.seq < before),
            None => log.messages.len(),
        };
        let start = end.saturating_sub(limit.max(0) as usize);
        Ok(log.messages[start..end].to_vec())
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        participant: Participant,
        through_seq: i64,
    ) -> AppResult<ReadAdvance> {
        let log = self.log(conversation_id).await?;
        let mut log = log.lock().await;
        if log.purged {
            return Err(AppError::ConversationNotFound);
        }

        let highest_seq = log.conversation.highest_seq;
        let member = log
            .conversation
            .member_mut(participant)
            .ok_or(AppError::NotParticipant)?;
        let advance = advance_read_pointer(member.read_through_seq, highest_seq, through_seq)?;
        member.read_through_seq = advance.read_through_seq;
        Ok(advance)
    }
}

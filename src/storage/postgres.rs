use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::ChatStore;
use crate::{
    error::{AppError, AppResult},
    models::{
        Conversation, ConversationRow, Message, MessageRow, NewMessage, Participant,
        ParticipantPair, SoftDeleteOutcome,
    },
    services::reconciler::{advance_read_pointer, ReadAdvance},
};

#[derive(FromRow)]
struct UpsertedConversation {
    #[sqlx(flatten)]
    conversation: ConversationRow,
    inserted: bool,
}

#[derive(Clone)]
pub struct PgChatStore {
    db: PgPool,
}

impl PgChatStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Loads and row-locks a conversation for the rest of the transaction.
    async fn lock_conversation(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: Uuid,
    ) -> AppResult<Conversation> {
        let row: Option<ConversationRow> =
            sqlx::query_as("SELECT * FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(conversation_id)
                .fetch_optional(&mut **tx)
                .await?;

        row.map(Conversation::from)
            .ok_or(AppError::ConversationNotFound)
    }

    async fn store_members(
        tx: &mut Transaction<'_, Postgres>,
        conversation: &Conversation,
    ) -> AppResult<()> {
        let [first, second] = &conversation.members;
        sqlx::query(
            r#"
            UPDATE conversations
            SET first_read_seq = $2, first_hidden_at = $3,
                second_read_seq = $4, second_hidden_at = $5
            WHERE id = $1
            "#,
        )
        .bind(conversation.id)
        .bind(first.read_through_seq)
        .bind(first.hidden_at)
        .bind(second.read_through_seq)
        .bind(second.hidden_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn create_or_get(
        &self,
        pair: ParticipantPair,
        requester: Participant,
    ) -> AppResult<(Conversation, bool)> {
        // Atomic upsert on the canonical pair: concurrent callers converge on one row.
        let upserted: UpsertedConversation = sqlx::query_as(
            r#"
            INSERT INTO conversations (id, first_id, first_role, second_id, second_role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (first_id, first_role, second_id, second_role)
            DO UPDATE SET
                first_hidden_at = CASE
                    WHEN conversations.first_id = $6 AND conversations.first_role = $7 THEN NULL
                    ELSE conversations.first_hidden_at END,
                second_hidden_at = CASE
                    WHEN conversations.second_id = $6 AND conversations.second_role = $7 THEN NULL
                    ELSE conversations.second_hidden_at END
            RETURNING *, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(pair.first().id())
        .bind(pair.first().role())
        .bind(pair.second().id())
        .bind(pair.second().role())
        .bind(requester.id())
        .bind(requester.role())
        .fetch_one(&self.db)
        .await?;

        Ok((upserted.conversation.into(), upserted.inserted))
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        let row: Option<ConversationRow> = sqlx::query_as("SELECT * FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.db)
            .await?;

        row.map(Conversation::from)
            .ok_or(AppError::ConversationNotFound)
    }

    async fn list_for_participant(
        &self,
        participant: Participant,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            r#"
            SELECT * FROM conversations
            WHERE (first_id = $1 AND first_role = $2 AND first_hidden_at IS NULL)
               OR (second_id = $1 AND second_role = $2 AND second_hidden_at IS NULL)
            ORDER BY last_activity_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(participant.id())
        .bind(participant.role())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn soft_delete(
        &self,
        conversation_id: Uuid,
        participant: Participant,
    ) -> AppResult<SoftDeleteOutcome> {
        let mut tx = self.db.begin().await?;
        let mut conversation = Self::lock_conversation(&mut tx, conversation_id).await?;

        let member = conversation
            .member_mut(participant)
            .ok_or(AppError::ConversationNotFound)?;
        if member.hidden_at.is_none() {
            member.hidden_at = Some(Utc::now());
        }

        let outcome = if conversation.hidden_for_both() {
            // Messages go with it (ON DELETE CASCADE).
            sqlx::query("DELETE FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
            SoftDeleteOutcome::Purged
        } else {
            Self::store_members(&mut tx, &conversation).await?;
            SoftDeleteOutcome::Hidden
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn append_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut tx = self.db.begin().await?;
        let mut conversation = Self::lock_conversation(&mut tx, new.conversation_id).await?;

        if conversation.counterpart(new.sender) != Some(new.receiver) {
            return Err(AppError::NotParticipant);
        }

        let seq = conversation.highest_seq + 1;
        let row: MessageRow = sqlx::query_as(
            r#"
            INSERT INTO messages (id, conversation_id, seq, sender_id, sender_role, receiver_id, receiver_role, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.conversation_id)
        .bind(seq)
        .bind(new.sender.id())
        .bind(new.sender.role())
        .bind(new.receiver.id())
        .bind(new.receiver.role())
        .bind(&new.body)
        .fetch_one(&mut *tx)
        .await?;
        let message = Message::from(row);

        for member in conversation.members.iter_mut() {
            member.hidden_at = None;
            if member.participant == message.sender {
                member.read_through_seq = seq;
            }
        }

        sqlx::query(
            r#"
            UPDATE conversations
            SET highest_seq = $2, last_message_id = $3, last_activity_at = $4
            WHERE id = $1
            "#,
        )
        .bind(conversation.id)
        .bind(seq)
        .bind(message.id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;
        Self::store_members(&mut tx, &conversation).await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn page_messages(
        &self,
        conversation_id: Uuid,
        before_seq: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT * FROM (
                SELECT * FROM messages
                WHERE conversation_id = $1 AND ($2::BIGINT IS NULL OR seq < $2)
                ORDER BY seq DESC
                LIMIT $3
            ) page
            ORDER BY seq ASC
            "#,
        )
        .bind(conversation_id)
        .bind(before_seq)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        participant: Participant,
        through_seq: i64,
    ) -> AppResult<ReadAdvance> {
        let mut tx = self.db.begin().await?;
        let mut conversation = Self::lock_conversation(&mut tx, conversation_id).await?;

        let highest_seq = conversation.highest_seq;
        let member = conversation
            .member_mut(participant)
            .ok_or(AppError::NotParticipant)?;
        let advance = advance_read_pointer(member.read_through_seq, highest_seq, through_seq)?;

        if advance.advanced {
            member.read_through_seq = advance.read_through_seq;
            Self::store_members(&mut tx, &conversation).await?;
        }

        tx.commit().await?;
        Ok(advance)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Participant, Role};

/// A persisted, immutable chat message. `seq` is assigned by the store and is
/// both the ordering key and the unit read pointers advance over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub seq: i64,
    pub sender: Participant,
    pub receiver: Participant,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A message that has not been assigned an id or sequence yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender: Participant,
    pub receiver: Participant,
    pub body: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub seq: i64,
    pub sender_id: Uuid,
    pub sender_role: Role,
    pub receiver_id: Uuid,
    pub receiver_role: Role,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            conversation_id: row.conversation_id,
            seq: row.seq,
            sender: Participant::new(row.sender_id, row.sender_role),
            receiver: Participant::new(row.receiver_id, row.receiver_role),
            body: row.body,
            created_at: row.created_at,
        }
    }
}

/// Client-side delivery state of an optimistically displayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

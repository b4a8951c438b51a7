use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Participant, ParticipantPair, Role};
use crate::services::reconciler::unread_count;

/// One side of a conversation together with its read pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub participant: Participant,
    pub read_through_seq: i64,
    pub hidden_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(participant: Participant) -> Self {
        Self {
            participant,
            read_through_seq: 0,
            hidden_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Canonical order, see [`ParticipantPair`].
    pub members: [Member; 2],
    pub last_message_id: Option<Uuid>,
    pub last_activity_at: DateTime<Utc>,
    pub highest_seq: i64,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(pair: ParticipantPair) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            members: [Member::new(pair.first()), Member::new(pair.second())],
            last_message_id: None,
            last_activity_at: now,
            highest_seq: 0,
            created_at: now,
        }
    }

    pub fn participants(&self) -> [Participant; 2] {
        [self.members[0].participant, self.members[1].participant]
    }

    pub fn includes(&self, participant: Participant) -> bool {
        self.member(participant).is_some()
    }

    pub fn member(&self, participant: Participant) -> Option<&Member> {
        self.members.iter().find(|m| m.participant == participant)
    }

    pub fn member_mut(&mut self, participant: Participant) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.participant == participant)
    }

    pub fn counterpart(&self, participant: Participant) -> Option<Participant> {
        let [first, second] = self.participants();
        if first == participant {
            Some(second)
        } else if second == participant {
            Some(first)
        } else {
            None
        }
    }

    pub fn is_hidden_for(&self, participant: Participant) -> bool {
        self.member(participant)
            .map(|m| m.hidden_at.is_some())
            .unwrap_or(false)
    }

    pub fn hidden_for_both(&self) -> bool {
        self.members.iter().all(|m| m.hidden_at.is_some())
    }

    pub fn unread_for(&self, participant: Participant) -> Option<i64> {
        self.member(participant)
            .map(|m| unread_count(self.highest_seq, m.read_through_seq))
    }

    /// The participant-specific view used by conversation lists and polls.
    pub fn summary_for(&self, participant: Participant) -> Option<ConversationSummary> {
        let member = self.member(participant)?;
        let counterpart = self.counterpart(participant)?;
        Some(ConversationSummary {
            id: self.id,
            counterpart,
            last_message_id: self.last_message_id,
            last_activity_at: self.last_activity_at,
            highest_seq: self.highest_seq,
            read_through_seq: member.read_through_seq,
            unread_count: unread_count(self.highest_seq, member.read_through_seq),
        })
    }
}

/// A conversation as seen by one participant, annotated with its unread count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub counterpart: Participant,
    pub last_message_id: Option<Uuid>,
    pub last_activity_at: DateTime<Utc>,
    pub highest_seq: i64,
    pub read_through_seq: i64,
    pub unread_count: i64,
}

/// Flat row shape of the `conversations` table.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub first_id: Uuid,
    pub first_role: Role,
    pub first_read_seq: i64,
    pub first_hidden_at: Option<DateTime<Utc>>,
    pub second_id: Uuid,
    pub second_role: Role,
    pub second_read_seq: i64,
    pub second_hidden_at: Option<DateTime<Utc>>,
    pub last_message_id: Option<Uuid>,
    pub last_activity_at: DateTime<Utc>,
    pub highest_seq: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            members: [
                Member {
                    participant: Participant::new(row.first_id, row.first_role),
                    read_through_seq: row.first_read_seq,
                    hidden_at: row.first_hidden_at,
                },
                Member {
                    participant: Participant::new(row.second_id, row.second_role),
                    read_through_seq: row.second_read_seq,
                    hidden_at: row.second_hidden_at,
                },
            ],
            last_message_id: row.last_message_id,
            last_activity_at: row.last_activity_at,
            highest_seq: row.highest_seq,
            created_at: row.created_at,
        }
    }
}

/// Result of a soft delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftDeleteOutcome {
    /// Hidden for the caller only; the other side still sees it.
    Hidden,
    /// Both sides removed it, so the conversation and its log are gone.
    Purged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> (Conversation, Participant, Participant) {
        let c = Participant::Customer(Uuid::new_v4());
        let b = Participant::Business(Uuid::new_v4());
        (Conversation::new(ParticipantPair::new(c, b).unwrap()), c, b)
    }

    #[test]
    fn unread_follows_highest_minus_pointer() {
        let (mut conv, c, b) = conversation();
        conv.highest_seq = 5;
        conv.member_mut(c).unwrap().read_through_seq = 2;
        assert_eq!(conv.unread_for(c), Some(3));
        assert_eq!(conv.unread_for(b), Some(5));
        assert_eq!(conv.unread_for(Participant::Customer(Uuid::new_v4())), None);
    }

    #[test]
    fn summary_names_the_other_side() {
        let (conv, c, b) = conversation();
        let summary = conv.summary_for(c).unwrap();
        assert_eq!(summary.counterpart, b);
        assert_eq!(summary.unread_count, 0);
    }
}

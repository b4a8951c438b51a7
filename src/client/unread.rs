//! Client-side unread badges.
//!
//! Every count is recomputed from `(highest_seq, read_through)` with the same
//! formula the server uses. The optimistic floor only ever raises the read
//! side, so a new message always shows up as unread while the user is away.
//! Reads are only asserted through messages the user has actually been shown.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{models::ConversationSummary, services::reconciler::unread_count};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ReadState {
    highest_seq: i64,
    server_read_through: i64,
    /// Local assertion not yet confirmed by the server.
    optimistic_floor: Option<i64>,
    /// How far the counterpart has read, for "seen" markers.
    counterpart_read_through: i64,
}

impl ReadState {
    fn effective_read_through(&self) -> i64 {
        self.server_read_through
            .max(self.optimistic_floor.unwrap_or(0))
    }

    fn unread(&self) -> i64 {
        unread_count(self.highest_seq, self.effective_read_through())
    }

    /// Clears the floor if the server pointer caught up. Returns true on clear.
    fn settle(&mut self) -> bool {
        match self.optimistic_floor {
            Some(floor) if self.server_read_through >= floor => {
                self.optimistic_floor = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct UnreadTracker {
    conversations: HashMap<Uuid, ReadState>,
    viewing: Option<Uuid>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed floors from assertions persisted by an earlier run.
    pub fn restore_pending(&mut self, pending: impl IntoIterator<Item = (Uuid, i64)>) {
        for (conversation_id, seq) in pending {
            let state = self.conversations.entry(conversation_id).or_default();
            state.optimistic_floor = Some(state.optimistic_floor.unwrap_or(0).max(seq));
            state.highest_seq = state.highest_seq.max(seq);
        }
    }

    /// Merge a polled summary. Both sequence values only move forward, so a
    /// snapshot older than local knowledge changes nothing. Returns true when
    /// the snapshot confirms a pending local assertion.
    pub fn apply_snapshot(&mut self, summary: &ConversationSummary) -> bool {
        let state = self.conversations.entry(summary.id).or_default();
        state.highest_seq = state.highest_seq.max(summary.highest_seq);
        state.server_read_through = state.server_read_through.max(summary.read_through_seq);
        state.settle()
    }

    /// The user opened a conversation whose newest loaded message is
    /// `loaded_highest_seq`. The badge drops to 0 at once. Returns the sequence
    /// to send in `markMessagesRead`, if the server is behind what was loaded.
    pub fn open_conversation(&mut self, conversation_id: Uuid, loaded_highest_seq: i64) -> Option<i64> {
        self.viewing = Some(conversation_id);
        self.assert_read_through(conversation_id, loaded_highest_seq)
    }

    pub fn close_conversation(&mut self, conversation_id: Uuid) {
        if self.viewing == Some(conversation_id) {
            self.viewing = None;
        }
    }

    pub fn viewing(&self) -> Option<Uuid> {
        self.viewing
    }

    /// A message with `seq` exists in the conversation but has not been
    /// loaded. Only the ceiling moves.
    pub fn on_new_message(&mut self, conversation_id: Uuid, seq: i64) {
        let state = self.conversations.entry(conversation_id).or_default();
        state.highest_seq = state.highest_seq.max(seq);
    }

    /// A message with `seq` was delivered in full. Returns the sequence to
    /// re-mark when the user is looking at that conversation.
    pub fn on_message_shown(&mut self, conversation_id: Uuid, seq: i64) -> Option<i64> {
        if self.viewing == Some(conversation_id) {
            self.assert_read_through(conversation_id, seq)
        } else {
            self.on_new_message(conversation_id, seq);
            None
        }
    }

    /// Our own message was acknowledged. The server advanced our pointer with it.
    pub fn on_own_message(&mut self, conversation_id: Uuid, seq: i64) {
        let state = self.conversations.entry(conversation_id).or_default();
        state.highest_seq = state.highest_seq.max(seq);
        state.server_read_through = state.server_read_through.max(seq);
        state.settle();
    }

    /// The server confirmed our pointer at `through_seq`. Returns true when a
    /// pending assertion is now settled.
    pub fn on_read_confirmed(&mut self, conversation_id: Uuid, through_seq: i64) -> bool {
        let state = self.conversations.entry(conversation_id).or_default();
        state.server_read_through = state.server_read_through.max(through_seq);
        state.highest_seq = state.highest_seq.max(through_seq);
        state.settle()
    }

    pub fn on_counterpart_read(&mut self, conversation_id: Uuid, through_seq: i64) {
        let state = self.conversations.entry(conversation_id).or_default();
        state.counterpart_read_through = state.counterpart_read_through.max(through_seq);
    }

    /// The server refused our assertion; fall back to its own pointer.
    pub fn on_mark_read_rejected(&mut self, conversation_id: Uuid) {
        if let Some(state) = self.conversations.get_mut(&conversation_id) {
            state.optimistic_floor = None;
        }
    }

    pub fn forget(&mut self, conversation_id: Uuid) {
        self.conversations.remove(&conversation_id);
        self.close_conversation(conversation_id);
    }

    /// Badge for one conversation. The open conversation always shows 0.
    pub fn unread(&self, conversation_id: Uuid) -> i64 {
        if self.viewing == Some(conversation_id) {
            return 0;
        }
        self.conversations
            .get(&conversation_id)
            .map(ReadState::unread)
            .unwrap_or(0)
    }

    pub fn total_unread(&self) -> i64 {
        self.conversations
            .keys()
            .map(|conversation_id| self.unread(*conversation_id))
            .sum()
    }

    pub fn highest_seq(&self, conversation_id: Uuid) -> i64 {
        self.conversations
            .get(&conversation_id)
            .map(|s| s.highest_seq)
            .unwrap_or(0)
    }

    /// Whether the counterpart has read through `seq`.
    pub fn seen_by_counterpart(&self, conversation_id: Uuid, seq: i64) -> bool {
        self.conversations
            .get(&conversation_id)
            .map(|s| s.counterpart_read_through >= seq)
            .unwrap_or(false)
    }

    /// Unconfirmed assertions, to re-send after a reconnect.
    pub fn pending_mark_reads(&self) -> Vec<(Uuid, i64)> {
        let mut pending: Vec<_> = self
            .conversations
            .iter()
            .filter_map(|(id, state)| state.optimistic_floor.map(|floor| (*id, floor)))
            .collect();
        pending.sort();
        pending
    }

    fn assert_read_through(&mut self, conversation_id: Uuid, target: i64) -> Option<i64> {
        let state = self.conversations.entry(conversation_id).or_default();
        state.highest_seq = state.highest_seq.max(target);
        if target <= state.effective_read_through() {
            return None;
        }
        state.optimistic_floor = Some(target);
        Some(target)
    }
}

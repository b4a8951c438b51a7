//! One client's view of its conversations.
//!
//! `ChatSession` is a pure state machine: feed it server events, poll results
//! and user actions; it returns the frames to send. Transport lives in
//! [`super::connection`].

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use uuid::Uuid;

use super::{
    outbox::{OutgoingMessage, Outbox},
    read_state::ReadStateCache,
    typing::TypingIndicators,
    unread::UnreadTracker,
};
use crate::{
    error::{AppError, AppResult, ErrorKind},
    models::{ClientEvent, ConversationSummary, DeliveryState, Message, Participant, ServerEvent},
};

/// What the UI renders for one line of a conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEntry {
    Delivered(Message),
    Local {
        client_temp_id: String,
        body: String,
        failed: bool,
    },
}

#[derive(Debug)]
pub struct ChatSession {
    me: Participant,
    unread: UnreadTracker,
    outbox: Outbox,
    typing: TypingIndicators,
    read_cache: ReadStateCache,
    counterparts: HashMap<Uuid, Participant>,
    timelines: HashMap<Uuid, BTreeMap<i64, Message>>,
}

impl ChatSession {
    pub fn new(
        me: Participant,
        read_cache: ReadStateCache,
        typing_ttl: Duration,
        ack_timeout: Duration,
    ) -> Self {
        let mut unread = UnreadTracker::new();
        unread.restore_pending(read_cache.pending());

        Self {
            me,
            unread,
            outbox: Outbox::new(me, ack_timeout),
            typing: TypingIndicators::new(typing_ttl),
            read_cache,
            counterparts: HashMap::new(),
            timelines: HashMap::new(),
        }
    }

    pub fn participant(&self) -> Participant {
        self.me
    }

    /// Frames to send right after a (re)connect: the personal room, the open
    /// conversation, and any read assertions the server has not confirmed.
    pub fn resync_events(&self) -> Vec<ClientEvent> {
        let mut events = vec![ClientEvent::join_user_room(self.me)];
        if let Some(conversation_id) = self.unread.viewing() {
            events.push(ClientEvent::JoinConversation { conversation_id });
        }
        events.extend(
            self.unread
                .pending_mark_reads()
                .into_iter()
                .map(|(conversation_id, through_seq)| self.mark_read_event(conversation_id, through_seq)),
        );
        events
    }

    /// Merge a conversation list fetched over HTTP.
    pub fn apply_conversations(&mut self, summaries: &[ConversationSummary]) -> AppResult<()> {
        for summary in summaries {
            self.counterparts.insert(summary.id, summary.counterpart);
            if self.unread.apply_snapshot(summary) {
                self.read_cache.confirm(summary.id, summary.read_through_seq)?;
            }
        }
        Ok(())
    }

    /// The user opened a conversation and loaded `history` (oldest first).
    pub fn open_conversation(
        &mut self,
        conversation_id: Uuid,
        counterpart: Participant,
        history: &[Message],
    ) -> AppResult<Vec<ClientEvent>> {
        let mut events = Vec::new();
        if let Some(previous) = self.unread.viewing() {
            if previous != conversation_id {
                events.extend(self.close_conversation(previous));
            }
        }
        self.counterparts.insert(conversation_id, counterpart);

        let timeline = self.timelines.entry(conversation_id).or_default();
        for message in history {
            timeline.insert(message.seq, message.clone());
        }
        let loaded_highest = timeline.keys().next_back().copied().unwrap_or(0);

        events.push(ClientEvent::JoinConversation { conversation_id });
        if let Some(through_seq) = self.unread.open_conversation(conversation_id, loaded_highest) {
            self.read_cache.assert_read(conversation_id, through_seq)?;
            events.push(self.mark_read_event(conversation_id, through_seq));
        }
        Ok(events)
    }

    pub fn close_conversation(&mut self, conversation_id: Uuid) -> Vec<ClientEvent> {
        self.unread.close_conversation(conversation_id);
        vec![ClientEvent::LeaveConversation { conversation_id }]
    }

    /// Queue an optimistic message. Fails if the conversation is unknown.
    pub fn send(&mut self, conversation_id: Uuid, body: String, now: Instant) -> AppResult<(String, ClientEvent)> {
        let receiver = self
            .counterparts
            .get(&conversation_id)
            .copied()
            .ok_or(AppError::ConversationNotFound)?;
        Ok(self.outbox.queue(conversation_id, receiver, body, now))
    }

    pub fn resend(&mut self, client_temp_id: &str, now: Instant) -> Option<(String, ClientEvent)> {
        self.outbox.resend(client_temp_id, now)
    }

    /// Apply one server frame. Returns frames to send in response.
    pub fn handle(&mut self, event: ServerEvent, now: Instant) -> AppResult<Vec<ClientEvent>> {
        let mut replies = Vec::new();
        match event {
            ServerEvent::MessageSent {
                client_temp_id,
                message,
            } => {
                self.outbox.on_ack(&client_temp_id, &message);
                self.unread.on_own_message(message.conversation_id, message.seq);
                self.confirm_cache(message.conversation_id, message.seq)?;
                self.record(message);
                self.outbox.take_sent();
            }
            ServerEvent::MessageError {
                client_temp_id,
                error,
            } => {
                tracing::debug!(%client_temp_id, kind = ?error.kind, "Send rejected");
                self.outbox.on_error(&client_temp_id, error);
            }
            ServerEvent::ReceiveMessage(message) => {
                let conversation_id = message.conversation_id;
                let seq = message.seq;
                if message.sender == self.me {
                    // Echo to another tab of ours
                    self.unread.on_own_message(conversation_id, seq);
                } else {
                    self.typing.on_stop(conversation_id, message.sender);
                    replies.extend(self.on_message_shown(conversation_id, seq)?);
                }
                self.record(message);
            }
            ServerEvent::NewMessageNotification {
                conversation_id,
                seq,
                sender,
            } => {
                if sender == self.me {
                    self.unread.on_own_message(conversation_id, seq);
                } else {
                    self.counterparts.entry(conversation_id).or_insert(sender);
                    self.unread.on_new_message(conversation_id, seq);
                }
            }
            ServerEvent::MessagesRead {
                conversation_id,
                read_by,
                through_seq,
            } => {
                if read_by == self.me {
                    if self.unread.on_read_confirmed(conversation_id, through_seq) {
                        self.read_cache.confirm(conversation_id, through_seq)?;
                    }
                } else {
                    self.unread.on_counterpart_read(conversation_id, through_seq);
                }
            }
            ServerEvent::ConversationJoined {
                conversation_id,
                highest_seq,
                read_through_seq,
            } => {
                // History past what was loaded is not marked until it is shown
                self.unread.on_new_message(conversation_id, highest_seq);
                if self.unread.on_read_confirmed(conversation_id, read_through_seq) {
                    self.read_cache.confirm(conversation_id, read_through_seq)?;
                }
            }
            ServerEvent::Typing {
                conversation_id,
                user,
            } if user != self.me => self.typing.on_typing(conversation_id, user, now),
            ServerEvent::StopTyping {
                conversation_id,
                user,
            } => self.typing.on_stop(conversation_id, user),
            ServerEvent::OperationError {
                operation,
                conversation_id: Some(conversation_id),
                error,
            } if operation == "markMessagesRead" => {
                if error.kind.is_retryable() {
                    // Stays pending; re-sent on the next resync
                    tracing::debug!(%conversation_id, "Mark-read deferred: {}", error.message);
                } else {
                    tracing::warn!(%conversation_id, kind = ?error.kind, "Mark-read rejected: {}", error.message);
                    self.unread.on_mark_read_rejected(conversation_id);
                    self.read_cache.forget(conversation_id)?;
                    if error.kind == ErrorKind::NotFound {
                        self.drop_conversation(conversation_id);
                    }
                }
            }
            ServerEvent::OperationError {
                operation, error, ..
            } => {
                tracing::warn!(%operation, kind = ?error.kind, "Operation rejected: {}", error.message);
            }
            ServerEvent::UserRoomJoined { .. } | ServerEvent::Typing { .. } | ServerEvent::Pong => {}
        }
        Ok(replies)
    }

    /// Time-driven housekeeping: overdue acks and stale typing indicators.
    /// Returns temp ids that just failed.
    pub fn tick(&mut self, now: Instant) -> Vec<String> {
        self.typing.prune(now);
        self.outbox.expire(now)
    }

    /// Nothing in flight can be acked over a dead connection.
    pub fn connection_lost(&mut self) -> Vec<String> {
        self.outbox.fail_pending()
    }

    pub fn unread(&self, conversation_id: Uuid) -> i64 {
        self.unread.unread(conversation_id)
    }

    pub fn total_unread(&self) -> i64 {
        self.unread.total_unread()
    }

    pub fn typists(&self, conversation_id: Uuid, now: Instant) -> Vec<Participant> {
        self.typing.typists(conversation_id, now)
    }

    pub fn seen_by_counterpart(&self, conversation_id: Uuid, seq: i64) -> bool {
        self.unread.seen_by_counterpart(conversation_id, seq)
    }

    pub fn outgoing(&self, client_temp_id: &str) -> Option<&OutgoingMessage> {
        self.outbox.get(client_temp_id)
    }

    /// Delivered messages by sequence, then local sends still in flight or failed.
    pub fn timeline(&self, conversation_id: Uuid) -> Vec<TimelineEntry> {
        let mut entries: Vec<_> = self
            .timelines
            .get(&conversation_id)
            .map(|t| t.values().cloned().map(TimelineEntry::Delivered).collect())
            .unwrap_or_default();
        entries.extend(self.outbox.unsent(conversation_id).map(|e| TimelineEntry::Local {
            client_temp_id: e.client_temp_id.clone(),
            body: e.body.clone(),
            failed: e.state == DeliveryState::Failed,
        }));
        entries
    }

    fn on_message_shown(&mut self, conversation_id: Uuid, seq: i64) -> AppResult<Option<ClientEvent>> {
        match self.unread.on_message_shown(conversation_id, seq) {
            Some(through_seq) => {
                self.read_cache.assert_read(conversation_id, through_seq)?;
                Ok(Some(self.mark_read_event(conversation_id, through_seq)))
            }
            None => Ok(None),
        }
    }

    fn confirm_cache(&mut self, conversation_id: Uuid, through_seq: i64) -> AppResult<()> {
        if self.read_cache.get(conversation_id).is_some() {
            self.read_cache.confirm(conversation_id, through_seq)?;
        }
        Ok(())
    }

    // Keyed by seq, so an ack and an echo of the same message collapse.
    fn record(&mut self, message: Message) {
        self.timelines
            .entry(message.conversation_id)
            .or_default()
            .insert(message.seq, message);
    }

    fn drop_conversation(&mut self, conversation_id: Uuid) {
        self.unread.forget(conversation_id);
        self.timelines.remove(&conversation_id);
        self.counterparts.remove(&conversation_id);
    }

    fn mark_read_event(&self, conversation_id: Uuid, through_seq: i64) -> ClientEvent {
        ClientEvent::MarkMessagesRead {
            conversation_id,
            user_id: self.me.id(),
            through_seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio_test::assert_ok;

    struct Fixture {
        _dir: tempfile::TempDir,
        session: ChatSession,
        c1: Participant,
        b1: Participant,
        conversation: Uuid,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReadStateCache::open(dir.path().join("read-state.json")).unwrap();
        let c1 = Participant::Customer(Uuid::new_v4());
        let b1 = Participant::Business(Uuid::new_v4());
        Fixture {
            _dir: dir,
            session: ChatSession::new(c1, cache, Duration::from_secs(3), Duration::from_secs(10)),
            c1,
            b1,
            conversation: Uuid::new_v4(),
        }
    }

    fn message(conversation_id: Uuid, seq: i64, sender: Participant, receiver: Participant) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            seq,
            sender,
            receiver,
            body: format!("message {}", seq),
            created_at: Utc::now(),
        }
    }

    fn summary(f: &Fixture, highest_seq: i64, read_through_seq: i64) -> ConversationSummary {
        ConversationSummary {
            id: f.conversation,
            counterpart: f.b1,
            last_message_id: None,
            last_activity_at: Utc::now(),
            highest_seq,
            read_through_seq,
            unread_count: highest_seq - read_through_seq,
        }
    }

    #[test]
    fn ack_and_echo_do_not_duplicate() {
        let mut f = fixture();
        let now = Instant::now();
        assert_ok!(f.session.apply_conversations(&[summary(&f, 6, 6)]));

        let (temp_id, _) = assert_ok!(f.session.send(f.conversation, "hello".into(), now));
        assert!(matches!(
            f.session.timeline(f.conversation).as_slice(),
            [TimelineEntry::Local { failed: false, .. }]
        ));

        let stored = message(f.conversation, 7, f.c1, f.b1);
        assert_ok!(f.session.handle(
            ServerEvent::MessageSent {
                client_temp_id: temp_id.clone(),
                message: stored.clone(),
            },
            now,
        ));
        assert_ok!(f.session.handle(ServerEvent::ReceiveMessage(stored.clone()), now));

        assert_eq!(
            f.session.timeline(f.conversation),
            vec![TimelineEntry::Delivered(stored)]
        );
        assert!(f.session.outgoing(&temp_id).is_none());
        assert_eq!(f.session.unread(f.conversation), 0);
    }

    #[test]
    fn stale_poll_after_open_keeps_zero() {
        let mut f = fixture();
        let now = Instant::now();
        assert_ok!(f.session.apply_conversations(&[summary(&f, 3, 0)]));
        assert_eq!(f.session.unread(f.conversation), 3);

        let history: Vec<_> = (1..=3).map(|seq| message(f.conversation, seq, f.b1, f.c1)).collect();
        let events = assert_ok!(f.session.open_conversation(f.conversation, f.b1, &history));
        assert!(events.contains(&ClientEvent::MarkMessagesRead {
            conversation_id: f.conversation,
            user_id: f.c1.id(),
            through_seq: 3,
        }));
        assert_eq!(f.session.unread(f.conversation), 0);

        assert_ok!(f.session.apply_conversations(&[summary(&f, 3, 0)]));
        assert_eq!(f.session.unread(f.conversation), 0);

        // Pending assertion is replayed on reconnect
        assert!(f.session.resync_events().contains(&ClientEvent::MarkMessagesRead {
            conversation_id: f.conversation,
            user_id: f.c1.id(),
            through_seq: 3,
        }));

        assert_ok!(f.session.handle(
            ServerEvent::MessagesRead {
                conversation_id: f.conversation,
                read_by: f.c1,
                through_seq: 3,
            },
            now,
        ));
        assert_eq!(f.session.resync_events().len(), 2);
    }

    #[test]
    fn notification_while_away_raises_badge() {
        let mut f = fixture();
        let now = Instant::now();
        assert_ok!(f.session.apply_conversations(&[summary(&f, 2, 2)]));

        let replies = assert_ok!(f.session.handle(
            ServerEvent::NewMessageNotification {
                conversation_id: f.conversation,
                seq: 3,
                sender: f.b1,
            },
            now,
        ));
        assert!(replies.is_empty());
        assert_eq!(f.session.unread(f.conversation), 1);
        assert_eq!(f.session.total_unread(), 1);
    }

    #[test]
    fn message_while_viewing_is_marked_read() {
        let mut f = fixture();
        let now = Instant::now();
        assert_ok!(f.session.open_conversation(f.conversation, f.b1, &[]));

        let replies = assert_ok!(f.session.handle(
            ServerEvent::ReceiveMessage(message(f.conversation, 1, f.b1, f.c1)),
            now,
        ));
        assert_eq!(
            replies,
            vec![ClientEvent::MarkMessagesRead {
                conversation_id: f.conversation,
                user_id: f.c1.id(),
                through_seq: 1,
            }]
        );
        assert_eq!(f.session.unread(f.conversation), 0);
    }

    #[test]
    fn typing_clears_after_window() {
        let mut f = fixture();
        let start = Instant::now();
        assert_ok!(f.session.handle(
            ServerEvent::Typing {
                conversation_id: f.conversation,
                user: f.b1,
            },
            start,
        ));
        assert_eq!(f.session.typists(f.conversation, start), vec![f.b1]);

        f.session.tick(start + Duration::from_millis(3100));
        assert!(f.session.typists(f.conversation, start + Duration::from_millis(3100)).is_empty());
    }

    #[test]
    fn dropped_connection_fails_in_flight_sends() {
        let mut f = fixture();
        let now = Instant::now();
        assert_ok!(f.session.apply_conversations(&[summary(&f, 0, 0)]));
        let (temp_id, _) = assert_ok!(f.session.send(f.conversation, "anyone there?".into(), now));

        assert_eq!(f.session.connection_lost(), vec![temp_id.clone()]);
        assert_eq!(
            f.session.outgoing(&temp_id).map(|m| m.state),
            Some(DeliveryState::Failed)
        );

        // Resend is explicit and goes out under a new temp id
        let (retry_id, frame) = f.session.resend(&temp_id, now).unwrap();
        assert_ne!(retry_id, temp_id);
        assert!(matches!(frame, ClientEvent::SendMessage { ref client_temp_id, .. } if *client_temp_id == retry_id));
        assert!(f.session.connection_lost().contains(&retry_id));
    }

    #[test]
    fn open_marks_read_only_through_loaded_history() {
        let mut f = fixture();
        let now = Instant::now();
        assert_ok!(f.session.apply_conversations(&[summary(&f, 5, 0)]));

        let history: Vec<_> = (1..=3).map(|seq| message(f.conversation, seq, f.b1, f.c1)).collect();
        let events = assert_ok!(f.session.open_conversation(f.conversation, f.b1, &history));
        assert_eq!(
            events,
            vec![
                ClientEvent::JoinConversation {
                    conversation_id: f.conversation,
                },
                ClientEvent::MarkMessagesRead {
                    conversation_id: f.conversation,
                    user_id: f.c1.id(),
                    through_seq: 3,
                },
            ]
        );
        assert_eq!(f.session.unread(f.conversation), 0);

        // The join ack reports a higher ceiling; nothing beyond seq 3 is claimed
        let replies = assert_ok!(f.session.handle(
            ServerEvent::ConversationJoined {
                conversation_id: f.conversation,
                highest_seq: 5,
                read_through_seq: 0,
            },
            now,
        ));
        assert!(replies.is_empty());

        // Seq 4 arrives in full while viewing and is marked
        let replies = assert_ok!(f.session.handle(
            ServerEvent::ReceiveMessage(message(f.conversation, 4, f.b1, f.c1)),
            now,
        ));
        assert_eq!(
            replies,
            vec![ClientEvent::MarkMessagesRead {
                conversation_id: f.conversation,
                user_id: f.c1.id(),
                through_seq: 4,
            }]
        );

        f.session.close_conversation(f.conversation);
        assert_eq!(f.session.unread(f.conversation), 1);
    }

    #[test]
    fn switching_conversations_leaves_the_previous_room() {
        let mut f = fixture();
        let other = Uuid::new_v4();
        assert_ok!(f.session.open_conversation(f.conversation, f.b1, &[]));

        let events = assert_ok!(f.session.open_conversation(other, f.b1, &[]));
        assert_eq!(
            events,
            vec![
                ClientEvent::LeaveConversation {
                    conversation_id: f.conversation,
                },
                ClientEvent::JoinConversation {
                    conversation_id: other,
                },
            ]
        );

        // Re-opening the same conversation does not leave it
        let events = assert_ok!(f.session.open_conversation(other, f.b1, &[]));
        assert_eq!(events, vec![ClientEvent::JoinConversation { conversation_id: other }]);
        assert!(f
            .session
            .resync_events()
            .contains(&ClientEvent::JoinConversation { conversation_id: other }));
    }

    #[test]
    fn send_to_unknown_conversation_fails() {
        let mut f = fixture();
        let err = f
            .session
            .send(Uuid::new_v4(), "hi".into(), Instant::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

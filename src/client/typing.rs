//! Typing indicators. Nothing here is persisted and a lost signal is harmless.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use uuid::Uuid;

use crate::models::{ClientEvent, Participant};

/// Receive side: who is typing where, expiring without a refresh.
#[derive(Debug)]
pub struct TypingIndicators {
    ttl: Duration,
    active: HashMap<(Uuid, Participant), Instant>,
}

impl TypingIndicators {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: HashMap::new(),
        }
    }

    pub fn on_typing(&mut self, conversation_id: Uuid, user: Participant, now: Instant) {
        self.active.insert((conversation_id, user), now + self.ttl);
    }

    pub fn on_stop(&mut self, conversation_id: Uuid, user: Participant) {
        self.active.remove(&(conversation_id, user));
    }

    pub fn is_typing(&self, conversation_id: Uuid, user: Participant, now: Instant) -> bool {
        self.active
            .get(&(conversation_id, user))
            .map(|deadline| now < *deadline)
            .unwrap_or(false)
    }

    pub fn typists(&self, conversation_id: Uuid, now: Instant) -> Vec<Participant> {
        let mut typists: Vec<_> = self
            .active
            .iter()
            .filter(|((conversation, _), deadline)| *conversation == conversation_id && now < **deadline)
            .map(|((_, user), _)| *user)
            .collect();
        typists.sort();
        typists
    }

    /// Drop expired indicators and report them.
    pub fn prune(&mut self, now: Instant) -> Vec<(Uuid, Participant)> {
        let expired: Vec<_> = self
            .active
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.active.remove(key);
        }
        expired
    }
}

/// Send side for one open conversation: refreshes `typing` while input keeps
/// coming and emits `stopTyping` after a pause or on send.
#[derive(Debug)]
pub struct TypingEmitter {
    conversation_id: Uuid,
    user: Participant,
    refresh_every: Duration,
    idle_after: Duration,
    last_sent: Option<Instant>,
    last_input: Option<Instant>,
}

impl TypingEmitter {
    /// `ttl` is the receiver's expiry window; refreshes go out well inside it.
    pub fn new(conversation_id: Uuid, user: Participant, ttl: Duration) -> Self {
        Self {
            conversation_id,
            user,
            refresh_every: ttl * 2 / 3,
            idle_after: ttl / 2,
            last_sent: None,
            last_input: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.last_sent.is_some()
    }

    pub fn on_input(&mut self, now: Instant) -> Option<ClientEvent> {
        self.last_input = Some(now);
        let due = match self.last_sent {
            Some(sent) => now.saturating_duration_since(sent) >= self.refresh_every,
            None => true,
        };
        if !due {
            return None;
        }
        self.last_sent = Some(now);
        Some(ClientEvent::Typing {
            conversation_id: self.conversation_id,
            user_id: self.user.id(),
        })
    }

    /// Call periodically; stops after input goes quiet.
    pub fn tick(&mut self, now: Instant) -> Option<ClientEvent> {
        match self.last_input {
            Some(input) if self.is_active() && now.saturating_duration_since(input) >= self.idle_after => {
                self.stop()
            }
            _ => None,
        }
    }

    pub fn on_send(&mut self) -> Option<ClientEvent> {
        self.stop()
    }

    fn stop(&mut self) -> Option<ClientEvent> {
        self.last_input = None;
        self.last_sent.take().map(|_| ClientEvent::StopTyping {
            conversation_id: self.conversation_id,
            user_id: self.user.id(),
        })
    }
}

//! Optimistic sends awaiting acknowledgement.
//!
//! An entry lives here from the moment the user hits send until the server
//! acks it. Retries are never automatic: a Failed entry stays Failed until the
//! user resends it, which issues a fresh `clientTempId`.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::{
    error::ErrorPayload,
    models::{ClientEvent, DeliveryState, Message, Participant},
};

#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub client_temp_id: String,
    pub conversation_id: Uuid,
    pub receiver: Participant,
    pub body: String,
    pub state: DeliveryState,
    pub message: Option<Message>,
    pub error: Option<ErrorPayload>,
    queued_at: Instant,
}

impl OutgoingMessage {
    fn event(&self, sender: Participant) -> ClientEvent {
        ClientEvent::SendMessage {
            conversation_id: self.conversation_id,
            sender_id: sender.id(),
            sender_role: sender.role(),
            receiver_id: self.receiver.id(),
            receiver_role: self.receiver.role(),
            body: self.body.clone(),
            client_temp_id: self.client_temp_id.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Outbox {
    sender: Participant,
    ack_timeout: Duration,
    entries: Vec<OutgoingMessage>,
}

impl Outbox {
    pub fn new(sender: Participant, ack_timeout: Duration) -> Self {
        Self {
            sender,
            ack_timeout,
            entries: Vec::new(),
        }
    }

    /// Add a Pending entry and build the frame that submits it.
    pub fn queue(
        &mut self,
        conversation_id: Uuid,
        receiver: Participant,
        body: String,
        now: Instant,
    ) -> (String, ClientEvent) {
        let entry = OutgoingMessage {
            client_temp_id: format!("tmp-{}", Uuid::new_v4()),
            conversation_id,
            receiver,
            body,
            state: DeliveryState::Pending,
            message: None,
            error: None,
            queued_at: now,
        };
        let event = entry.event(self.sender);
        let temp_id = entry.client_temp_id.clone();
        self.entries.push(entry);
        (temp_id, event)
    }

    /// Reconcile an ack. A late ack for a Failed entry still promotes it to
    /// Sent, since the server did store the message.
    pub fn on_ack(&mut self, client_temp_id: &str, message: &Message) -> bool {
        match self.find_mut(client_temp_id) {
            Some(entry) => {
                entry.state = DeliveryState::Sent;
                entry.message = Some(message.clone());
                entry.error = None;
                true
            }
            None => false,
        }
    }

    pub fn on_error(&mut self, client_temp_id: &str, error: ErrorPayload) -> bool {
        match self.find_mut(client_temp_id) {
            Some(entry) if entry.state == DeliveryState::Pending => {
                entry.state = DeliveryState::Failed;
                entry.error = Some(error);
                true
            }
            _ => false,
        }
    }

    /// Fail entries whose ack is overdue. Returns their temp ids.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.ack_timeout;
        self.entries
            .iter_mut()
            .filter(|e| {
                e.state == DeliveryState::Pending
                    && now.saturating_duration_since(e.queued_at) >= timeout
            })
            .map(|e| {
                e.state = DeliveryState::Failed;
                e.client_temp_id.clone()
            })
            .collect()
    }

    /// The connection dropped, so no ack can arrive for anything in flight.
    pub fn fail_pending(&mut self) -> Vec<String> {
        self.entries
            .iter_mut()
            .filter(|e| e.state == DeliveryState::Pending)
            .map(|e| {
                e.state = DeliveryState::Failed;
                e.client_temp_id.clone()
            })
            .collect()
    }

    /// Replace a Failed entry with a fresh Pending one under a new temp id.
    pub fn resend(&mut self, client_temp_id: &str, now: Instant) -> Option<(String, ClientEvent)> {
        let index = self.entries.iter().position(|e| {
            e.client_temp_id == client_temp_id && e.state == DeliveryState::Failed
        })?;
        let failed = self.entries.remove(index);
        Some(self.queue(failed.conversation_id, failed.receiver, failed.body, now))
    }

    /// Drop a Failed entry the user gave up on.
    pub fn discard(&mut self, client_temp_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.client_temp_id == client_temp_id && e.state == DeliveryState::Failed));
        self.entries.len() != before
    }

    /// Remove acknowledged entries now represented by their server message.
    pub fn take_sent(&mut self) -> Vec<Message> {
        let mut sent = Vec::new();
        self.entries.retain_mut(|e| {
            if e.state == DeliveryState::Sent {
                if let Some(message) = e.message.take() {
                    sent.push(message);
                }
                false
            } else {
                true
            }
        });
        sent
    }

    pub fn get(&self, client_temp_id: &str) -> Option<&OutgoingMessage> {
        self.entries.iter().find(|e| e.client_temp_id == client_temp_id)
    }

    /// Unacknowledged entries of a conversation in send order.
    pub fn unsent(&self, conversation_id: Uuid) -> impl Iterator<Item = &OutgoingMessage> {
        self.entries.iter().filter(move |e| {
            e.conversation_id == conversation_id && e.state != DeliveryState::Sent
        })
    }

    fn find_mut(&mut self, client_temp_id: &str) -> Option<&mut OutgoingMessage> {
        self.entries
            .iter_mut()
            .find(|e| e.client_temp_id == client_temp_id)
    }
}

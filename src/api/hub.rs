//! Connection registry and broadcast groups.
//!
//! Rooms are plain group memberships: losing them on disconnect loses no data.
//! Delivery is fire-and-forget; a connection whose queue is full misses the
//! event and catches up on its next poll.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{
    models::{Message, Participant, Role, ServerEvent},
    storage::redis::{RedisClient, ROOM_CHANNEL_PREFIX},
};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// Cross-conversation events for one participant (badges, notifications).
    Personal(Participant),
    /// In-chat events for everyone currently viewing a conversation.
    Conversation(Uuid),
}

impl Room {
    pub fn key(&self) -> String {
        match self {
            Room::Personal(participant) => format!("user:{}:{}", participant.role(), participant.id()),
            Room::Conversation(id) => format!("conversation:{}", id),
        }
    }

    pub fn parse(key: &str) -> Option<Room> {
        let mut parts = key.split(':');
        match (parts.next()?, parts.next()?, parts.next()) {
            ("conversation", id, None) => Uuid::parse_str(id).ok().map(Room::Conversation),
            ("user", role, Some(id)) => {
                let role = match role {
                    "customer" => Role::Customer,
                    "business" => Role::Business,
                    _ => return None,
                };
                let id = Uuid::parse_str(id).ok()?;
                Some(Room::Personal(Participant::new(id, role)))
            }
            _ => None,
        }
    }
}

/// Wire form of a broadcast relayed between instances. One envelope carries
/// every target room so remote members get a single copy.
#[derive(Debug, Serialize, Deserialize)]
struct RoomEnvelope {
    origin: Uuid,
    rooms: Vec<String>,
    event: ServerEvent,
}

pub struct WsHub {
    instance_id: Uuid,
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
    rooms: RwLock<HashMap<Room, HashSet<ConnectionId>>>,
    redis: Option<RedisClient>,
}

impl WsHub {
    pub fn new(redis: Option<RedisClient>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            redis,
        }
    }

    /// Relays room broadcasts published by other instances to local members.
    /// Returns immediately when running without redis.
    pub async fn run(&self) {
        let Some(redis) = self.redis.clone() else {
            return;
        };

        loop {
            match redis.subscribe_rooms().await {
                Ok(mut pubsub) => {
                    tracing::info!("Subscribed to room relay channels");
                    let mut messages = pubsub.on_message();
                    while let Some(msg) = messages.next().await {
                        let Ok(payload) = msg.get_payload::<String>() else {
                            continue;
                        };
                        self.relay(&payload).await;
                    }
                    tracing::warn!("Room relay subscription ended, resubscribing");
                }
                Err(e) => tracing::error!("Room relay subscription failed: {}", e),
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Delivers an envelope published by another instance to local members.
    async fn relay(&self, payload: &str) {
        match serde_json::from_str::<RoomEnvelope>(payload) {
            Ok(envelope) if envelope.origin != self.instance_id => {
                let rooms: Vec<Room> = envelope.rooms.iter().filter_map(|key| Room::parse(key)).collect();
                self.deliver_local(&rooms, &envelope.event, None).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Malformed room envelope: {}", e),
        }
    }

    pub async fn register(&self, connection_id: ConnectionId, sender: mpsc::Sender<ServerEvent>) {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, sender);
        tracing::info!("Connection registered: {}", connection_id);
    }

    /// Drops the connection and all of its room memberships.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        self.connections.write().await.remove(&connection_id);

        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
        tracing::info!("Connection unregistered: {}", connection_id);
    }

    pub async fn join(&self, connection_id: ConnectionId, room: Room) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room).or_default().insert(connection_id);
        tracing::debug!(%connection_id, room = %room.key(), "Joined room");
    }

    pub async fn leave(&self, connection_id: ConnectionId, room: Room) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&room) {
            members.remove(&connection_id);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
        tracing::debug!(%connection_id, room = %room.key(), "Left room");
    }

    pub async fn is_member(&self, connection_id: ConnectionId, room: Room) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(&room)
            .map(|members| members.contains(&connection_id))
            .unwrap_or(false)
    }

    /// Number of local connections in `room`.
    pub async fn room_size(&self, room: Room) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(&room).map(HashSet::len).unwrap_or(0)
    }

    /// Sends `event` once to every connection in any of `rooms`, except `except`,
    /// and relays it to the other instances.
    pub async fn broadcast(&self, rooms: &[Room], event: ServerEvent, except: Option<ConnectionId>) {
        self.deliver_local(rooms, &event, except).await;

        let Some(redis) = self.redis.clone() else {
            return;
        };
        let Some(channel) = rooms.first().map(Room::key) else {
            return;
        };
        let envelope = RoomEnvelope {
            origin: self.instance_id,
            rooms: rooms.iter().map(Room::key).collect(),
            event,
        };
        tokio::spawn(async move {
            let published = match serde_json::to_string(&envelope) {
                Ok(payload) => redis.publish_room_event(&channel, &payload).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = published {
                tracing::warn!(room = %channel, "Room relay publish failed: {}", e);
            }
        });
    }

    async fn deliver_local(&self, rooms: &[Room], event: &ServerEvent, except: Option<ConnectionId>) {
        let targets: HashSet<ConnectionId> = {
            let members = self.rooms.read().await;
            rooms
                .iter()
                .filter_map(|room| members.get(room))
                .flatten()
                .copied()
                .filter(|id| Some(*id) != except)
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let connections = self.connections.read().await;
        for connection_id in targets {
            if let Some(sender) = connections.get(&connection_id) {
                Self::try_deliver(connection_id, sender, event.clone());
            }
        }
    }

    fn try_deliver(connection_id: ConnectionId, sender: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
        match sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(%connection_id, "Outbound queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Fans a persisted message out: the full message to the conversation room
    /// and a badge notification to the receiver's personal room.
    pub async fn deliver_message(&self, message: &Message, origin: Option<ConnectionId>) {
        self.broadcast(
            &[Room::Conversation(message.conversation_id)],
            ServerEvent::ReceiveMessage(message.clone()),
            origin,
        )
        .await;

        self.broadcast(
            &[Room::Personal(message.receiver)],
            ServerEvent::NewMessageNotification {
                conversation_id: message.conversation_id,
                seq: message.seq,
                sender: message.sender,
            },
            None,
        )
        .await;
    }

    /// Read receipts reach the other side's chat view and the reader's own
    /// tabs and devices.
    pub async fn publish_read_receipt(&self, conversation_id: Uuid, reader: Participant, through_seq: i64) {
        self.broadcast(
            &[Room::Conversation(conversation_id), Room::Personal(reader)],
            ServerEvent::MessagesRead {
                conversation_id,
                read_by: reader,
                through_seq,
            },
            None,
        )
        .await;
    }

    pub async fn publish_typing(
        &self,
        conversation_id: Uuid,
        user: Participant,
        is_typing: bool,
        origin: Option<ConnectionId>,
    ) {
        let event = if is_typing {
            ServerEvent::Typing {
                conversation_id,
                user,
            }
        } else {
            ServerEvent::StopTyping {
                conversation_id,
                user,
            }
        };
        self.broadcast(&[Room::Conversation(conversation_id)], event, origin)
            .await;
    }
}

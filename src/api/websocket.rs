use std::collections::{HashMap, VecDeque};

use axum::{
    extract::{
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    hub::{ConnectionId, Room},
    middleware::get_participant,
};
use crate::{
    error::{AppError, AppResult},
    models::{ClientEvent, Message, Participant, ServerEvent},
    services::auth::Claims,
    AppState,
};

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Response> {
    let participant = get_participant(&claims)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, participant)))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Participant) {
    let connection_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound queue for this connection
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.messaging.ws_channel_capacity);
    state.ws_hub.register(connection_id, tx.clone()).await;
    set_presence(&state, identity, "online").await;

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(WsFrame::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode outbound event: {}", e),
            }
        }
    });

    let mut connection = Connection::new(connection_id, identity, tx, state.clone());
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(WsFrame::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => connection.handle(event).await,
                    Err(e) => {
                        tracing::warn!(%connection_id, "Unparseable client frame: {}", e);
                        connection
                            .reply(ServerEvent::OperationError {
                                operation: "unknown".to_string(),
                                conversation_id: None,
                                error: AppError::InvalidArgument(e.to_string()).payload(),
                            })
                            .await;
                    }
                },
                // Pong is handled automatically by axum
                Ok(WsFrame::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Cleanup
    state.ws_hub.unregister(connection_id).await;
    set_presence(&state, identity, "offline").await;
}

async fn set_presence(state: &AppState, participant: Participant, status: &str) {
    if let Some(redis) = &state.redis {
        let key = format!("{}:{}", participant.role(), participant.id());
        if let Err(e) = redis
            .set_presence(&key, status, state.config.messaging.presence_ttl)
            .await
        {
            tracing::warn!(%participant, "Failed to record presence: {}", e);
        }
    }
}

/// Acks of recently sent messages keyed by `clientTempId`, so a retried send on
/// the same connection is answered without appending a second copy.
struct SentCache {
    capacity: usize,
    order: VecDeque<String>,
    acks: HashMap<String, Message>,
}

impl SentCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            acks: HashMap::new(),
        }
    }

    fn get(&self, client_temp_id: &str) -> Option<&Message> {
        self.acks.get(client_temp_id)
    }

    fn insert(&mut self, client_temp_id: String, message: Message) {
        if self.acks.insert(client_temp_id.clone(), message).is_none() {
            self.order.push_back(client_temp_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.acks.remove(&oldest);
            }
        }
    }
}

/// Per-connection protocol state. Inbound events of one connection are
/// handled one at a time.
struct Connection {
    id: ConnectionId,
    identity: Participant,
    authenticated: bool,
    outbound: mpsc::Sender<ServerEvent>,
    sent: SentCache,
    state: AppState,
}

impl Connection {
    fn new(id: ConnectionId, identity: Participant, outbound: mpsc::Sender<ServerEvent>, state: AppState) -> Self {
        let sent = SentCache::new(state.config.messaging.sent_cache_size);
        Self {
            id,
            identity,
            authenticated: false,
            outbound,
            sent,
            state,
        }
    }

    async fn reply(&self, event: ServerEvent) {
        // The socket is gone if this fails; the receive loop ends on its own.
        let _ = self.outbound.send(event).await;
    }

    async fn reject(&self, operation: &str, conversation_id: Option<Uuid>, error: AppError) {
        tracing::debug!(connection_id = %self.id, operation, "Operation rejected: {}", error);
        self.reply(ServerEvent::OperationError {
            operation: operation.to_string(),
            conversation_id,
            error: error.payload(),
        })
        .await;
    }

    async fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Ping => self.reply(ServerEvent::Pong).await,
            ClientEvent::JoinUserRoom { user_id, role } => {
                let claimed = Participant::new(user_id, role);
                if claimed != self.identity {
                    self.reject("joinUserRoom", None, AppError::NotParticipant).await;
                    return;
                }
                self.state
                    .ws_hub
                    .join(self.id, Room::Personal(self.identity))
                    .await;
                self.authenticated = true;
                self.reply(ServerEvent::UserRoomJoined {
                    participant: self.identity,
                })
                .await;
            }
            ClientEvent::SendMessage { client_temp_id, .. } if !self.authenticated => {
                self.reply(ServerEvent::MessageError {
                    client_temp_id,
                    error: AppError::Unauthorized.payload(),
                })
                .await;
            }
            event if !self.authenticated => self.reject(event.name(), None, AppError::Unauthorized).await,
            ClientEvent::JoinConversation { conversation_id } => {
                self.join_conversation(conversation_id).await
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.state
                    .ws_hub
                    .leave(self.id, Room::Conversation(conversation_id))
                    .await;
            }
            ClientEvent::SendMessage {
                conversation_id,
                sender_id,
                sender_role,
                receiver_id,
                receiver_role,
                body,
                client_temp_id,
            } => {
                let sender = Participant::new(sender_id, sender_role);
                let receiver = Participant::new(receiver_id, receiver_role);
                self.send_message(conversation_id, sender, receiver, body, client_temp_id)
                    .await;
            }
            ClientEvent::Typing {
                conversation_id,
                user_id,
            } => self.typing(conversation_id, user_id, true).await,
            ClientEvent::StopTyping {
                conversation_id,
                user_id,
            } => self.typing(conversation_id, user_id, false).await,
            ClientEvent::MarkMessagesRead {
                conversation_id,
                user_id,
                through_seq,
            } => self.mark_read(conversation_id, user_id, through_seq).await,
        }
    }

    async fn join_conversation(&self, conversation_id: Uuid) {
        let messaging = self.state.messaging();
        match messaging.get_summary(conversation_id, self.identity).await {
            Ok(summary) => {
                self.state
                    .ws_hub
                    .join(self.id, Room::Conversation(conversation_id))
                    .await;
                self.reply(ServerEvent::ConversationJoined {
                    conversation_id,
                    highest_seq: summary.highest_seq,
                    read_through_seq: summary.read_through_seq,
                })
                .await;
            }
            Err(e) => self.reject("joinConversation", Some(conversation_id), e).await,
        }
    }

    async fn send_message(
        &mut self,
        conversation_id: Uuid,
        sender: Participant,
        receiver: Participant,
        body: String,
        client_temp_id: String,
    ) {
        if let Some(message) = self.sent.get(&client_temp_id) {
            tracing::debug!(connection_id = %self.id, %client_temp_id, "Re-acknowledging retried send");
            let message = message.clone();
            self.reply(ServerEvent::MessageSent {
                client_temp_id,
                message,
            })
            .await;
            return;
        }

        if sender != self.identity {
            self.reply(ServerEvent::MessageError {
                client_temp_id,
                error: AppError::NotParticipant.payload(),
            })
            .await;
            return;
        }

        let messaging = self.state.messaging();
        match messaging
            .send_message(conversation_id, sender, receiver, body)
            .await
        {
            Ok(message) => {
                self.sent.insert(client_temp_id.clone(), message.clone());
                self.reply(ServerEvent::MessageSent {
                    client_temp_id,
                    message: message.clone(),
                })
                .await;
                self.state.ws_hub.deliver_message(&message, Some(self.id)).await;
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.id, %conversation_id, "Send failed: {}", e);
                self.reply(ServerEvent::MessageError {
                    client_temp_id,
                    error: e.payload(),
                })
                .await;
            }
        }
    }

    async fn typing(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) {
        let room = Room::Conversation(conversation_id);
        if user_id != self.identity.id() || !self.state.ws_hub.is_member(self.id, room).await {
            tracing::debug!(connection_id = %self.id, %conversation_id, "Ignoring typing signal");
            return;
        }
        self.state
            .ws_hub
            .publish_typing(conversation_id, self.identity, is_typing, Some(self.id))
            .await;
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, through_seq: i64) {
        if user_id != self.identity.id() {
            self.reject("markMessagesRead", Some(conversation_id), AppError::NotParticipant).await;
            return;
        }

        let messaging = self.state.messaging();
        match messaging
            .mark_read(conversation_id, self.identity, through_seq)
            .await
        {
            Ok(advance) => {
                self.state
                    .ws_hub
                    .publish_read_receipt(conversation_id, self.identity, advance.read_through_seq)
                    .await;
            }
            Err(e) => self.reject("markMessagesRead", Some(conversation_id), e).await,
        }
    }
}

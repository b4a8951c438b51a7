//! Frames exchanged over the duplex channel.
//!
//! Every frame is `{"type": <event>, "payload": {...}}` with camelCase names.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Message, Participant, Role};
use crate::error::ErrorPayload;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinUserRoom {
        user_id: Uuid,
        role: Role,
    },
    JoinConversation {
        conversation_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_role: Role,
        receiver_id: Uuid,
        receiver_role: Role,
        body: String,
        client_temp_id: String,
    },
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    StopTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    MarkMessagesRead {
        conversation_id: Uuid,
        user_id: Uuid,
        through_seq: i64,
    },
    Ping,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinUserRoom { .. } => "joinUserRoom",
            ClientEvent::JoinConversation { .. } => "joinConversation",
            ClientEvent::LeaveConversation { .. } => "leaveConversation",
            ClientEvent::SendMessage { .. } => "sendMessage",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stopTyping",
            ClientEvent::MarkMessagesRead { .. } => "markMessagesRead",
            ClientEvent::Ping => "ping",
        }
    }

    pub fn join_user_room(participant: Participant) -> Self {
        ClientEvent::JoinUserRoom {
            user_id: participant.id(),
            role: participant.role(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    UserRoomJoined {
        participant: Participant,
    },
    ConversationJoined {
        conversation_id: Uuid,
        highest_seq: i64,
        read_through_seq: i64,
    },
    MessageSent {
        client_temp_id: String,
        message: Message,
    },
    MessageError {
        client_temp_id: String,
        error: ErrorPayload,
    },
    ReceiveMessage(Message),
    Typing {
        conversation_id: Uuid,
        user: Participant,
    },
    StopTyping {
        conversation_id: Uuid,
        user: Participant,
    },
    MessagesRead {
        conversation_id: Uuid,
        read_by: Participant,
        through_seq: i64,
    },
    NewMessageNotification {
        conversation_id: Uuid,
        seq: i64,
        sender: Participant,
    },
    OperationError {
        operation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Uuid>,
        error: ErrorPayload,
    },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_send_message_frame() {
        let conversation_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let frame = json!({
            "type": "sendMessage",
            "payload": {
                "conversationId": conversation_id,
                "senderId": sender,
                "senderRole": "customer",
                "receiverId": receiver,
                "receiverRole": "business",
                "body": "Is the sourdough still available?",
                "clientTempId": "t1"
            }
        });

        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage {
                conversation_id,
                sender_id: sender,
                sender_role: Role::Customer,
                receiver_id: receiver,
                receiver_role: Role::Business,
                body: "Is the sourdough still available?".into(),
                client_temp_id: "t1".into(),
            }
        );
    }

    #[test]
    fn ping_has_no_payload() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(event, ClientEvent::Ping);
        assert_eq!(event.name(), "ping");
    }

    #[test]
    fn read_receipt_uses_camel_case_keys() {
        let conversation_id = Uuid::new_v4();
        let reader = Participant::Customer(Uuid::new_v4());
        let value = serde_json::to_value(ServerEvent::MessagesRead {
            conversation_id,
            read_by: reader,
            through_seq: 7,
        })
        .unwrap();

        assert_eq!(value["type"], "messagesRead");
        assert_eq!(value["payload"]["throughSeq"], 7);
        assert_eq!(value["payload"]["readBy"]["role"], "customer");
    }

    #[test]
    fn typing_names_the_participant_with_role() {
        let conversation_id = Uuid::new_v4();
        let typist = Participant::Business(Uuid::new_v4());
        let value = serde_json::to_value(ServerEvent::Typing {
            conversation_id,
            user: typist,
        })
        .unwrap();

        assert_eq!(value["type"], "typing");
        assert_eq!(value["payload"]["conversationId"], json!(conversation_id));
        assert_eq!(value["payload"]["user"], json!({ "role": "business", "id": typist.id() }));

        let inbound: ClientEvent = serde_json::from_value(json!({
            "type": "stopTyping",
            "payload": { "conversationId": conversation_id, "userId": typist.id() }
        }))
        .unwrap();
        assert_eq!(
            inbound,
            ClientEvent::StopTyping {
                conversation_id,
                user_id: typist.id(),
            }
        );
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"editMessage","payload":{}}"#).is_err());
    }
}

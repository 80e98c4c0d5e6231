use serde::{Deserialize, Serialize};

use crate::models::{Attachment, Message, MessageType};

/// Events sent over the WebSocket from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Server confirms the session is live
    Connected { message: String, username: String },

    /// Sender-side confirmation carrying the stored id and timestamp
    MessageSent(Message),

    /// Delivery of a message to its online receiver
    NewMessage(Message),

    UserTyping { sender: String, receiver: String },

    UserStopTyping { sender: String, receiver: String },

    JoinedChat { room: String, friend: String },

    LeftChat { room: String, friend: String },

    /// A per-event failure, reported to the originating connection only
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::MessageSent(_) => "message_sent",
            Self::NewMessage(_) => "new_message",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStopTyping { .. } => "user_stop_typing",
            Self::JoinedChat { .. } => "joined_chat",
            Self::LeftChat { .. } => "left_chat",
            Self::Error { .. } => "error",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
    StopTyping(TypingPayload),
    JoinChat(ChatPayload),
    LeaveChat(ChatPayload),
}

/// Every field is optional here; presence rules are enforced by the router so
/// that a missing field is a validation failure rather than a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver: Option<String>,
    pub message: Option<String>,
    pub message_type: Option<MessageType>,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_size: Option<u64>,
}

impl SendMessagePayload {
    pub fn text(receiver: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            receiver: Some(receiver.into()),
            message: Some(body.into()),
            ..Default::default()
        }
    }

    /// The attachment, if `attachmentUrl` carries a non-blank value.
    pub fn attachment(&self) -> Option<Attachment> {
        let url = self.attachment_url.as_deref().map(str::trim)?;
        if url.is_empty() {
            return None;
        }
        Some(Attachment {
            url: url.to_string(),
            name: self.attachment_name.clone(),
            size_bytes: self.attachment_size,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingPayload {
    pub receiver: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatPayload {
    pub friend_username: Option<String>,
}

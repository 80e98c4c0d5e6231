use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum body length of a message, counted in characters after trimming.
pub const MAX_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// A file or image reference attached to a message. The bytes live elsewhere
/// (a CDN upload); the relay only carries the pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "attachmentUrl")]
    pub url: String,
    #[serde(rename = "attachmentName", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "attachmentSize", default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// A persisted direct message. Only `read` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub receiver: String,
    pub message: String,
    pub message_type: MessageType,
    #[serde(flatten)]
    pub attachment: Option<Attachment>,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// A validated message that has not been persisted yet. The store assigns the
/// id, and the timestamp when none is given.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender: String,
    pub receiver: String,
    pub message: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn text(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            message: body.into(),
            message_type: MessageType::Text,
            attachment: None,
            timestamp: None,
        }
    }
}

use thiserror::Error;

use duet_db::StoreError;

pub const MSG_SEND_REQUIRED: &str = "Receiver and message are required";
pub const MSG_TOO_LONG: &str = "Message cannot exceed 1000 characters";
pub const MSG_FRIEND_REQUIRED: &str = "Friend username is required";
pub const MSG_SEND_NOT_FRIENDS: &str = "You can only send messages to friends";
pub const MSG_JOIN_NOT_FRIENDS: &str = "You can only chat with friends";
pub const MSG_INVALID_PAYLOAD: &str = "Invalid event payload";

/// Per-event failures. None of these end the connection; each is reported to
/// the originating connection and otherwise dropped.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authorization(String),

    #[error("Failed to send message")]
    Store(#[from] StoreError),

    /// Authentication failed at connect; no session exists.
    #[error("Authentication error: {0}")]
    Connection(String),
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authorization(_) => "authorization",
            Self::Store(_) => "store",
            Self::Connection(_) => "connection",
        }
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, warn};
use uuid::Uuid;

use duet_types::models::{Attachment, Message, MessageType, NewMessage};

use crate::Database;
use crate::models::MessageRow;

/// Largest page a conversation query will return.
pub const MAX_PAGE_SIZE: u32 = 200;

// Write ticket states. Whoever moves the ticket out of PENDING first decides
// whether the insert happens.
const PENDING: u8 = 0;
const CLAIMED: u8 = 1;
const ABANDONED: u8 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),

    #[error("message store timed out")]
    Timeout,

    #[error("corrupt message row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Persistence for direct messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id (and timestamp if absent).
    ///
    /// Gives up after `timeout` with `StoreError::Timeout`. A timed-out create
    /// has not written anything and never will.
    async fn create(&self, message: NewMessage, timeout: Duration) -> Result<Message, StoreError>;

    /// One page of the conversation between two users, oldest to newest.
    /// `page` is 1-based; page 1 holds the most recent messages.
    async fn query_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// Mark every unread message from `sender` to `receiver` as read.
    async fn mark_read(&self, sender: &str, receiver: &str) -> Result<u64, StoreError>;

    async fn count_unread(&self, receiver: &str) -> Result<u64, StoreError>;
}

/// `MessageStore` over the SQLite `Database`. Every call runs on the blocking
/// pool so the async runtime never waits on SQLite.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: Arc<Database>,
}

impl SqliteMessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn run<F, T>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        settle(op, tokio::task::spawn_blocking(move || f(&db)).await)
    }
}

fn settle<T>(
    op: &'static str,
    joined: Result<anyhow::Result<T>, JoinError>,
) -> Result<T, StoreError> {
    joined
        .map_err(|e| {
            error!("spawn_blocking join error in {}: {}", op, e);
            StoreError::Unavailable(e.to_string())
        })?
        .map_err(|e| {
            error!("DB {} error: {}", op, e);
            StoreError::Unavailable(e.to_string())
        })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create(&self, new: NewMessage, timeout: Duration) -> Result<Message, StoreError> {
        let message = Message {
            id: Uuid::new_v4(),
            sender: new.sender,
            receiver: new.receiver,
            message: new.message,
            message_type: new.message_type,
            attachment: new.attachment,
            // Truncated to the precision the row keeps
            timestamp: new.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(6),
            read: false,
        };

        let row = to_row(&message);
        let ticket = Arc::new(AtomicU8::new(PENDING));
        let claim = ticket.clone();
        let db = self.db.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            db.insert_message_if(&row, || {
                claim
                    .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
        });

        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                if ticket
                    .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    warn!("Insert of {} abandoned after {:?}", message.id, timeout);
                    return Err(StoreError::Timeout);
                }
                // The insert already holds the connection; wait for its outcome
                task.await
            }
        };

        if settle("insert_message", joined)? {
            Ok(message)
        } else {
            Err(StoreError::Timeout)
        }
    }

    async fn query_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(page.max(1) - 1) * u64::from(limit);
        let (a, b) = (user_a.to_string(), user_b.to_string());

        let rows = self
            .run("get_conversation", move |db| db.get_conversation(&a, &b, limit, offset))
            .await?;

        // Rows arrive newest first; history is presented oldest first.
        rows.into_iter().rev().map(from_row).collect()
    }

    async fn mark_read(&self, sender: &str, receiver: &str) -> Result<u64, StoreError> {
        let (s, r) = (sender.to_string(), receiver.to_string());
        let changed = self.run("mark_read", move |db| db.mark_read(&s, &r)).await?;
        Ok(changed as u64)
    }

    async fn count_unread(&self, receiver: &str) -> Result<u64, StoreError> {
        let r = receiver.to_string();
        self.run("count_unread", move |db| db.count_unread(&r)).await
    }
}

fn to_row(message: &Message) -> MessageRow {
    let attachment = message.attachment.as_ref();
    MessageRow {
        id: message.id.to_string(),
        sender: message.sender.clone(),
        receiver: message.receiver.clone(),
        body: message.message.clone(),
        message_type: message.message_type.as_str().to_string(),
        attachment_url: attachment.map(|a| a.url.clone()),
        attachment_name: attachment.and_then(|a| a.name.clone()),
        attachment_size: attachment
            .and_then(|a| a.size_bytes)
            .map(|s| i64::try_from(s).unwrap_or(i64::MAX)),
        timestamp: message.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        read: message.read,
    }
}

fn from_row(row: MessageRow) -> Result<Message, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: row.id.clone(),
        reason,
    };

    let id: Uuid = row.id.parse().map_err(|e| corrupt(format!("id: {e}")))?;
    let message_type = MessageType::parse(&row.message_type)
        .ok_or_else(|| corrupt(format!("message_type '{}'", row.message_type)))?;
    let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("timestamp: {e}")))?;

    let attachment_size = row.attachment_size.and_then(|s| {
        u64::try_from(s)
            .inspect_err(|_| warn!("Negative attachment_size {} on message {}", s, row.id))
            .ok()
    });

    Ok(Message {
        id,
        sender: row.sender,
        receiver: row.receiver,
        message: row.body,
        message_type,
        attachment: row.attachment_url.map(|url| Attachment {
            url,
            name: row.attachment_name,
            size_bytes: attachment_size,
        }),
        timestamp,
        read: row.read,
    })
}

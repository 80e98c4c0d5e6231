use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use duet_types::events::ServerEvent;

/// Items queued for a connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Ask the writer to close the socket (the session was superseded).
    Close,
}

/// Opaque, comparable reference to one live connection. Two handles are equal
/// iff they refer to the same connection; cloning does not create a new one.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its writer drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Queue an event. Returns false if the connection is already gone.
    pub fn emit(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// The live binding of an identity to its one active connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub handle: ConnectionHandle,
    pub token: String,
    pub connected_at: DateTime<Utc>,
}

/// Process-wide presence: identity -> active session.
///
/// Backed by a sharded map, so operations on one identity are atomic and
/// unrelated identities do not contend on a single lock.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `handle`, replacing any existing session. Returns the
    /// superseded handle so the caller can close it. Last registration wins.
    pub fn register(
        &self,
        identity: &str,
        handle: ConnectionHandle,
        token: impl Into<String>,
    ) -> Option<ConnectionHandle> {
        let session = Session {
            handle,
            token: token.into(),
            connected_at: Utc::now(),
        };
        self.sessions
            .insert(identity.to_string(), session)
            .map(|previous| previous.handle)
    }

    /// Remove the session for `identity`, but only if it still belongs to
    /// `handle`. A disconnect from a superseded connection is a no-op.
    /// Returns true if a session was removed.
    pub fn unregister(&self, identity: &str, handle: &ConnectionHandle) -> bool {
        self.sessions
            .remove_if(identity, |_, session| session.handle == *handle)
            .is_some()
    }

    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.sessions.get(identity).map(|s| s.handle.clone())
    }

    /// Token the identity connected with. Kept for callers that need the
    /// recipient's credential; the routing path uses the caller's own token.
    pub fn token(&self, identity: &str) -> Option<String> {
        self.sessions.get(identity).map(|s| s.token.clone())
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Snapshot of the identities online right now.
    pub fn list_online(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }
}

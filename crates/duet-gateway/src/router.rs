use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use duet_db::MessageStore;
use duet_types::events::{
    ChatPayload, ClientCommand, SendMessagePayload, ServerEvent, TypingPayload,
};
use duet_types::models::{MAX_MESSAGE_CHARS, Message, NewMessage};

use crate::authz::AuthorizationGateway;
use crate::error::{
    MSG_FRIEND_REQUIRED, MSG_JOIN_NOT_FRIENDS, MSG_SEND_NOT_FRIENDS, MSG_SEND_REQUIRED,
    MSG_TOO_LONG, RelayError,
};
use crate::registry::{ConnectionHandle, SessionRegistry};
use crate::room::room_id;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Who is acting: the authenticated identity, the token it connected with and
/// the connection its replies go to.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub identity: String,
    pub token: String,
    pub handle: ConnectionHandle,
}

impl ConnectionContext {
    pub fn new(
        identity: impl Into<String>,
        token: impl Into<String>,
        handle: ConnectionHandle,
    ) -> Self {
        Self {
            identity: identity.into(),
            token: token.into(),
            handle,
        }
    }

    fn reply(&self, event: ServerEvent) {
        if !self.handle.emit(event) {
            debug!("{} is gone, reply dropped", self.identity);
        }
    }
}

/// Handles inbound events for every connection: registers sessions, checks
/// friendship, persists messages and relays events to at most one connection
/// per recipient.
#[derive(Clone)]
pub struct RoutingEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: SessionRegistry,
    authz: AuthorizationGateway,
    store: Arc<dyn MessageStore>,
    store_timeout: Duration,
}

impl RoutingEngine {
    pub fn new(
        registry: SessionRegistry,
        authz: AuthorizationGateway,
        store: Arc<dyn MessageStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                authz,
                store,
                store_timeout,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Register a freshly authenticated connection and confirm it. Returns the
    /// handle this one superseded, which the transport should close.
    pub fn connect(&self, ctx: &ConnectionContext) -> Option<ConnectionHandle> {
        let previous = self
            .inner
            .registry
            .register(&ctx.identity, ctx.handle.clone(), ctx.token.clone());

        if previous.is_some() {
            info!("{} reconnected, superseding previous connection", ctx.identity);
        } else {
            info!("{} connected", ctx.identity);
        }

        ctx.reply(ServerEvent::Connected {
            message: "Connected to chat service".into(),
            username: ctx.identity.clone(),
        });
        previous
    }

    /// Drop the session, unless a newer connection already replaced it.
    pub fn disconnect(&self, ctx: &ConnectionContext) {
        if self.inner.registry.unregister(&ctx.identity, &ctx.handle) {
            info!("{} disconnected", ctx.identity);
        } else {
            debug!("{} stale connection closed, session kept", ctx.identity);
        }
    }

    /// Route one decoded command. Failures are reported to the caller.
    pub async fn dispatch(&self, ctx: &ConnectionContext, cmd: ClientCommand) {
        match cmd {
            ClientCommand::SendMessage(payload) => {
                let _ = self.send_message(ctx, payload).await;
            }
            ClientCommand::Typing(payload) => self.typing(ctx, payload),
            ClientCommand::StopTyping(payload) => self.stop_typing(ctx, payload),
            ClientCommand::JoinChat(payload) => {
                let _ = self.join_chat(ctx, payload).await;
            }
            ClientCommand::LeaveChat(payload) => self.leave_chat(ctx, payload),
        }
    }

    /// Validate, authorize, persist, confirm to the sender, then deliver to the
    /// receiver if online. On failure the sender gets an `error` event and
    /// nothing is persisted or delivered.
    pub async fn send_message(
        &self,
        ctx: &ConnectionContext,
        payload: SendMessagePayload,
    ) -> Result<Message, RelayError> {
        let result = self.try_send_message(ctx, payload).await;
        if let Err(e) = &result {
            warn!("{} send_message rejected ({}): {}", ctx.identity, e.kind(), e);
            ctx.reply(ServerEvent::error(e.to_string()));
        }
        result
    }

    async fn try_send_message(
        &self,
        ctx: &ConnectionContext,
        payload: SendMessagePayload,
    ) -> Result<Message, RelayError> {
        let draft = validate_send(&ctx.identity, payload)?;

        if !self
            .inner
            .authz
            .verify_friendship(&ctx.identity, &draft.receiver, &ctx.token)
            .await
        {
            return Err(RelayError::authorization(MSG_SEND_NOT_FRIENDS));
        }

        let message = self
            .inner
            .store
            .create(draft, self.inner.store_timeout)
            .await?;

        ctx.reply(ServerEvent::MessageSent(message.clone()));

        match self.inner.registry.lookup(&message.receiver) {
            Some(handle) => {
                if !handle.emit(ServerEvent::NewMessage(message.clone())) {
                    debug!("{} went away before delivery of {}", message.receiver, message.id);
                }
            }
            None => debug!("{} offline, {} kept for history", message.receiver, message.id),
        }

        info!("Message {} sent from {} to {}", message.id, message.sender, message.receiver);
        Ok(message)
    }

    /// Relay a typing signal. No friendship check and nothing stored; dropped
    /// silently when the receiver is missing or offline.
    pub fn typing(&self, ctx: &ConnectionContext, payload: TypingPayload) {
        self.relay_typing(ctx, payload, true);
    }

    pub fn stop_typing(&self, ctx: &ConnectionContext, payload: TypingPayload) {
        self.relay_typing(ctx, payload, false);
    }

    fn relay_typing(&self, ctx: &ConnectionContext, payload: TypingPayload, started: bool) {
        let Some(receiver) = present(payload.receiver) else {
            return;
        };
        let Some(handle) = self.inner.registry.lookup(&receiver) else {
            return;
        };

        let sender = ctx.identity.clone();
        let event = if started {
            ServerEvent::UserTyping { sender, receiver }
        } else {
            ServerEvent::UserStopTyping { sender, receiver }
        };
        handle.emit(event);
    }

    /// Acknowledge opening a conversation with a friend. Rooms are
    /// acknowledgment only and do not affect delivery.
    pub async fn join_chat(
        &self,
        ctx: &ConnectionContext,
        payload: ChatPayload,
    ) -> Result<String, RelayError> {
        let result = self.try_join_chat(ctx, payload).await;
        match &result {
            Ok(room) => info!("{} joined {}", ctx.identity, room),
            Err(e) => {
                warn!("{} join_chat rejected ({}): {}", ctx.identity, e.kind(), e);
                ctx.reply(ServerEvent::error(e.to_string()));
            }
        }
        result
    }

    async fn try_join_chat(
        &self,
        ctx: &ConnectionContext,
        payload: ChatPayload,
    ) -> Result<String, RelayError> {
        let friend = present(payload.friend_username)
            .ok_or_else(|| RelayError::validation(MSG_FRIEND_REQUIRED))?;

        if !self
            .inner
            .authz
            .verify_friendship(&ctx.identity, &friend, &ctx.token)
            .await
        {
            return Err(RelayError::authorization(MSG_JOIN_NOT_FRIENDS));
        }

        let room = room_id(&ctx.identity, &friend);
        ctx.reply(ServerEvent::JoinedChat {
            room: room.clone(),
            friend,
        });
        Ok(room)
    }

    pub fn leave_chat(&self, ctx: &ConnectionContext, payload: ChatPayload) {
        let Some(friend) = present(payload.friend_username) else {
            return;
        };
        let room = room_id(&ctx.identity, &friend);
        info!("{} left {}", ctx.identity, room);
        ctx.reply(ServerEvent::LeftChat { room, friend });
    }
}

/// Trimmed value, or None when absent or blank.
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_send(sender: &str, payload: SendMessagePayload) -> Result<NewMessage, RelayError> {
    let attachment = payload.attachment();
    let receiver =
        present(payload.receiver).ok_or_else(|| RelayError::validation(MSG_SEND_REQUIRED))?;
    let body = payload.message.as_deref().map(str::trim).unwrap_or_default();

    if body.is_empty() && attachment.is_none() {
        return Err(RelayError::validation(MSG_SEND_REQUIRED));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(RelayError::validation(MSG_TOO_LONG));
    }

    Ok(NewMessage {
        sender: sender.to_string(),
        receiver,
        message: body.to_string(),
        message_type: payload.message_type.unwrap_or_default(),
        attachment,
        timestamp: None,
    })
}

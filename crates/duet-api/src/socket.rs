use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use tracing::debug;

use duet_gateway::{RelayError, connection};

use crate::auth::{AppState, AuthenticatedUser};
use crate::error::ApiError;
use crate::middleware::bearer_token;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// GET /socket: authenticate, then hand the upgraded socket to the gateway.
/// Unauthenticated clients get a 401 and never reach the session registry.
pub async fn upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token)
        .unwrap_or_default();

    let user = authenticate(&state, &token).await?;
    let engine = state.engine.clone();

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, engine, user.username, user.token)
    }))
}

async fn authenticate(state: &AppState, token: &str) -> Result<AuthenticatedUser, RelayError> {
    state.verifier.verify(token).await.map_err(|e| {
        debug!("Socket upgrade refused: {}", e);
        RelayError::Connection(e.to_string())
    })
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use duet_api::auth::AuthError;
use duet_api::{AppState, AppStateInner, AuthenticatedUser, TokenVerifier};
use duet_db::{Database, SqliteMessageStore};
use duet_gateway::oracle::OracleError;
use duet_gateway::{AuthorizationGateway, FriendshipOracle, RoutingEngine, SessionRegistry};
use duet_types::events::ServerEvent;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

/// Tokens are `<name>-token`.
struct SuffixVerifier;

#[async_trait]
impl TokenVerifier for SuffixVerifier {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        token
            .strip_suffix("-token")
            .filter(|name| !name.is_empty())
            .map(|name| AuthenticatedUser {
                username: name.to_string(),
                token: token.to_string(),
            })
            .ok_or_else(|| AuthError::Invalid("unknown token".into()))
    }
}

/// Only alice and bob are friends.
struct PairOracle;

#[async_trait]
impl FriendshipOracle for PairOracle {
    async fn is_friend(&self, other: &str, token: &str) -> Result<bool, OracleError> {
        Ok(matches!(
            (token, other),
            ("alice-token", "bob") | ("bob-token", "alice")
        ))
    }
}

/// Serve the full router on an ephemeral port; returns the socket URL.
async fn spawn_server() -> (String, AppState) {
    let store = Arc::new(SqliteMessageStore::new(Arc::new(
        Database::open_in_memory().unwrap(),
    )));
    let authz = AuthorizationGateway::new(Arc::new(PairOracle), Duration::from_secs(1));
    let engine = RoutingEngine::new(
        SessionRegistry::new(),
        authz.clone(),
        store.clone(),
        Duration::from_secs(1),
    );
    let state: AppState = Arc::new(AppStateInner {
        store,
        authz,
        verifier: Arc::new(SuffixVerifier),
        engine,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = duet_api::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/socket"), state)
}

async fn next_event(ws: &mut Client) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn expect_closed(ws: &mut Client) {
    loop {
        match tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("socket was not closed")
        {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected frame before close: {other:?}"),
        }
    }
}

async fn send_json(ws: &mut Client, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Connect with a `token` query parameter and consume the confirmation.
async fn connect(url: &str, name: &str) -> Client {
    let (mut ws, _) = connect_async(format!("{url}?token={name}-token")).await.unwrap();
    assert_eq!(
        next_event(&mut ws).await,
        ServerEvent::Connected {
            message: "Connected to chat service".into(),
            username: name.into(),
        }
    );
    ws
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn missing_or_bad_token_is_refused_before_upgrade() {
    let (url, state) = spawn_server().await;

    for target in [url.clone(), format!("{url}?token=forged")] {
        match connect_async(target).await {
            Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("upgrade accepted without a valid token"),
        }
    }

    assert_eq!(state.engine.registry().online_count(), 0);
}

#[tokio::test]
async fn bearer_header_authenticates_the_upgrade() {
    let (url, state) = spawn_server().await;

    let mut request = url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert(AUTHORIZATION, "Bearer bob-token".parse().unwrap());
    let (mut bob, _) = connect_async(request).await.unwrap();

    assert_eq!(
        next_event(&mut bob).await,
        ServerEvent::Connected {
            message: "Connected to chat service".into(),
            username: "bob".into(),
        }
    );
    assert!(state.engine.registry().is_online("bob"));
}

#[tokio::test]
async fn message_travels_between_sockets() {
    let (url, _state) = spawn_server().await;
    let mut alice = connect(&url, "alice").await;
    let mut bob = connect(&url, "bob").await;

    send_json(
        &mut alice,
        json!({"type": "send_message", "data": {"receiver": "bob", "message": "hi"}}),
    )
    .await;

    let ServerEvent::MessageSent(sent) = next_event(&mut alice).await else {
        panic!("expected message_sent");
    };
    let ServerEvent::NewMessage(delivered) = next_event(&mut bob).await else {
        panic!("expected new_message");
    };
    assert_eq!(sent, delivered);
    assert_eq!(sent.sender, "alice");
    assert_eq!(sent.message, "hi");
}

#[tokio::test]
async fn undecodable_frame_reports_error_and_keeps_socket_open() {
    let (url, _state) = spawn_server().await;
    let mut alice = connect(&url, "alice").await;

    alice.send(Message::Text("not json".to_string().into())).await.unwrap();
    assert_eq!(next_event(&mut alice).await, ServerEvent::error("Invalid event payload"));

    send_json(&mut alice, json!({"type": "join_chat", "data": {"friendUsername": "bob"}})).await;
    assert_eq!(
        next_event(&mut alice).await,
        ServerEvent::JoinedChat {
            room: "chat_alice_bob".into(),
            friend: "bob".into(),
        }
    );
}

#[tokio::test]
async fn reconnect_closes_superseded_socket_and_keeps_new_session() {
    let (url, state) = spawn_server().await;
    let mut first = connect(&url, "alice").await;
    let mut second = connect(&url, "alice").await;

    expect_closed(&mut first).await;
    drop(first);

    // Give the old connection's disconnect time to run; it must be a no-op
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(state.engine.registry().is_online("alice"));
    assert_eq!(state.engine.registry().online_count(), 1);

    let mut bob = connect(&url, "bob").await;
    send_json(
        &mut bob,
        json!({"type": "send_message", "data": {"receiver": "alice", "message": "still there?"}}),
    )
    .await;
    let ServerEvent::NewMessage(delivered) = next_event(&mut second).await else {
        panic!("expected new_message on the newer socket");
    };
    assert_eq!(delivered.message, "still there?");
}

#[tokio::test]
async fn closing_the_socket_unregisters_the_session() {
    let (url, state) = spawn_server().await;
    let mut alice = connect(&url, "alice").await;
    assert!(state.engine.registry().is_online("alice"));

    alice.close(None).await.unwrap();

    let registry = state.engine.registry().clone();
    wait_until(|| !registry.is_online("alice")).await;
}

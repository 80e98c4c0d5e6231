use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use duet_types::events::{ClientCommand, ServerEvent};

use crate::error::MSG_INVALID_PAYLOAD;
use crate::registry::{ConnectionHandle, Outbound};
use crate::router::{ConnectionContext, RoutingEngine};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Commands buffered per connection. When full the reader stops pulling
/// frames off the socket until the worker catches up.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Drive one WebSocket whose token was already verified at the HTTP upgrade.
///
/// Commands from one client run in order on a detached worker, so a socket
/// closing mid-send never cancels persistence; only the replies are lost.
pub async fn handle_connection(
    socket: WebSocket,
    engine: RoutingEngine,
    identity: String,
    token: String,
) {
    let (sender, receiver) = socket.split();
    let (handle, outbound_rx) = ConnectionHandle::new();
    let ctx = ConnectionContext::new(identity, token, handle);

    if let Some(previous) = engine.connect(&ctx) {
        previous.close();
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    tokio::spawn(run_command_worker(engine.clone(), ctx.clone(), cmd_rx));

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(write_loop(sender, outbound_rx, pong_received.clone()));
    let mut recv_task = tokio::spawn(read_loop(receiver, ctx.clone(), cmd_tx, pong_received));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    engine.disconnect(&ctx);
}

/// Forward queued events to the client, with heartbeat.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            item = outbound_rx.recv() => {
                match item {
                    Some(Outbound::Event(event)) => {
                        let Some(text) = encode(&event) else { continue };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) => {
                        debug!("Session superseded, closing socket");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!(
                            "Heartbeat timeout (missed {} pongs), dropping connection",
                            missed_heartbeats
                        );
                        break;
                    }
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Decode client frames and queue them for the command worker.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    ctx: ConnectionContext,
    cmd_tx: mpsc::Sender<ClientCommand>,
    pong_received: Arc<AtomicBool>,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(cmd) => {
                    trace!("{} -> {:?}", ctx.identity, cmd);
                    if cmd_tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        "{} bad command: {} -- raw: {}",
                        ctx.identity,
                        e,
                        truncate(&text, 200)
                    );
                    ctx.handle.emit(ServerEvent::error(MSG_INVALID_PAYLOAD));
                }
            },
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Execute commands sequentially until the reader hangs up and the queue is
/// drained.
async fn run_command_worker(
    engine: RoutingEngine,
    ctx: ConnectionContext,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        engine.dispatch(&ctx, cmd).await;
    }
    info!("{} command worker finished", ctx.identity);
}

fn encode(event: &ServerEvent) -> Option<String> {
    serde_json::to_string(event)
        .inspect_err(|e| error!("Failed to encode {} event: {}", event.kind(), e))
        .ok()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

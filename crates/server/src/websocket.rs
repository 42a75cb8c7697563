//! WebSocket transport for observers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use donebell_protocol::ServerMessage;

use crate::broadcast_hub::ObserverConnection;
use crate::error::SendError;
use crate::state::AppState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const OUTBOUND_CAPACITY: usize = 100;

/// Frames queued for one client's writer task
#[derive(Debug)]
enum OutboundMessage {
    /// Serialized JSON or keepalive text
    Text(String),
    /// Raw pong response
    Pong(Bytes),
}

/// Why a connection's read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    CloseFrame,
    StreamEnded,
    Error,
    /// The hub dropped this observer after a failed send.
    Evicted,
}

/// Hub-facing side of one WebSocket client. Never blocks: a full queue counts
/// as a failed send, and any failed send flags the connection for closing so
/// the client reconnects instead of going quiet.
pub struct ChannelObserver {
    id: u64,
    tx: mpsc::Sender<OutboundMessage>,
    evicted: watch::Sender<bool>,
}

impl ChannelObserver {
    fn new(id: u64, tx: mpsc::Sender<OutboundMessage>) -> (Self, watch::Receiver<bool>) {
        let (evicted, evicted_rx) = watch::channel(false);
        (Self { id, tx, evicted }, evicted_rx)
    }
}

#[async_trait]
impl ObserverConnection for ChannelObserver {
    fn id(&self) -> u64 {
        self.id
    }

    async fn send(&self, message: &ServerMessage) -> Result<(), SendError> {
        let json = serde_json::to_string(message)?;
        let result = self
            .tx
            .try_send(OutboundMessage::Text(json))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            });
        if result.is_err() {
            self.evicted.send_replace(true);
        }
        result
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CAPACITY);

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Text(text) => ws_tx.send(Message::Text(text.into())).await,
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    let (observer, evicted) = ChannelObserver::new(conn_id, outbound_tx.clone());
    state.hub.register(Arc::new(observer)).await;

    let end = read_loop(conn_id, ws_rx, outbound_tx, evicted).await;

    state.hub.unregister(conn_id).await;
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        reason = ?end,
        "WebSocket connection closed"
    );
    // Dropping the writer drops the socket's sink half, which closes the client.
    send_task.abort();
}

/// Serve keepalives until the client leaves or the hub evicts this observer.
/// Takes the handler's queue sender by value so it is gone once this returns.
async fn read_loop<S>(
    conn_id: u64,
    mut ws_rx: S,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    mut evicted: watch::Receiver<bool>,
) -> ConnectionEnd
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let result = tokio::select! {
            changed = evicted.changed() => {
                if changed.is_err() || *evicted.borrow() {
                    warn!(
                        component = "websocket",
                        event = "ws.connection.evicted",
                        connection_id = conn_id,
                        "Observer evicted from hub, closing connection"
                    );
                    return ConnectionEnd::Evicted;
                }
                continue;
            }
            next = ws_rx.next() => match next {
                Some(result) => result,
                None => return ConnectionEnd::StreamEnded,
            },
        };

        match result {
            Ok(Message::Text(text)) => {
                if is_keepalive(text.as_str()) {
                    let _ = outbound_tx
                        .send(OutboundMessage::Text("pong".to_string()))
                        .await;
                } else {
                    debug!(
                        component = "websocket",
                        event = "ws.message.ignored",
                        connection_id = conn_id,
                        payload_preview = %truncate_for_log(text.as_str(), 120),
                        "Ignoring client text message"
                    );
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                return ConnectionEnd::CloseFrame;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                return ConnectionEnd::Error;
            }
        }
    }
}

fn is_keepalive(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("ping")
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

//! One browser websocket connection.
//!
//! Each connection runs two pumps. The inbound pump reads frames, refreshes
//! the read deadline and hands every request to the dispatcher on its own
//! task. The outbound pump drains the client's hub queue, coalesces whatever
//! is already waiting into one text frame, and sends keepalive pings. Either
//! pump ending tears the connection down and unregisters it from the hub.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parley_protocol::{Envelope, ServerMessage};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use crate::hub::{ClientId, Frame, Target};
use crate::state::AppState;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

const WRITE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// How long a connection may stay silent before it is dropped.
    pub pong_wait: Duration,
    /// Keepalive ping period, shorter than `pong_wait`.
    pub ping_period: Duration,
    pub max_message_bytes: usize,
}

impl ClientConfig {
    pub fn new(pong_wait: Duration, max_message_bytes: usize) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_bytes,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 512 * 1024)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub reconnect: bool,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max = state.client_config.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_client(socket, state, query.reconnect))
}

async fn run_client(socket: WebSocket, state: Arc<AppState>, reconnect: bool) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let config = state.client_config;

    let (queue_tx, queue_rx) = state.hub.client_queue();
    if state.hub.register(client_id, queue_tx).await.is_err() {
        warn!(
            component = "websocket",
            event = "ws.connection.rejected",
            client_id,
            "Hub stopped, refusing connection"
        );
        return;
    }
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        client_id,
        reconnect,
        "WebSocket connection opened"
    );

    if reconnect {
        // Tell the browser to refetch whatever it missed while disconnected.
        let _ = state
            .hub
            .send(Target::Single(client_id), &Envelope::new("", ServerMessage::Reload))
            .await;
    }

    let (sink, stream) = socket.split();
    let mut outbound = tokio::spawn(outbound_pump(client_id, sink, queue_rx, config.ping_period));

    let outbound_done = tokio::select! {
        _ = inbound_pump(client_id, stream, &state) => false,
        _ = &mut outbound => {
            debug!(
                component = "websocket",
                event = "ws.outbound.ended",
                client_id,
                "Outbound pump ended first"
            );
            true
        }
    };

    state.hub.unregister(client_id).await;
    // Unregistering closes the queue, which lets the outbound pump send a
    // close frame and exit.
    if !outbound_done && timeout(WRITE_WAIT, &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        client_id,
        "WebSocket connection closed"
    );
}

async fn inbound_pump(client_id: ClientId, mut stream: SplitStream<WebSocket>, state: &Arc<AppState>) {
    let pong_wait = state.client_config.pong_wait;
    loop {
        // Any frame, including a pong, counts as liveness.
        let next = match timeout(pong_wait, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.read_timeout",
                    client_id,
                    pong_wait_secs = pong_wait.as_secs(),
                    "No frame within read deadline"
                );
                return;
            }
        };

        let frame = match next {
            Some(Ok(Message::Text(text))) => Bytes::from(text.as_str().to_owned()),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    client_id,
                    "Client sent close frame"
                );
                return;
            }
            Some(Err(e)) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    client_id,
                    error = %e,
                    "WebSocket error"
                );
                return;
            }
            None => return,
        };

        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.handle_frame(client_id, &frame).await;
        });
    }
}

async fn outbound_pump(
    client_id: ClientId,
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Frame>,
    ping_period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
    loop {
        let message = tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => Message::Text(coalesce(frame, &mut queue).into()),
                None => {
                    // Unregistered by the hub.
                    let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ticker.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(WRITE_WAIT, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    client_id,
                    error = %e,
                    "WebSocket send failed, client disconnected"
                );
                return;
            }
            Err(_) => {
                warn!(
                    component = "websocket",
                    event = "ws.send.timeout",
                    client_id,
                    "WebSocket send timed out"
                );
                return;
            }
        }
    }
}

/// Join `first` with every frame already queued, one envelope per line.
fn coalesce(first: Frame, queue: &mut mpsc::Receiver<Frame>) -> String {
    let mut buf = first.to_vec();
    while let Ok(next) = queue.try_recv() {
        buf.push(b'\n');
        buf.extend_from_slice(&next);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_shorter_than_pong_wait() {
        let config = ClientConfig::default();
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.ping_period, Duration::from_secs(54));
    }

    #[tokio::test]
    async fn coalesces_waiting_frames_one_per_line() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(b"{\"type\":\"b\"}")).await.unwrap();
        tx.send(Bytes::from_static(b"{\"type\":\"c\"}")).await.unwrap();

        let joined = coalesce(Bytes::from_static(b"{\"type\":\"a\"}"), &mut rx);
        let lines: Vec<_> = joined.lines().collect();
        assert_eq!(
            lines,
            vec![r#"{"type":"a"}"#, r#"{"type":"b"}"#, r#"{"type":"c"}"#]
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn single_frame_is_sent_as_is() {
        let (_tx, mut rx) = mpsc::channel::<Frame>(1);
        assert_eq!(
            coalesce(Bytes::from_static(b"{\"type\":\"pong\"}"), &mut rx),
            r#"{"type":"pong"}"#
        );
    }
}

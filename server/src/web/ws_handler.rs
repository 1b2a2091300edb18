use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::engine::events::{ClientEvent, ServerEvent};
use crate::error::HubError;

use super::app_state::AppState;

/// Server pings every connection this often.
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// A connection that sends nothing (not even a pong) for this long is dropped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// GET /ws: upgrade to the hub's event protocol.
pub async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let hub = state.hub.clone();
    let (session_id, rx) = hub.connect();
    let (sink, mut stream) = socket.split();

    let writer = tokio::spawn(write_loop(sink, rx));

    // Events from one connection are handled one at a time, in arrival order.
    loop {
        let frame = match timeout(IDLE_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(%session_id, error = %e, "websocket read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!(%session_id, "websocket idle, closing");
                break;
            }
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => hub.handle_event(session_id, event).await,
                Err(e) => {
                    let err = HubError::InvalidPayload(format!("Malformed event: {e}"));
                    hub.send_error(session_id, "unknown", &err);
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; pongs and binary frames only keep the connection alive.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    hub.disconnect(session_id);
    writer.abort();
    info!(%session_id, "websocket closed");
}

/// Drain the session's outbound queue into the socket, pinging on a timer.
async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerEvent>,
) {
    let mut ping = interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to encode outbound event");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

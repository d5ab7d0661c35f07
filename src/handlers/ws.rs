//! Per-identity live connection.
//!
//! Opening the socket reports the identity connected; closing it reports
//! the disconnect. Frames from the private and public broadcast channels
//! are forwarded as JSON text; inbound sends use the REST surface.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::AppState;
use crate::handlers::presence::announce;
use crate::push::Envelope;

/// GET /ws/:user_id
pub async fn ws_connect(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    info!("WebSocket connect for {}", user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: AppState) {
    if let Err(e) = state.presence.set_online(&user_id).await {
        warn!("Failed to set {} online: {}", user_id, e);
    }
    announce(&state, &user_id, "USER_ONLINE").await;

    let (mut sink, mut stream) = socket.split();
    let mut private = state.transport.subscribe(&user_id).await;
    let mut public = state.transport.subscribe_public();

    loop {
        tokio::select! {
            frame = private.recv() => match frame {
                Ok(envelope) => {
                    if !forward(&mut sink, envelope).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Client {} lagged, dropped {} frames", user_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            frame = public.recv() => match frame {
                Ok(envelope) => {
                    if !forward(&mut sink, envelope).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Client {} lagged on public feed, dropped {} frames", user_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            closed = client_closed(&mut stream, &user_id) => {
                if closed {
                    break;
                }
            }
        }
    }

    if let Err(e) = state.presence.set_offline(&user_id).await {
        warn!("Failed to set {} offline: {}", user_id, e);
    }
    announce(&state, &user_id, "USER_OFFLINE").await;
    info!("WebSocket closed for {}", user_id);
}

async fn forward(sink: &mut SplitSink<WebSocket, Message>, envelope: Envelope) -> bool {
    let frame = json!({
        "channel": envelope.channel,
        "payload": envelope.payload,
    });
    sink.send(Message::Text(frame.to_string().into()))
        .await
        .is_ok()
}

/// Drain one inbound frame; returns true when the client is gone. Inbound
/// text frames are ignored, sends go through the REST surface.
async fn client_closed(stream: &mut SplitStream<WebSocket>, user_id: &str) -> bool {
    match stream.next().await {
        Some(Ok(Message::Close(_))) | None => true,
        Some(Ok(_)) => false,
        Some(Err(e)) => {
            debug!("WebSocket error for {}: {}", user_id, e);
            true
        }
    }
}

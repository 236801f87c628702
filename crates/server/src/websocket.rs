//! WebSocket Handler
//!
//! Accepts the client connection, opens the upstream agent link and hands
//! both to a [`Relay`]. Socket I/O runs in two pump tasks so the relay only
//! ever sees channels.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use specflow_core::{ClientEvent, EventEnvelope};

use crate::relay::{ClientInbound, ClientOutbound, Relay};
use crate::state::AppState;

/// Client channel depth
const CLIENT_CAPACITY: usize = 256;

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let lease = state.clients.claim();
    let conversation_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(client = lease.id, conversation_id = %conversation_id, "Client connected");

    let (mut sink, mut stream) = socket.split();

    let agent = match state.connector.connect().await {
        Ok(link) => link,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect upstream agent");
            let envelope = EventEnvelope::new(
                &conversation_id,
                ClientEvent::Error {
                    message: e.to_string(),
                },
            );
            if let Ok(text) = envelope.to_json() {
                let _ = sink.send(Message::Text(text)).await;
            }
            let _ = sink.close().await;
            state.clients.release(lease.id);
            return;
        },
    };

    let (client_tx, mut client_out_rx) = mpsc::channel::<ClientOutbound>(CLIENT_CAPACITY);
    let (client_in_tx, client_rx) = mpsc::channel::<ClientInbound>(CLIENT_CAPACITY);

    // Writer: relay → client
    let writer = tokio::spawn(async move {
        while let Some(outbound) = client_out_rx.recv().await {
            let message = match outbound {
                ClientOutbound::Audio(bytes) => Message::Binary(bytes),
                ClientOutbound::Event(envelope) => match envelope.to_json() {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode client event");
                        continue;
                    },
                },
                ClientOutbound::Close => {
                    let _ = sink.close().await;
                    break;
                },
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // Reader: client → relay
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let inbound = match frame {
                Ok(Message::Binary(bytes)) => ClientInbound::Audio(bytes),
                Ok(Message::Text(text)) => ClientInbound::Text(text),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "Client read failed");
                    break;
                },
            };
            if client_in_tx.send(inbound).await.is_err() {
                break;
            }
        }
    });

    let relay = Relay::new(
        conversation_id,
        &state.config.conversation,
        state.generation.clone(),
        client_tx,
        agent.outbound.clone(),
    );
    let exit = relay.run(client_rx, agent, lease.evicted.clone()).await;

    reader.abort();
    // The relay dropped its sender; the writer drains and exits
    let _ = writer.await;
    state.clients.release(lease.id);
    tracing::info!(client = lease.id, exit = ?exit, "Client disconnected");
}

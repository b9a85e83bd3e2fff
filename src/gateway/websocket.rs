//! The `/ws` connection handler. Adapted from the split-sink/local-mpsc
//! `tokio::select!` pattern used throughout the teacher's websocket
//! handlers (e.g. its orderbook and trade position feeds): one task reads
//! from the socket, one reads from a local mpsc fed by the gateway actor,
//! and whichever finishes first (client disconnect, or the gateway closing
//! the connection) aborts its sibling.

use crate::gateway::connection::Outbound;
use crate::gateway::ClientMessage;
use crate::gateway::GatewayHandle;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const LOCAL_CHANNEL_CAPACITY: usize = 256;

pub async fn upgrade(ws: WebSocketUpgrade, State(gateway): State<GatewayHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

async fn handle_socket(socket: WebSocket, gateway: GatewayHandle) {
    let (mut sink, mut stream) = socket.split();
    let (local_tx, mut local_rx) = mpsc::channel::<Outbound>(LOCAL_CHANNEL_CAPACITY);

    let id = gateway.connect(local_tx);

    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = local_rx.recv().await {
            let message = match outbound {
                Outbound::Text(value) => Message::Text(value.to_string()),
                Outbound::Close => Message::Close(None),
            };
            if tokio::time::timeout(SEND_TIMEOUT, sink.send(message)).await.is_err() {
                break;
            }
        }
    });

    let gateway_for_recv = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    if let Some(client_message) = parse_client_message(&text) {
                        gateway_for_recv.client_message(id, client_message).await;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(id).await;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireClientMessage {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "subscribe_address")]
    SubscribeAddress { address: String },
    #[serde(rename = "unsubscribe_address")]
    UnsubscribeAddress { address: String },
    #[serde(rename = "subscribe")]
    Subscribe { channel: String },
}

fn parse_client_message(text: &str) -> Option<ClientMessage> {
    let wire: WireClientMessage = match serde_json::from_str(text) {
        Ok(wire) => wire,
        Err(err) => {
            tracing::debug!(%err, "ignoring malformed client message");
            return None;
        }
    };
    Some(match wire {
        WireClientMessage::Ping => ClientMessage::Ping,
        WireClientMessage::SubscribeAddress { address } => ClientMessage::SubscribeAddress { address },
        WireClientMessage::UnsubscribeAddress { address } => ClientMessage::UnsubscribeAddress { address },
        WireClientMessage::Subscribe { channel } => ClientMessage::SubscribeChannel { channel },
    })
}

//! Egress WebSocket for passenger clients, bound to one main route.
//!
//! The connection drains its registry queue into the socket; the queue is
//! bounded, so a reader that stops consuming is evicted by the broadcaster
//! rather than ever backpressuring the pipeline.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::realtime::registry::SubscriptionRegistry;

#[derive(Clone)]
pub struct PassengerWsState {
    pub registry: Arc<SubscriptionRegistry>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum PassengerServerMessage {
    Connection { message: String, timestamp: String },
}

/// WebSocket endpoint streaming the realtime feed of one main route.
pub async fn ws_passenger(
    ws: WebSocketUpgrade,
    Path(route_id): Path<String>,
    State(state): State<PassengerWsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, route_id, state))
}

async fn handle_socket(socket: WebSocket, raw_route_id: String, state: PassengerWsState) {
    let (mut sender, mut receiver) = socket.split();

    // The path parameter must be a bare decimal route id.
    let route_id = parse_route_id(&raw_route_id);
    let Some(route_id) = route_id else {
        debug!(route_id = %raw_route_id, "closing passenger socket, invalid route id");
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "policy violation".into(),
            })))
            .await;
        return;
    };

    let welcome = PassengerServerMessage::Connection {
        message: format!("Connected to real-time feed for route {route_id}"),
        timestamp: Utc::now().to_rfc3339(),
    };
    match serde_json::to_string(&welcome) {
        Ok(json) => {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        Err(_) => return,
    }

    let (token, mut feed_rx) = state.registry.subscribe(route_id);

    loop {
        tokio::select! {
            frame = feed_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // The broadcaster evicted this subscriber.
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Passengers have nothing to say; axum answers pings.
                    _ => {}
                }
            }
        }
    }

    state.registry.unsubscribe(token);
}

fn parse_route_id(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

//! Ingress WebSocket for driver clients.
//!
//! Every text frame is one telemetry sample. Bad frames get an error reply
//! on the same socket and are discarded; the connection itself survives so
//! a flaky client keeps streaming.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::tracking::pipeline::{TelemetryFrame, TelemetryPipeline};

#[derive(Clone)]
pub struct DriverWsState {
    pub pipeline: Arc<TelemetryPipeline>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum DriverServerMessage {
    Connected { message: String },
    Error { message: String },
}

/// WebSocket endpoint receiving driver GPS telemetry.
pub async fn ws_driver(ws: WebSocketUpgrade, State(state): State<DriverWsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: DriverWsState) {
    let (mut sender, mut receiver) = socket.split();

    let connected = DriverServerMessage::Connected {
        message: "Connected to driver location service".to_string(),
    };
    if let Ok(json) = serde_json::to_string(&connected) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match TelemetryFrame::parse(&text) {
                Ok(frame) => state.pipeline.process_frame(frame).await,
                Err(e) => {
                    debug!(error = %e, "rejecting driver frame");
                    let reply = DriverServerMessage::Error {
                        message: e.to_string(),
                    };
                    if let Ok(json) = serde_json::to_string(&reply) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            },
            Ok(Message::Ping(_)) => {
                // Axum handles pong automatically
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }
}

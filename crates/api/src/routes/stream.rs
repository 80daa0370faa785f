//! Live Telemetry WebSocket
//!
//! Each connection gets its own hub subscription; messages are forwarded as
//! JSON text frames until the client closes, the socket fails or the
//! subscription is dropped for overflow. The read half is drained so close
//! frames and pings from the client are handled.

use crate::AppState;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use broadcast_hub::{forward_until, Transport, TransportError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pipeline::StreamMessage;
use tracing::{debug, info};

/// Hub transport over the write half of an axum WebSocket
pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Transport<StreamMessage> for WsTransport {
    async fn send(&mut self, message: StreamMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(&message).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

/// Resolves once the client closes the socket or it errors
async fn client_closed(mut incoming: SplitStream<WebSocket>) {
    while let Some(frame) = incoming.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket read error: {}", e);
                break;
            }
        }
    }
}

pub async fn telemetry_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let subscription = state.service.subscribe();
        let id = subscription.id();
        info!("WebSocket subscriber {} connected", id);
        let (sink, incoming) = socket.split();
        let reason = forward_until(subscription, WsTransport::new(sink), client_closed(incoming)).await;
        info!("WebSocket subscriber {} disconnected: {}", id, reason);
    })
}

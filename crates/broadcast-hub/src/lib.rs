//! Broadcast Hub
//!
//! Fans out messages to any number of live subscribers, each with its own
//! bounded queue. Publishing never blocks: a full queue loses its oldest
//! message, and a subscriber that keeps overflowing is disconnected so one
//! slow consumer cannot hold back the rest.

mod hub;
mod subscriber;

pub use hub::{BroadcastHub, HubConfig};
pub use subscriber::{SubscriberId, Subscription};

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a subscriber stopped receiving
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Dropped too many messages within the drop window
    Overflow,
    /// Unsubscribed by the hub or by dropping the subscription
    Unsubscribed,
    /// The hub was closed
    HubClosed,
    /// The subscriber's transport failed
    TransportFailed(String),
    /// The remote peer closed the connection
    PeerClosed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Overflow => f.write_str("queue overflow"),
            DisconnectReason::Unsubscribed => f.write_str("unsubscribed"),
            DisconnectReason::HubClosed => f.write_str("hub closed"),
            DisconnectReason::TransportFailed(e) => write!(f, "transport failed: {}", e),
            DisconnectReason::PeerClosed => f.write_str("peer closed"),
        }
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(String),

    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Where a subscriber's messages end up (a WebSocket, an MQTT topic, ...)
#[async_trait]
pub trait Transport<T>: Send {
    async fn send(&mut self, message: T) -> Result<(), TransportError>;
}

/// Drain a subscription into a transport until either side ends.
///
/// A transport failure disconnects this subscriber only.
pub async fn forward<T, Tr>(mut subscription: Subscription<T>, mut transport: Tr) -> DisconnectReason
where
    T: Send + 'static,
    Tr: Transport<T>,
{
    let id = subscription.id();
    debug!("Forwarding subscriber {}", id);
    while let Some(message) = subscription.recv().await {
        if let Err(e) = transport.send(message).await {
            warn!("Subscriber {} transport error: {}", id, e);
            let reason = DisconnectReason::TransportFailed(e.to_string());
            subscription.close(reason.clone());
            return reason;
        }
    }
    subscription
        .disconnect_reason()
        .unwrap_or(DisconnectReason::HubClosed)
}

/// [`forward`] until the subscription ends or `closed` resolves.
///
/// `closed` watches the peer side of the transport; when it fires the
/// subscription is dropped, which unsubscribes it from the hub.
pub async fn forward_until<T, Tr, F>(subscription: Subscription<T>, transport: Tr, closed: F) -> DisconnectReason
where
    T: Send + 'static,
    Tr: Transport<T>,
    F: Future<Output = ()> + Send,
{
    let id = subscription.id();
    tokio::select! {
        reason = forward(subscription, transport) => reason,
        _ = closed => {
            debug!("Subscriber {} peer closed", id);
            DisconnectReason::PeerClosed
        }
    }
}

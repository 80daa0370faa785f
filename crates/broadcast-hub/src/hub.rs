//! Broadcast Hub Implementation

use crate::subscriber::{Offer, SubscriberId, SubscriberShared, Subscription};
use crate::DisconnectReason;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-subscriber queue capacity
    pub queue_capacity: usize,
    /// Drops tolerated within `drop_window_ms` before a forced disconnect
    pub max_drops: usize,
    /// Drop-rate window (milliseconds)
    pub drop_window_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            max_drops: 1000,
            drop_window_ms: 30_000,
        }
    }
}

impl HubConfig {
    pub fn drop_window(&self) -> Duration {
        Duration::from_millis(self.drop_window_ms)
    }
}

pub(crate) struct HubInner<T> {
    subscribers: RwLock<HashMap<SubscriberId, Arc<SubscriberShared<T>>>>,
}

impl<T> HubInner<T> {
    pub(crate) fn remove(&self, id: SubscriberId, reason: DisconnectReason) -> bool {
        let removed = match self.subscribers.write() {
            Ok(mut subscribers) => {
                let removed = subscribers.remove(&id);
                gauge!("telemetry_hub_subscribers").set(subscribers.len() as f64);
                removed
            }
            Err(e) => {
                warn!("Subscriber registry lock error: {}", e);
                None
            }
        };
        match removed {
            Some(shared) => {
                shared.disconnect(reason.clone());
                counter!("telemetry_hub_disconnects_total").increment(1);
                info!("Subscriber {} disconnected: {}", id, reason);
                true
            }
            None => false,
        }
    }
}

/// Fans each published message out to every subscriber's bounded queue.
///
/// Cloning the hub is cheap; clones share one registry.
pub struct BroadcastHub<T> {
    config: HubConfig,
    inner: Arc<HubInner<T>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for BroadcastHub<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            next_id: Arc::clone(&self.next_id),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T: Clone + Send + 'static> BroadcastHub<T> {
    /// Create a new hub
    pub fn new(config: HubConfig) -> Self {
        info!(
            "Creating broadcast hub: queue_capacity={}, max_drops={} per {}ms",
            config.queue_capacity, config.max_drops, config.drop_window_ms
        );
        Self {
            config,
            inner: Arc::new(HubInner {
                subscribers: RwLock::new(HashMap::new()),
            }),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new subscriber. A closed hub hands out a subscription that
    /// is already disconnected.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(SubscriberShared::new(
            self.config.queue_capacity,
            self.config.max_drops,
            self.config.drop_window(),
        ));

        if self.closed.load(Ordering::Acquire) {
            shared.disconnect(DisconnectReason::HubClosed);
        } else {
            match self.inner.subscribers.write() {
                Ok(mut subscribers) => {
                    subscribers.insert(id, Arc::clone(&shared));
                    gauge!("telemetry_hub_subscribers").set(subscribers.len() as f64);
                    info!("Subscriber {} connected ({} total)", id, subscribers.len());
                }
                Err(e) => {
                    warn!("Subscriber registry lock error: {}", e);
                    shared.disconnect(DisconnectReason::HubClosed);
                }
            }
        }

        Subscription::new(id, shared, Arc::downgrade(&self.inner))
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id, DisconnectReason::Unsubscribed)
    }

    /// Offer a message to every subscriber. Never blocks or awaits.
    ///
    /// Returns the number of subscribers the message was queued for.
    pub fn publish(&self, message: T) -> usize {
        let targets: Vec<(SubscriberId, Arc<SubscriberShared<T>>)> = match self.inner.subscribers.read() {
            Ok(subscribers) => subscribers
                .iter()
                .map(|(id, shared)| (*id, Arc::clone(shared)))
                .collect(),
            Err(e) => {
                warn!("Subscriber registry lock error: {}", e);
                return 0;
            }
        };

        let mut queued = 0;
        let mut overflowed = Vec::new();
        for (id, shared) in targets {
            match shared.offer(message.clone()) {
                Offer::Queued => queued += 1,
                Offer::DroppedOldest => {
                    queued += 1;
                    counter!("telemetry_hub_dropped_total").increment(1);
                    debug!("Subscriber {} queue full, dropped oldest", id);
                }
                Offer::Overflow => {
                    counter!("telemetry_hub_dropped_total").increment(1);
                    overflowed.push(id);
                }
                Offer::Closed => {}
            }
        }

        for id in overflowed {
            warn!("Subscriber {} exceeded drop limit, disconnecting", id);
            self.inner.remove(id, DisconnectReason::Overflow);
        }
        queued
    }

    /// Disconnect every subscriber and refuse new ones
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = match self.inner.subscribers.write() {
            Ok(mut subscribers) => subscribers.drain().collect(),
            Err(e) => {
                warn!("Subscriber registry lock error: {}", e);
                Vec::new()
            }
        };
        for (_, shared) in &drained {
            shared.disconnect(DisconnectReason::HubClosed);
        }
        gauge!("telemetry_hub_subscribers").set(0.0);
        info!("Broadcast hub closed, {} subscribers disconnected", drained.len());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }
}

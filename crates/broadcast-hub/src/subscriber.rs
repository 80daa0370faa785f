//! Subscriber Queues

use crate::hub::HubInner;
use crate::DisconnectReason;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Subscriber identifier, unique per hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of offering one message to a subscriber
pub(crate) enum Offer {
    Queued,
    DroppedOldest,
    Overflow,
    Closed,
}

struct QueueState<T> {
    messages: VecDeque<T>,
    /// Times of recent drops, oldest first
    drop_times: VecDeque<Instant>,
    last_send: Option<Instant>,
    disconnected: Option<DisconnectReason>,
}

/// State shared between the hub and one subscription
pub(crate) struct SubscriberShared<T> {
    capacity: usize,
    max_drops: usize,
    drop_window: Duration,
    state: Mutex<QueueState<T>>,
    notify: Notify,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl<T> SubscriberShared<T> {
    pub(crate) fn new(capacity: usize, max_drops: usize, drop_window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            max_drops,
            drop_window,
            state: Mutex::new(QueueState {
                messages: VecDeque::with_capacity(capacity.max(1)),
                drop_times: VecDeque::new(),
                last_send: None,
                disconnected: None,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // The queue holds plain data; a panic elsewhere leaves it usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue without blocking. A full queue loses its oldest message.
    pub(crate) fn offer(&self, message: T) -> Offer {
        let mut state = self.lock();
        if state.disconnected.is_some() {
            return Offer::Closed;
        }

        let mut outcome = Offer::Queued;
        if state.messages.len() >= self.capacity {
            state.messages.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);

            let now = Instant::now();
            state.drop_times.push_back(now);
            while state
                .drop_times
                .front()
                .map_or(false, |t| now.duration_since(*t) > self.drop_window)
            {
                state.drop_times.pop_front();
            }
            outcome = if state.drop_times.len() > self.max_drops {
                state.disconnected = Some(DisconnectReason::Overflow);
                Offer::Overflow
            } else {
                Offer::DroppedOldest
            };
        }

        if !matches!(outcome, Offer::Overflow) {
            state.messages.push_back(message);
        }
        drop(state);
        self.notify.notify_one();
        outcome
    }

    /// Mark disconnected; already-queued messages stay readable
    pub(crate) fn disconnect(&self, reason: DisconnectReason) {
        let mut state = self.lock();
        if state.disconnected.is_none() {
            state.disconnected = Some(reason);
        }
        drop(state);
        self.notify.notify_one();
    }

    fn take(&self) -> Result<T, Option<DisconnectReason>> {
        let mut state = self.lock();
        match state.messages.pop_front() {
            Some(message) => {
                state.last_send = Some(Instant::now());
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(message)
            }
            None => Err(state.disconnected.clone()),
        }
    }
}

/// Receiving end of one subscriber queue.
///
/// Dropping the subscription unsubscribes it from the hub.
pub struct Subscription<T> {
    id: SubscriberId,
    shared: Arc<SubscriberShared<T>>,
    hub: Weak<HubInner<T>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: SubscriberId,
        shared: Arc<SubscriberShared<T>>,
        hub: Weak<HubInner<T>>,
    ) -> Self {
        Self { id, shared, hub }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message in publish order. Returns `None` once the subscriber has
    /// been disconnected and its queue drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.shared.take() {
                Ok(message) => return Some(message),
                Err(Some(_)) => return None,
                Err(None) => self.shared.notify.notified().await,
            }
        }
    }

    /// Next message if one is queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.shared.take().ok()
    }

    /// Messages lost to the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Messages handed to the consumer
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Messages waiting in the queue
    pub fn pending(&self) -> usize {
        self.shared.lock().messages.len()
    }

    pub fn last_send(&self) -> Option<Instant> {
        self.shared.lock().last_send
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.shared.lock().disconnected.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.disconnect_reason().is_none()
    }

    /// Disconnect with a specific reason and leave the hub
    pub(crate) fn close(&mut self, reason: DisconnectReason) {
        self.shared.disconnect(reason.clone());
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id, reason);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.shared.disconnect(DisconnectReason::Unsubscribed);
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id, DisconnectReason::Unsubscribed);
        }
    }
}

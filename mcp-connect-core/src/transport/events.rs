//! Publish/subscribe bus for stream session events.
//!
//! Each subscriber owns an unbounded channel, so a slow SSE client never
//! blocks the backend reader or other subscribers. Dropping a
//! [`Subscription`] removes it from the bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Something that happened on a stream session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// One JSON-RPC unit read from the backend's stdout.
    Message(Value),
    /// A process-level failure. Always followed by `Closed`.
    Error(Arc<TransportError>),
    /// The session is closed. Raised exactly once; nothing follows it.
    Closed,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    state: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<u64, mpsc::UnboundedSender<SessionEvent>>,
    closed: bool,
}

/// Fan-out of session events to every live subscription.
#[derive(Clone, Default)]
pub(crate) struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    ///
    /// Subscribing to a bus that already published `Closed` yields a
    /// subscription that receives `Closed` and then ends.
    pub(crate) fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.inner.state.lock();
        if state.closed {
            let _ = tx.send(SessionEvent::Closed);
        } else {
            state.subscribers.insert(id, tx);
        }
        drop(state);

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every subscriber, in subscription-independent order.
    pub(crate) fn publish(&self, event: SessionEvent) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Publish `Closed` and detach every subscriber.
    ///
    /// Returns false if the bus was already closed.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        for (_, tx) in state.subscribers.drain() {
            let _ = tx.send(SessionEvent::Closed);
        }
        true
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }
}

/// A live registration on a session's event bus.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Next event, or `None` once the session closed and every event was read.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.state.lock().subscribers.remove(&self.id);
        }
    }
}

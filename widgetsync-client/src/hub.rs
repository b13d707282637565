use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use widgetsync_api::{StreamEvent, parse_frame};

use crate::listeners::{ListenerGuard, ListenerSet};
use crate::transport::Frame;

/// Handle of a listener attached to the hub; dropping it detaches.
pub type Subscription = ListenerGuard<StreamEvent>;

const CHANNEL_CAPACITY: usize = 100;

/// Hub statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Frames or events handed to the hub
    pub received: u64,
    /// Listener invocations
    pub delivered: u64,
    /// Frames rejected by the parser
    pub dropped: u64,
}

impl HubStats {
    pub fn drop_rate(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            self.dropped as f64 / self.received as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Fans parsed stream events out to every attached listener.
///
/// Listeners run synchronously in attach order. Async consumers can take a
/// broadcast receiver through [`SubscriptionHub::subscribe`] instead.
pub struct SubscriptionHub {
    listeners: Arc<ListenerSet<StreamEvent>>,
    channel: broadcast::Sender<StreamEvent>,
    counters: Counters,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(ListenerSet::new()),
            channel: broadcast::channel(CHANNEL_CAPACITY).0,
            counters: Counters::default(),
        }
    }

    pub fn attach<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = self.listeners.attach(listener);
        tracing::debug!("Listener {} attached", id);
        ListenerGuard::new(id, &self.listeners)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.channel.subscribe()
    }

    /// Delivers an event to every listener. Returns how many were called.
    pub fn publish(&self, event: &StreamEvent) -> usize {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.dispatch(event)
    }

    /// Parses a raw frame and publishes it. Unparsable frames are logged and
    /// dropped without reaching any listener.
    pub fn ingest(&self, frame: &Frame) -> usize {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        match parse_frame(frame.as_bytes()) {
            Ok(event) => self.dispatch(&event),
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping stream frame: {}", e);
                0
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty() || self.channel.receiver_count() > 0
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            received: self.counters.received.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn dispatch(&self, event: &StreamEvent) -> usize {
        tracing::trace!("Dispatching {}", event.kind());

        let called = self.listeners.notify(event);
        self.counters.delivered.fetch_add(called as u64, Ordering::Relaxed);

        if self.channel.receiver_count() > 0 {
            let _ = self.channel.send(event.clone());
        }

        called
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

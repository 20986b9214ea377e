//! Subscription router.
//!
//! Keeps the topic table of the live session and fans inbound MESSAGE
//! frames out to listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, trace};

use super::frame::Frame;
use super::listeners::{Callback, DispatchReport, Disposer, ListenerTable};
use super::metrics::SocketMetrics;

/// One active topic subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Subscription {
    /// STOMP subscription id (`sub-N`).
    pub id: String,
    /// Destination subscribed to.
    pub topic: String,
    /// Event name listeners register under.
    pub event_name: String,
    /// Session generation that created it.
    pub generation: u64,
}

/// Maps topics to subscriptions and dispatches payloads to listeners.
///
/// Listeners are keyed both by event name and by topic; a MESSAGE is handed
/// to the event-name listeners first, then to the topic listeners.
pub(crate) struct SubscriptionRouter {
    topics: Mutex<HashMap<String, Subscription>>,
    listeners: ListenerTable<Value>,
    next_id: AtomicU64,
    metrics: Arc<SocketMetrics>,
}

impl SubscriptionRouter {
    pub(crate) fn new(metrics: Arc<SocketMetrics>) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            listeners: ListenerTable::new(),
            next_id: AtomicU64::new(0),
            metrics,
        }
    }

    /// Stores a subscription for `topic`.
    ///
    /// Returns `None` if the topic is already subscribed.
    pub(crate) fn register(
        &self,
        topic: &str,
        event_name: &str,
        generation: u64,
    ) -> Option<Subscription> {
        let mut topics = self.topics.lock();
        if topics.contains_key(topic) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription {
            id: format!("sub-{}", id),
            topic: topic.to_string(),
            event_name: event_name.to_string(),
            generation,
        };
        topics.insert(topic.to_string(), subscription.clone());
        Some(subscription)
    }

    /// Removes the subscription for `topic`.
    pub(crate) fn remove(&self, topic: &str) -> Option<Subscription> {
        self.topics.lock().remove(topic)
    }

    /// Returns true if `topic` is subscribed.
    pub(crate) fn contains(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }

    /// Returns the subscribed topics, sorted.
    pub(crate) fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Removes every subscription and returns them.
    pub(crate) fn drain(&self) -> Vec<Subscription> {
        self.topics.lock().drain().map(|(_, sub)| sub).collect()
    }

    /// Finds the subscription a MESSAGE frame belongs to.
    ///
    /// Matches on the `subscription` header, falling back to `destination`.
    fn resolve(&self, frame: &Frame) -> Option<Subscription> {
        let topics = self.topics.lock();
        if let Some(id) = frame.header("subscription") {
            if let Some(sub) = topics.values().find(|sub| sub.id == id) {
                return Some(sub.clone());
            }
        }
        frame
            .header("destination")
            .and_then(|destination| topics.get(destination))
            .cloned()
    }

    /// Decodes a MESSAGE frame and hands it to listeners.
    ///
    /// Returns false if the frame was dropped.
    pub(crate) fn route_message(&self, frame: &Frame) -> bool {
        let Some(subscription) = self.resolve(frame) else {
            debug!(
                "Dropping MESSAGE for unknown subscription {:?} (destination {:?})",
                frame.header("subscription"),
                frame.header("destination")
            );
            return false;
        };

        let payload = match serde_json::from_str::<Value>(&frame.body) {
            Ok(value) if value.is_object() => value,
            Ok(_) => {
                error!(
                    "Dropping message on {}: payload is not a JSON object",
                    subscription.topic
                );
                self.metrics.record_decode_failure();
                return false;
            }
            Err(e) => {
                error!("Dropping message on {}: {}", subscription.topic, e);
                self.metrics.record_decode_failure();
                return false;
            }
        };

        trace!(
            "Routing message on {} to {}",
            subscription.topic,
            subscription.event_name
        );
        self.metrics.record_dispatched();
        self.notify(&subscription.event_name, &payload);
        if subscription.topic != subscription.event_name {
            self.notify(&subscription.topic, &payload);
        }
        true
    }

    /// Invokes every listener registered under `key`.
    pub(crate) fn notify(&self, key: &str, data: &Value) -> DispatchReport {
        let report = self.listeners.notify(key, data);
        self.metrics.record_listener_panics(report.panicked);
        report
    }

    /// Registers a listener under `key`.
    pub(crate) fn on(&self, key: &str, callback: Callback<Value>) -> Disposer {
        self.listeners.add(key, callback)
    }

    /// Returns the number of listeners under `key`.
    pub(crate) fn listener_count(&self, key: &str) -> usize {
        self.listeners.count(key)
    }

    /// Removes every listener.
    pub(crate) fn clear_listeners(&self) {
        self.listeners.clear();
    }
}

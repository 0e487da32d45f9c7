//! In-process publish/subscribe bus.
//!
//! Subscriptions are addressed by topic and carry a group key; each
//! published message is delivered at most once per distinct group on a
//! topic, so a coordinator that subscribes the same topic through
//! multiple sources still sees a signal once. Closed subscribers are
//! pruned lazily on publish.

use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use conduit_core::{ConnectionId, Signal};
use conduit_events::ConnectionEvent;

/// Messages carried on the bus.
#[derive(Clone, Debug)]
pub enum BusMessage {
    /// A signal from elsewhere in the system addressed at a topic.
    Signal(Signal),
    /// A lifecycle event published after persistence.
    Lifecycle {
        /// The connection the event belongs to.
        connection_id: ConnectionId,
        /// The persisted event.
        event: ConnectionEvent,
    },
}

/// Opaque handle identifying one subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn next() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Topic-addressed publish/subscribe with group-keyed delivery.
pub trait PubSub: Send + Sync {
    /// Registers `sender` under `topic` with the given group key.
    fn subscribe(
        &self,
        topic: &str,
        group: &str,
        sender: mpsc::Sender<BusMessage>,
    ) -> SubscriptionId;

    /// Removes one subscription. Unknown ids are ignored.
    fn unsubscribe(&self, topic: &str, id: SubscriptionId);

    /// Delivers `message` to at most one live subscriber per group.
    ///
    /// Returns the number of groups that received the message.
    fn publish(&self, topic: &str, message: BusMessage) -> usize;
}

struct Entry {
    id: SubscriptionId,
    group: String,
    sender: mpsc::Sender<BusMessage>,
}

/// The default single-process bus.
#[derive(Default)]
pub struct InProcessPubSub {
    topics: DashMap<String, Vec<Entry>>,
}

impl InProcessPubSub {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |entries| entries.len())
    }
}

impl PubSub for InProcessPubSub {
    fn subscribe(
        &self,
        topic: &str,
        group: &str,
        sender: mpsc::Sender<BusMessage>,
    ) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.topics
            .entry(topic.to_owned())
            .or_default()
            .push(Entry {
                id,
                group: group.to_owned(),
                sender,
            });
        debug!(%topic, %group, subscription = %id, "subscribed");
        id
    }

    fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        if let Some(mut entries) = self.topics.get_mut(topic) {
            entries.retain(|entry| entry.id != id);
        }
        debug!(%topic, subscription = %id, "unsubscribed");
    }

    fn publish(&self, topic: &str, message: BusMessage) -> usize {
        let Some(mut entries) = self.topics.get_mut(topic) else {
            trace!(%topic, "publish to topic with no subscribers");
            return 0;
        };
        entries.retain(|entry| !entry.sender.is_closed());

        let mut delivered_groups: Vec<&str> = Vec::new();
        for entry in entries.iter() {
            if delivered_groups.contains(&entry.group.as_str()) {
                continue;
            }
            if entry.sender.try_send(message.clone()).is_ok() {
                delivered_groups.push(entry.group.as_str());
            }
        }
        trace!(%topic, groups = delivered_groups.len(), "published");
        delivered_groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::EntityId;
    use serde_json::json;

    fn signal(topic: &str) -> BusMessage {
        BusMessage::Signal(Signal::new(
            "things.events:modified",
            topic,
            EntityId::new("org.example:device-1"),
            json!({"temperature": 21}),
        ))
    }

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let bus = InProcessPubSub::new();
        let (tx, mut rx) = mpsc::channel(4);
        let _ = bus.subscribe("telemetry", "g1", tx);

        assert_eq!(bus.publish("telemetry", signal("telemetry")), 1);
        assert!(matches!(rx.recv().await, Some(BusMessage::Signal(_))));
    }

    #[tokio::test]
    async fn one_delivery_per_group() {
        let bus = InProcessPubSub::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let _ = bus.subscribe("telemetry", "shared", tx_a);
        let _ = bus.subscribe("telemetry", "shared", tx_b);

        assert_eq!(bus.publish("telemetry", signal("telemetry")), 1);
        // Exactly one of the two group members got the message.
        let a = rx_a.try_recv().is_ok();
        let b = rx_b.try_recv().is_ok();
        assert!(a != b);
    }

    #[tokio::test]
    async fn distinct_groups_each_receive() {
        let bus = InProcessPubSub::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let _ = bus.subscribe("telemetry", "g1", tx_a);
        let _ = bus.subscribe("telemetry", "g2", tx_b);

        assert_eq!(bus.publish("telemetry", signal("telemetry")), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = InProcessPubSub::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = bus.subscribe("telemetry", "g1", tx);
        bus.unsubscribe("telemetry", id);

        assert_eq!(bus.publish("telemetry", signal("telemetry")), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let bus = InProcessPubSub::new();
        let (tx, rx) = mpsc::channel(4);
        let _ = bus.subscribe("telemetry", "g1", tx);
        drop(rx);

        assert_eq!(bus.publish("telemetry", signal("telemetry")), 0);
        assert_eq!(bus.subscriber_count("telemetry"), 0);
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_is_silent() {
        let bus = InProcessPubSub::new();
        assert_eq!(bus.publish("nobody-home", signal("nobody-home")), 0);
    }
}

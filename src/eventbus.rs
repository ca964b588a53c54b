//! Event bus abstraction
//!
//! The engine consumes events through this seam: `emit` tasks publish (via
//! the outbox dispatcher) and the correlation manager subscribes. The
//! in-process implementation is a tokio broadcast channel; a broker-backed
//! implementation plugs in behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Event bus publish failed: {message}"))]
    Publish { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A published event: a flat attribute object (CloudEvents-style `type`,
/// `source`, plus a `data` payload) under a unique id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub attributes: Value,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn new(attributes: Value) -> Self {
        Self { id: Uuid::new_v4(), attributes, occurred_at: Utc::now() }
    }

    /// Attribute lookup by name; `None` for non-object attribute sets.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.as_object().and_then(|map| map.get(name))
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}

/// In-process bus over a tokio broadcast channel. Events published while no
/// subscriber exists are dropped, which is fine: durable delivery is the
/// outbox dispatcher's job, and the correlation manager subscribes before
/// any instance can suspend.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<Event>,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        // A send error only means no live subscribers.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = InMemoryEventBus::new(16);
        let mut rx = bus.subscribe();
        let event = Event::new(json!({"type": "order.placed", "data": {"id": "o-1"}}));
        bus.publish(event.clone()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InMemoryEventBus::new(16);
        assert!(bus.publish(Event::new(json!({"type": "t"}))).await.is_ok());
    }

    #[test]
    fn test_attribute_lookup() {
        let event = Event::new(json!({"type": "order.placed"}));
        assert_eq!(event.attribute("type"), Some(&json!("order.placed")));
        assert_eq!(event.attribute("missing"), None);
    }
}

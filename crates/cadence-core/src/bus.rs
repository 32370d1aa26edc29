use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::error::CoreError;

/// A message as it travels over the bus: a topic plus an opaque JSON body.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// At-least-once publish/subscribe transport.
///
/// Implementations are not required to deduplicate; consumers guard themselves.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), CoreError>;
}

/// Serializes `event` and publishes it on `topic`.
pub async fn publish_event<T>(bus: &dyn EventBus, topic: &str, event: &T) -> Result<(), CoreError>
where
    T: Serialize + Sync,
{
    let payload = serde_json::to_value(event)?;
    bus.publish(topic, payload).await
}

/// In-process bus backed by a tokio broadcast channel.
///
/// Keeps a bounded history of everything published so callers can inspect or
/// replay messages (replaying is how redelivery is exercised).
pub struct InMemoryEventBus {
    sender: broadcast::Sender<BusMessage>,
    history: Mutex<Vec<BusMessage>>,
    history_limit: usize,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            history: Mutex::new(Vec::new()),
            history_limit: capacity.max(1) * 4,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Messages published on `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.history
            .lock()
            .map(|history| history.iter().filter(|m| m.topic == topic).cloned().collect())
            .unwrap_or_default()
    }

    /// Delivers a previously published message again.
    pub fn redeliver(&self, message: BusMessage) {
        // No subscribers simply means nobody is listening right now.
        let _ = self.sender.send(message);
    }

    fn record(&self, message: &BusMessage) -> Result<(), CoreError> {
        let mut history = self
            .history
            .lock()
            .map_err(|_| CoreError::Transient("event bus history lock poisoned".to_string()))?;
        history.push(message.clone());
        if history.len() > self.history_limit {
            let overflow = history.len() - self.history_limit;
            history.drain(..overflow);
        }
        Ok(())
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), CoreError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            published_at: Utc::now(),
        };
        self.record(&message)?;
        if self.sender.send(message).is_err() {
            tracing::debug!(topic, "published with no active subscribers");
        }
        Ok(())
    }
}

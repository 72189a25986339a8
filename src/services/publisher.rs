//! Domain event publishing

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::domain::events::DomainEvent;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Broker error: {0}")]
    Broker(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Publishes to NATS under `<prefix>.<event subject>`.
pub struct NatsPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self { Self { client, prefix: prefix.into() } }

    pub fn subject_for(&self, event: &DomainEvent) -> String { format!("{}.{}", self.prefix, event.subject()) }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        let subject = self.subject_for(event);
        self.client.publish(subject.clone(), payload.into()).await.map_err(|e| PublishError::Broker(e.to_string()))?;
        tracing::debug!(%subject, "Event published");
        Ok(())
    }
}

/// Used when no broker is configured.
#[derive(Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        tracing::trace!(subject = %event.subject(), "No broker configured, event dropped");
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
    fail: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<DomainEvent> { self.events.lock().clone() }

    pub fn set_failing(&self, fail: bool) { *self.fail.lock() = fail; }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        if *self.fail.lock() { return Err(PublishError::Broker("broker unavailable".into())); }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OrderEvent;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_recording_publisher() {
        let publisher = RecordingPublisher::default();
        let event = DomainEvent::Order(OrderEvent::Shipped { order_id: Uuid::now_v7() });
        publisher.publish(&event).await.unwrap();
        publisher.set_failing(true);
        assert!(publisher.publish(&event).await.is_err());
        assert_eq!(publisher.events(), vec![event.clone()]);
        assert_eq!(event.subject(), "orders.shipped");
    }
}

//! Mock publisher implementation for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BrokerError, Result};
use crate::events::OutboxEvent;
use crate::interfaces::EventPublisher;

/// Records published events in memory.
///
/// Publishing can be made to fail globally or for one event type, which is
/// enough to drive the relay's retry and ordering paths.
#[derive(Default)]
pub struct MockPublisher {
    published: RwLock<Vec<OutboxEvent>>,
    fail_on_publish: RwLock<bool>,
    disconnected: RwLock<bool>,
    fail_event_type: RwLock<Option<String>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Fail every publish with `ConnectionClosed`, as a broker mid-reconnect
    /// would.
    pub async fn set_disconnected(&self, disconnected: bool) {
        *self.disconnected.write().await = disconnected;
    }

    /// Fail only events of this type; `None` clears it.
    pub async fn set_fail_on_event_type(&self, event_type: Option<&str>) {
        *self.fail_event_type.write().await = event_type.map(str::to_string);
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn published(&self) -> Vec<OutboxEvent> {
        self.published.read().await.clone()
    }

    pub async fn take_published(&self) -> Vec<OutboxEvent> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl EventPublisher for MockPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        if *self.disconnected.read().await {
            return Err(BrokerError::ConnectionClosed);
        }
        if *self.fail_on_publish.read().await {
            return Err(BrokerError::Publish("Mock publish failure".to_string()));
        }
        if self.fail_event_type.read().await.as_deref() == Some(event.event_type.as_str()) {
            return Err(BrokerError::Confirm(format!(
                "Mock nack for {}",
                event.event_type
            )));
        }
        self.published.write().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PaymentOutcome;
    use crate::events::DomainEvent;
    use uuid::Uuid;

    fn event(outcome: PaymentOutcome) -> OutboxEvent {
        OutboxEvent::stage(&DomainEvent::payment_result(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &outcome,
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_records_published() {
        let publisher = MockPublisher::new();
        publisher.publish(&event(PaymentOutcome::TimedOut)).await.unwrap();

        assert_eq!(publisher.published_count().await, 1);
        assert_eq!(publisher.take_published().await.len(), 1);
        assert_eq!(publisher.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_fail_on_publish() {
        let publisher = MockPublisher::new();
        publisher.set_fail_on_publish(true).await;

        assert!(publisher.publish(&event(PaymentOutcome::TimedOut)).await.is_err());
        assert_eq!(publisher.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnected_reports_closed_connection() {
        let publisher = MockPublisher::new();
        publisher.set_disconnected(true).await;

        let err = publisher
            .publish(&event(PaymentOutcome::TimedOut))
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert_eq!(publisher.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_fail_on_event_type_only() {
        let publisher = MockPublisher::new();
        publisher
            .set_fail_on_event_type(Some("payment.timed_out"))
            .await;

        assert!(publisher.publish(&event(PaymentOutcome::TimedOut)).await.is_err());
        publisher
            .publish(&event(PaymentOutcome::Failed {
                reason: "declined".into(),
            }))
            .await
            .unwrap();
        assert_eq!(publisher.published_count().await, 1);
    }
}

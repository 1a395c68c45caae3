//! Event publishing interface.

use async_trait::async_trait;

use crate::bus::BrokerError;
use crate::events::OutboxEvent;

/// Ships outbox events to the broker.
///
/// Implementations:
/// - `AmqpPublisher`: RabbitMQ with publisher confirms
/// - `MockPublisher`: In-memory recorder for testing
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event and wait until the broker has accepted it.
    ///
    /// `Ok` means the broker confirmed the message; anything else leaves the
    /// event for the next relay pass.
    async fn publish(&self, event: &OutboxEvent) -> Result<(), BrokerError>;
}

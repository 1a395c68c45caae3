//! Message broker plumbing.
//!
//! This module contains:
//! - `BrokerError`: failures of the broker connection and publish path
//! - `MessagingConfig`: exchange, queue and reconnect settings
//! - `ConnectionManager`: reconnect lifecycle over any `Connector`
//! - Implementations: AMQP (RabbitMQ, `amqp` feature) and an in-memory mock
//!   publisher
//! - `OutboxRelay`: drains the transactional outbox to the broker

use std::time::Duration;

use serde::Deserialize;

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod connection;
pub mod mock;
pub mod outbox;

#[cfg(feature = "amqp")]
pub use amqp::{declare_topology, AmqpConnector, AmqpPublisher, PaymentConsumer};
pub use connection::{
    ClosedSignal, ConnectionManager, ConnectionStatus, Connector, ReconnectPolicy,
};
pub use mock::MockPublisher;
pub use outbox::{spawn_relay, DrainReport, OutboxConfig, OutboxRelay, RelayHandle};

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Reconnection gave up after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Publish not confirmed: {0}")]
    Confirm(String),

    #[error("No publish confirmation within {0:?}")]
    ConfirmTimeout(Duration),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Topology declaration failed: {0}")]
    Topology(String),
}

impl BrokerError {
    /// Whether the connection will not come back without an operator.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BrokerError::RetriesExhausted { .. })
    }

    /// Whether the failure is the connection itself rather than this
    /// message. Such failures say nothing about the event being published.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            BrokerError::Connection(_)
                | BrokerError::ConnectionClosed
                | BrokerError::RetriesExhausted { .. }
        )
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Durable topic exchange for domain events.
    pub exchange: String,
    /// Work queue for payment events.
    pub queue: String,
    /// Routing pattern binding the work queue to the exchange.
    pub routing_pattern: String,
    /// Exchange receiving rejected and over-delivered messages.
    pub dead_letter_exchange: String,
    /// Queue parking dead-lettered messages, bound to `#` on the DLX.
    pub dead_letter_queue: String,
    /// Deliveries in flight per consumer. Default: 10.
    pub prefetch: u16,
    /// Deliveries before the broker dead-letters a message. Default: 5.
    pub delivery_limit: u32,
    /// Consumer tag.
    pub consumer_tag: String,
    /// Fixed delay between reconnect attempts in milliseconds. Default: 5000.
    pub reconnect_delay_ms: u64,
    /// Reconnect attempts before the connection is terminal. Default: 10.
    pub max_reconnect_attempts: usize,
    /// Wait for a publisher confirm in milliseconds. Default: 5000.
    pub publish_timeout_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: "innkeep.events".to_string(),
            queue: "innkeep.payments".to_string(),
            routing_pattern: "payment.#".to_string(),
            dead_letter_exchange: "innkeep.events.dlx".to_string(),
            dead_letter_queue: "innkeep.payments.dlq".to_string(),
            prefetch: 10,
            delivery_limit: 5,
            consumer_tag: "innkeep-worker".to_string(),
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: 10,
            publish_timeout_ms: 5_000,
        }
    }
}

impl MessagingConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

//! Publisher-confirm publishing of outbox events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    publisher_confirm::Confirmation,
    BasicProperties, Channel,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::connection::AmqpConnector;
use crate::bus::{BrokerError, ConnectionManager, MessagingConfig, Result};
use crate::events::OutboxEvent;
use crate::interfaces::EventPublisher;

/// AMQP properties for an outbox event.
///
/// `message_id` is the outbox event id, which consumers use as the
/// idempotency key; `type` carries the event type.
pub fn message_properties(event: &OutboxEvent) -> BasicProperties {
    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(2) // persistent
        .with_message_id(event.id.to_string().into())
        .with_type(event.event_type.as_str().into())
        .with_timestamp(u64::try_from(event.created_at.timestamp()).unwrap_or_default())
}

/// Publishes to the events exchange with the event type as routing key,
/// waiting for the broker's confirm.
pub struct AmqpPublisher {
    connection: Arc<ConnectionManager<AmqpConnector>>,
    exchange: String,
    publish_timeout: Duration,
    channel: Mutex<Option<Channel>>,
}

impl AmqpPublisher {
    pub fn new(connection: Arc<ConnectionManager<AmqpConnector>>, config: &MessagingConfig) -> Self {
        Self {
            connection,
            exchange: config.exchange.clone(),
            publish_timeout: config.publish_timeout(),
            channel: Mutex::new(None),
        }
    }

    /// Cached confirm-mode channel, reopened when it has closed.
    async fn channel(&self) -> Result<Channel> {
        let mut cached = self.channel.lock().await;
        if let Some(channel) = cached.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let channel = self.connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Publish(format!("Failed to enable confirms: {}", e)))?;

        *cached = Some(channel.clone());
        Ok(channel)
    }

    async fn discard_channel(&self) {
        self.channel.lock().await.take();
    }
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    #[tracing::instrument(
        name = "bus.publish",
        skip_all,
        fields(event_id = %event.id, event_type = %event.event_type)
    )]
    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        let channel = self.channel().await?;

        let confirm = match channel
            .basic_publish(
                &self.exchange,
                &event.event_type,
                BasicPublishOptions::default(),
                event.payload.as_bytes(),
                message_properties(event),
            )
            .await
        {
            Ok(confirm) => confirm,
            Err(e) => {
                self.discard_channel().await;
                return Err(BrokerError::Publish(format!("Failed to publish: {}", e)));
            }
        };

        match tokio::time::timeout(self.publish_timeout, confirm).await {
            Ok(Ok(Confirmation::Ack(_))) => {
                debug!(exchange = %self.exchange, "Published event");
                Ok(())
            }
            Ok(Ok(Confirmation::Nack(_))) => {
                warn!("Broker nacked publish");
                Err(BrokerError::Confirm("broker nacked the message".to_string()))
            }
            Ok(Ok(Confirmation::NotRequested)) => {
                self.discard_channel().await;
                Err(BrokerError::Confirm(
                    "channel is not in confirm mode".to_string(),
                ))
            }
            Ok(Err(e)) => {
                self.discard_channel().await;
                Err(BrokerError::Confirm(e.to_string()))
            }
            Err(_) => {
                self.discard_channel().await;
                Err(BrokerError::ConfirmTimeout(self.publish_timeout))
            }
        }
    }
}

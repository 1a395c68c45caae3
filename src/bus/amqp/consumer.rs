//! Payment work-queue consumer.
//!
//! Pulls deliveries with manual acknowledgement and a capped prefetch,
//! hands each one to the [`Dispatcher`], and applies the returned
//! [`Disposition`]. Channel loss is survived by reopening once the
//! connection manager reports `Connected` again.

use std::sync::Arc;

use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        BasicRejectOptions,
    },
    types::FieldTable,
    Consumer,
};
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use super::connection::AmqpConnector;
use crate::bus::{BrokerError, ConnectionManager, ConnectionStatus, MessagingConfig, Result};
use crate::services::{Disposition, Dispatcher, IncomingMessage};

/// Consumes the payment work queue until cancelled.
pub struct PaymentConsumer {
    connection: Arc<ConnectionManager<AmqpConnector>>,
    dispatcher: Arc<Dispatcher>,
    queue: String,
    consumer_tag: String,
    prefetch: u16,
}

impl PaymentConsumer {
    pub fn new(
        connection: Arc<ConnectionManager<AmqpConnector>>,
        config: &MessagingConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            connection,
            dispatcher,
            queue: config.queue.clone(),
            consumer_tag: config.consumer_tag.clone(),
            prefetch: config.prefetch,
        }
    }

    async fn open_consumer(&self) -> Result<Consumer> {
        let channel = self.connection.create_channel().await?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Consume(format!("Failed to set prefetch: {}", e)))?;

        channel
            .basic_consume(
                &self.queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(format!("Failed to start consumer: {}", e)))
    }

    /// Consume until `cancel` turns true or the connection is terminal.
    ///
    /// A delivery being handled when cancellation arrives is finished and
    /// acknowledged first.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *cancel.borrow() {
                return Ok(());
            }

            let mut consumer = match self.open_consumer().await {
                Ok(consumer) => consumer,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Consumer unavailable, waiting for connection");
                    let mut status = self.connection.subscribe();
                    tokio::select! {
                        _ = status.wait_for(|s| {
                            matches!(s, ConnectionStatus::Connected | ConnectionStatus::Terminal)
                        }) => {}
                        _ = cancel.changed() => {}
                    }
                    // Give a channel that failed on a live connection a moment.
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
            };

            info!(queue = %self.queue, prefetch = self.prefetch, "Consuming");

            loop {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            info!(queue = %self.queue, "Consumer stopped");
                            return Ok(());
                        }
                    }
                    delivery = consumer.next() => match delivery {
                        Some(Ok(delivery)) => self.handle(delivery).await,
                        Some(Err(e)) => {
                            error!(error = %e, "Consumer delivery error, reopening");
                            break;
                        }
                        None => {
                            info!(queue = %self.queue, "Consumer stream ended, reopening");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle(&self, delivery: Delivery) {
        let message_id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|id| id.to_string());
        let routing_key = delivery.routing_key.to_string();

        let span = tracing::info_span!(
            "bus.consume",
            routing_key = %routing_key,
            message_id = message_id.as_deref().unwrap_or("-")
        );

        let disposition = self
            .dispatcher
            .dispatch(IncomingMessage {
                message_id: message_id.as_deref(),
                routing_key: &routing_key,
                payload: &delivery.data,
            })
            .instrument(span)
            .await;

        let outcome = match disposition {
            Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
            Disposition::Requeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
            }
            Disposition::Reject => {
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
            }
        };

        if let Err(e) = outcome {
            error!(error = %e, ?disposition, "Failed to settle delivery");
        }
    }
}

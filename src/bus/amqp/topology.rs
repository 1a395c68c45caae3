//! Exchange and queue declarations.
//!
//! ```text
//! innkeep.events (topic) --payment.#--> innkeep.payments (quorum)
//!                                            │ reject / delivery limit
//!                                            v
//! innkeep.events.dlx (topic) ----#----> innkeep.payments.dlq
//! ```
//!
//! All declarations are durable and idempotent, so every worker declares on
//! startup.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};
use tracing::info;

use crate::bus::{BrokerError, MessagingConfig, Result};

/// Arguments for the work queue.
pub fn work_queue_arguments(config: &MessagingConfig) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-queue-type".into(),
        AMQPValue::LongString("quorum".into()),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(config.dead_letter_exchange.as_str().into()),
    );
    args.insert(
        "x-delivery-limit".into(),
        AMQPValue::LongInt(i32::try_from(config.delivery_limit).unwrap_or(i32::MAX)),
    );
    args
}

async fn declare_exchange(channel: &Channel, name: &str) -> Result<()> {
    channel
        .exchange_declare(
            name,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Topology(format!("Failed to declare exchange {}: {}", name, e)))
}

async fn declare_bound_queue(
    channel: &Channel,
    queue: &str,
    exchange: &str,
    pattern: &str,
    arguments: FieldTable,
) -> Result<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            arguments,
        )
        .await
        .map_err(|e| BrokerError::Topology(format!("Failed to declare queue {}: {}", queue, e)))?;

    channel
        .queue_bind(
            queue,
            exchange,
            pattern,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Topology(format!("Failed to bind queue {}: {}", queue, e)))?;

    info!(queue = %queue, exchange = %exchange, pattern = %pattern, "Bound queue to exchange");
    Ok(())
}

/// Declare exchanges, the work queue and the dead-letter queue.
pub async fn declare_topology(channel: &Channel, config: &MessagingConfig) -> Result<()> {
    declare_exchange(channel, &config.exchange).await?;
    declare_exchange(channel, &config.dead_letter_exchange).await?;

    declare_bound_queue(
        channel,
        &config.dead_letter_queue,
        &config.dead_letter_exchange,
        "#",
        FieldTable::default(),
    )
    .await?;

    declare_bound_queue(
        channel,
        &config.queue,
        &config.exchange,
        &config.routing_pattern,
        work_queue_arguments(config),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_queue_dead_letters_to_dlx() {
        let config = MessagingConfig::default();
        let args = work_queue_arguments(&config);
        let inner = args.inner();

        assert_eq!(
            inner.get("x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("innkeep.events.dlx".into()))
        );
        assert_eq!(inner.get("x-delivery-limit"), Some(&AMQPValue::LongInt(5)));
        assert_eq!(
            inner.get("x-queue-type"),
            Some(&AMQPValue::LongString("quorum".into()))
        );
    }
}

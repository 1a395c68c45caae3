//! Inbound message routing.
//!
//! The routing key names the event type and selects both the payload schema
//! and the handler. The result is a [`Disposition`] the broker layer applies
//! to the delivery, so routing and failure classification carry no broker
//! types.

use std::sync::Arc;

use tracing::{error, warn};

use super::{HandlerError, PaymentProcessor, SagaOrchestrator};
use crate::events::{DecodeError, DomainEvent};

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled, or already handled before.
    Ack,
    /// Transient failure; deliver again.
    Requeue,
    /// Will never succeed; dead-letter without requeue.
    Reject,
}

/// A delivery stripped down to what routing needs.
#[derive(Debug, Clone, Copy)]
pub struct IncomingMessage<'a> {
    /// Broker message id, the idempotency key.
    pub message_id: Option<&'a str>,
    pub routing_key: &'a str,
    pub payload: &'a [u8],
}

/// Routes payment events to the processor and the saga.
pub struct Dispatcher {
    processor: Arc<PaymentProcessor>,
    saga: Arc<SagaOrchestrator>,
}

impl Dispatcher {
    pub fn new(processor: Arc<PaymentProcessor>, saga: Arc<SagaOrchestrator>) -> Self {
        Self { processor, saga }
    }

    /// Decode and handle one message.
    ///
    /// Undecodable messages are rejected before any handler runs, so they
    /// never leave a processed marker behind.
    pub async fn dispatch(&self, message: IncomingMessage<'_>) -> Disposition {
        let Some(message_id) = message.message_id else {
            warn!(routing_key = %message.routing_key, "Message without message_id, rejecting");
            return Disposition::Reject;
        };

        let event = match DomainEvent::decode(message.routing_key, message.payload) {
            Ok(event) => event,
            Err(e @ DecodeError::UnknownType(_)) => {
                warn!(error = %e, "Unroutable message, rejecting");
                return Disposition::Reject;
            }
            Err(e @ DecodeError::Malformed { .. }) => {
                error!(error = %e, "Malformed payload, rejecting");
                return Disposition::Reject;
            }
        };

        let handled = match &event {
            DomainEvent::PaymentInitiated(initiated) => self
                .processor
                .handle(message_id, initiated)
                .await
                .map(|_| ()),
            other => match other.payment_outcome() {
                Some((result, outcome)) => self
                    .saga
                    .handle(message_id, result, &outcome)
                    .await
                    .map(|_| ()),
                None => {
                    warn!(event_type = other.event_type(), "No handler for event, rejecting");
                    return Disposition::Reject;
                }
            },
        };

        disposition_for(handled)
    }
}

fn disposition_for(handled: Result<(), HandlerError>) -> Disposition {
    match handled {
        Ok(()) => Disposition::Ack,
        Err(e) if e.is_permanent() => {
            error!(error = %e, "Handler failed permanently, rejecting");
            Disposition::Reject
        }
        Err(e) => {
            warn!(error = %e, "Handler failed, requeueing");
            Disposition::Requeue
        }
    }
}

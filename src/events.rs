//! Domain events and their wire schema.
//!
//! Every event is a fixed-schema JSON object. The event type doubles as the
//! AMQP routing key, so decoding is driven by that discriminator and a payload
//! that does not match its type's schema fails here, at the edge, instead of
//! deep inside a handler.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{BookingStatus, PaymentOutcome};

pub const PAYMENT_INITIATED: &str = "payment.initiated";
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const PAYMENT_TIMED_OUT: &str = "payment.timed_out";
pub const BOOKING_CONFIRMED: &str = "booking.confirmed";
pub const BOOKING_CANCELLED: &str = "booking.cancelled";
pub const BOOKING_FAILED: &str = "booking.failed";

/// Aggregate type recorded on payment events.
pub const PAYMENT_AGGREGATE: &str = "payment";
/// Aggregate type recorded on booking events.
pub const BOOKING_AGGREGATE: &str = "booking";

/// Emitted with the booking; asks the processor to charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiated {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub user_id: Uuid,
}

/// Shared payload of `payment.succeeded`, `payment.failed`, `payment.timed_out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<String>,
}

/// Announces the final status of a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSettled {
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub room_id: Uuid,
    pub status: BookingStatus,
}

/// All events this system produces, keyed by event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    PaymentInitiated(PaymentInitiated),
    PaymentSucceeded(PaymentResult),
    PaymentFailed(PaymentResult),
    PaymentTimedOut(PaymentResult),
    BookingConfirmed(BookingSettled),
    BookingCancelled(BookingSettled),
    BookingFailed(BookingSettled),
}

/// An inbound payload could not be turned into a [`DomainEvent`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Malformed '{event_type}' payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::PaymentInitiated(_) => PAYMENT_INITIATED,
            DomainEvent::PaymentSucceeded(_) => PAYMENT_SUCCEEDED,
            DomainEvent::PaymentFailed(_) => PAYMENT_FAILED,
            DomainEvent::PaymentTimedOut(_) => PAYMENT_TIMED_OUT,
            DomainEvent::BookingConfirmed(_) => BOOKING_CONFIRMED,
            DomainEvent::BookingCancelled(_) => BOOKING_CANCELLED,
            DomainEvent::BookingFailed(_) => BOOKING_FAILED,
        }
    }

    /// `(aggregate_type, aggregate_id)` the event belongs to.
    pub fn aggregate(&self) -> (&'static str, Uuid) {
        match self {
            DomainEvent::PaymentInitiated(e) => (PAYMENT_AGGREGATE, e.payment_id),
            DomainEvent::PaymentSucceeded(e)
            | DomainEvent::PaymentFailed(e)
            | DomainEvent::PaymentTimedOut(e) => (PAYMENT_AGGREGATE, e.payment_id),
            DomainEvent::BookingConfirmed(e)
            | DomainEvent::BookingCancelled(e)
            | DomainEvent::BookingFailed(e) => (BOOKING_AGGREGATE, e.booking_id),
        }
    }

    /// Build the result event for a settled payment.
    pub fn payment_result(payment_id: Uuid, booking_id: Uuid, outcome: &PaymentOutcome) -> Self {
        let result = PaymentResult {
            payment_id,
            booking_id,
            reason: outcome.failure_reason().map(str::to_string),
            gateway_ref: outcome.gateway_ref().map(str::to_string),
        };
        match outcome {
            PaymentOutcome::Succeeded { .. } => DomainEvent::PaymentSucceeded(result),
            PaymentOutcome::Failed { .. } => DomainEvent::PaymentFailed(result),
            PaymentOutcome::TimedOut => DomainEvent::PaymentTimedOut(result),
        }
    }

    /// Build the notification for a booking that reached a final status.
    pub fn booking_settled(settled: BookingSettled) -> Option<Self> {
        match settled.status {
            BookingStatus::Confirmed => Some(DomainEvent::BookingConfirmed(settled)),
            BookingStatus::Cancelled => Some(DomainEvent::BookingCancelled(settled)),
            BookingStatus::Failed => Some(DomainEvent::BookingFailed(settled)),
            BookingStatus::Pending => None,
        }
    }

    /// Recover the payment outcome carried by a result event.
    pub fn payment_outcome(&self) -> Option<(&PaymentResult, PaymentOutcome)> {
        match self {
            DomainEvent::PaymentSucceeded(r) => Some((
                r,
                PaymentOutcome::Succeeded {
                    gateway_ref: r.gateway_ref.clone().unwrap_or_default(),
                },
            )),
            DomainEvent::PaymentFailed(r) => Some((
                r,
                PaymentOutcome::Failed {
                    reason: r.reason.clone().unwrap_or_default(),
                },
            )),
            DomainEvent::PaymentTimedOut(r) => Some((r, PaymentOutcome::TimedOut)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            DomainEvent::PaymentInitiated(e) => serde_json::to_string(e),
            DomainEvent::PaymentSucceeded(e)
            | DomainEvent::PaymentFailed(e)
            | DomainEvent::PaymentTimedOut(e) => serde_json::to_string(e),
            DomainEvent::BookingConfirmed(e)
            | DomainEvent::BookingCancelled(e)
            | DomainEvent::BookingFailed(e) => serde_json::to_string(e),
        }
    }

    /// Decode a payload using its event type as discriminator.
    pub fn decode(event_type: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        fn parse<T: DeserializeOwned>(event_type: &str, payload: &[u8]) -> Result<T, DecodeError> {
            serde_json::from_slice(payload).map_err(|source| DecodeError::Malformed {
                event_type: event_type.to_string(),
                source,
            })
        }

        Ok(match event_type {
            PAYMENT_INITIATED => DomainEvent::PaymentInitiated(parse(event_type, payload)?),
            PAYMENT_SUCCEEDED => DomainEvent::PaymentSucceeded(parse(event_type, payload)?),
            PAYMENT_FAILED => DomainEvent::PaymentFailed(parse(event_type, payload)?),
            PAYMENT_TIMED_OUT => DomainEvent::PaymentTimedOut(parse(event_type, payload)?),
            BOOKING_CONFIRMED => DomainEvent::BookingConfirmed(parse(event_type, payload)?),
            BOOKING_CANCELLED => DomainEvent::BookingCancelled(parse(event_type, payload)?),
            BOOKING_FAILED => DomainEvent::BookingFailed(parse(event_type, payload)?),
            other => return Err(DecodeError::UnknownType(other.to_string())),
        })
    }
}

/// A row of the transactional outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    /// JSON document, published verbatim as the message body.
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
}

impl OutboxEvent {
    /// Stage a new, unpublished outbox row for `event`.
    pub fn stage(event: &DomainEvent) -> Result<Self, serde_json::Error> {
        let (aggregate_type, aggregate_id) = event.aggregate();
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            event_type: event.event_type().to_string(),
            payload: event.to_json()?,
            created_at: Utc::now(),
            published_at: None,
            retry_count: 0,
        })
    }
}

//! Payment aggregate and the gateway-call state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::InvalidTransition;

/// Payment lifecycle.
///
/// ```text
/// pending --begin--> processing --ok------> succeeded --refund--> refunded
///                               --fail----> failed
///                               --timeout-> timed_out
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    TimedOut,
    Refunded,
}

/// Events that drive [`PaymentStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTransition {
    BeginGatewayCall,
    GatewaySucceeded,
    GatewayFailed,
    GatewayTimedOut,
    Refund,
}

impl PaymentTransition {
    fn as_str(&self) -> &'static str {
        match self {
            PaymentTransition::BeginGatewayCall => "begin_gateway_call",
            PaymentTransition::GatewaySucceeded => "gateway_succeeded",
            PaymentTransition::GatewayFailed => "gateway_failed",
            PaymentTransition::GatewayTimedOut => "gateway_timed_out",
            PaymentTransition::Refund => "refund",
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::TimedOut => "timed_out",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            "timed_out" => Some(PaymentStatus::TimedOut),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// No further transition except the administrative refund path.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Refunded)
    }

    /// The gateway call has produced a result (successful or not).
    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Apply a transition.
    ///
    /// `processing --begin--> processing` is allowed: a processor that crashed
    /// mid-call leaves the row in `processing` and the redelivered message
    /// must be able to call the gateway again under the same idempotency key.
    pub fn transition(self, on: PaymentTransition) -> Result<PaymentStatus, InvalidTransition> {
        use PaymentStatus::*;
        use PaymentTransition::*;

        match (self, on) {
            (Pending | Processing, BeginGatewayCall) => Ok(Processing),
            (Processing, GatewaySucceeded) => Ok(Succeeded),
            (Processing, GatewayFailed) => Ok(Failed),
            (Processing, GatewayTimedOut) => Ok(TimedOut),
            (Succeeded, Refund) => Ok(Refunded),
            (from, on) => Err(InvalidTransition {
                entity: "payment",
                from: from.as_str(),
                on: on.as_str(),
            }),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the gateway call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded { gateway_ref: String },
    Failed { reason: String },
    TimedOut,
}

impl PaymentOutcome {
    /// Event type and routing key announcing this outcome.
    pub fn event_type(&self) -> &'static str {
        match self {
            PaymentOutcome::Succeeded { .. } => crate::events::PAYMENT_SUCCEEDED,
            PaymentOutcome::Failed { .. } => crate::events::PAYMENT_FAILED,
            PaymentOutcome::TimedOut => crate::events::PAYMENT_TIMED_OUT,
        }
    }

    pub fn transition(&self) -> PaymentTransition {
        match self {
            PaymentOutcome::Succeeded { .. } => PaymentTransition::GatewaySucceeded,
            PaymentOutcome::Failed { .. } => PaymentTransition::GatewayFailed,
            PaymentOutcome::TimedOut => PaymentTransition::GatewayTimedOut,
        }
    }

    pub fn gateway_ref(&self) -> Option<&str> {
        match self {
            PaymentOutcome::Succeeded { gateway_ref } => Some(gateway_ref),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            PaymentOutcome::Failed { reason } => Some(reason),
            PaymentOutcome::TimedOut => Some("gateway did not respond before the deadline"),
            PaymentOutcome::Succeeded { .. } => None,
        }
    }

    /// Whether the booking's reserved capacity must be given back.
    pub fn releases_inventory(&self) -> bool {
        !matches!(self, PaymentOutcome::Succeeded { .. })
    }
}

/// The single payment attached to a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub idempotency_key: String,
    pub gateway_ref: Option<String>,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Idempotency key derived from the booking; one payment per booking.
    pub fn idempotency_key_for(booking_id: Uuid) -> String {
        format!("booking:{}", booking_id)
    }
}

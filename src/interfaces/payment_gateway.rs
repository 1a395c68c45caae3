//! External payment gateway interface.

use async_trait::async_trait;
use uuid::Uuid;

/// A charge to submit to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    /// Lets the gateway deduplicate a charge retried after a crash.
    pub idempotency_key: String,
}

/// Gateway acknowledgement of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub gateway_ref: String,
}

/// Errors reported by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Charge declined: {0}")]
    Declined(String),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

/// The external payment gateway.
///
/// The processor bounds every call with its own deadline, so
/// implementations need not time out on their own.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError>;
}

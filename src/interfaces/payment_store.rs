//! Payment storage interface.

use async_trait::async_trait;
use uuid::Uuid;

use super::booking_store::Result;
use crate::domain::{Payment, PaymentOutcome};

/// What recording a gateway outcome did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The message id was already recorded; nothing changed.
    AlreadyProcessed,
    /// Payment updated and result event staged in the outbox.
    Recorded { payment: Payment, outbox_event_id: Uuid },
}

/// Interface for payment persistence.
///
/// Implementations:
/// - `SqlPaymentStore<Sqlite>`: SQLite storage
/// - `SqlPaymentStore<Postgres>`: PostgreSQL storage
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fetch a payment by id.
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>>;

    /// Move a payment to `processing` before the gateway is called.
    ///
    /// Fails with `InvalidTransition` once the payment has settled.
    async fn begin_processing(&self, payment_id: Uuid) -> Result<Payment>;

    /// Record the gateway outcome.
    ///
    /// In one transaction: skip if `message_id` is already recorded; apply
    /// the outcome to the payment; stage the matching `payment.*` result
    /// event in the outbox; record `message_id`.
    async fn record_outcome(
        &self,
        message_id: &str,
        payment_id: Uuid,
        outcome: &PaymentOutcome,
    ) -> Result<RecordOutcome>;
}

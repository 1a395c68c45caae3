//! Payment processor.
//!
//! Handles `payment.initiated`:
//!
//! 1. Skip messages already recorded in `processed_events`
//! 2. Move the payment to `processing` (a settled payment short-circuits)
//! 3. Charge the gateway under a deadline
//! 4. Record the outcome, stage `payment.succeeded|failed|timed_out`, and
//!    record the message id, all in one transaction
//!
//! A crash between 2 and 4 leaves the payment in `processing`; the
//! redelivered message charges again under the same idempotency key.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use super::HandlerError;
use crate::domain::PaymentOutcome;
use crate::events::PaymentInitiated;
use crate::interfaces::{
    ChargeRequest, GatewayError, OutboxStore, PaymentGateway, PaymentStore, RecordOutcome,
    StorageError,
};

/// Payment processing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Deadline for one gateway call in milliseconds. Default: 10000.
    pub gateway_timeout_ms: u64,
    /// Latency of the simulated gateway in milliseconds. Default: 100.
    pub simulated_latency_ms: u64,
    /// Probability the simulated gateway declines. Default: 0.1.
    pub simulated_failure_rate: f64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            gateway_timeout_ms: 10_000,
            simulated_latency_ms: 100,
            simulated_failure_rate: 0.1,
        }
    }
}

impl PaymentsConfig {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

/// What handling a `payment.initiated` message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The message id was already recorded.
    Duplicate,
    /// The payment had settled under another message; nothing charged.
    AlreadySettled,
    /// The gateway was called and its outcome recorded.
    Recorded(PaymentOutcome),
}

/// Charges payments and stages their result events.
pub struct PaymentProcessor {
    payments: Arc<dyn PaymentStore>,
    outbox: Arc<dyn OutboxStore>,
    gateway: Arc<dyn PaymentGateway>,
    timeout: Duration,
}

impl PaymentProcessor {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        outbox: Arc<dyn OutboxStore>,
        gateway: Arc<dyn PaymentGateway>,
        timeout: Duration,
    ) -> Self {
        Self {
            payments,
            outbox,
            gateway,
            timeout,
        }
    }

    #[tracing::instrument(
        name = "payment.process",
        skip(self, event),
        fields(payment_id = %event.payment_id, booking_id = %event.booking_id)
    )]
    pub async fn handle(
        &self,
        message_id: &str,
        event: &PaymentInitiated,
    ) -> Result<ProcessOutcome, HandlerError> {
        if self.outbox.is_processed(message_id).await? {
            info!("Duplicate payment.initiated, skipping");
            return Ok(ProcessOutcome::Duplicate);
        }

        let payment = match self.payments.begin_processing(event.payment_id).await {
            Ok(payment) => payment,
            Err(StorageError::InvalidTransition(e)) => {
                warn!(error = %e, "Payment already settled, skipping charge");
                self.outbox.mark_processed(message_id).await?;
                return Ok(ProcessOutcome::AlreadySettled);
            }
            Err(e) => return Err(e.into()),
        };

        let request = ChargeRequest {
            payment_id: payment.id,
            booking_id: payment.booking_id,
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
            idempotency_key: payment.idempotency_key.clone(),
        };
        let outcome = self.charge(&request).await;

        match self
            .payments
            .record_outcome(message_id, payment.id, &outcome)
            .await?
        {
            RecordOutcome::AlreadyProcessed => Ok(ProcessOutcome::Duplicate),
            RecordOutcome::Recorded {
                outbox_event_id, ..
            } => {
                info!(
                    outcome = outcome.event_type(),
                    outbox_event_id = %outbox_event_id,
                    "Payment settled"
                );
                Ok(ProcessOutcome::Recorded(outcome))
            }
        }
    }

    async fn charge(&self, request: &ChargeRequest) -> PaymentOutcome {
        match tokio::time::timeout(self.timeout, self.gateway.charge(request)).await {
            Ok(Ok(receipt)) => PaymentOutcome::Succeeded {
                gateway_ref: receipt.gateway_ref,
            },
            Ok(Err(GatewayError::Declined(reason))) => PaymentOutcome::Failed { reason },
            Ok(Err(e @ GatewayError::Unavailable(_))) => PaymentOutcome::Failed {
                reason: e.to_string(),
            },
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Gateway call timed out");
                PaymentOutcome::TimedOut
            }
        }
    }
}


//! Booking saga.
//!
//! Consumes `payment.succeeded`, `payment.failed` and `payment.timed_out`
//! and finalizes the booking:
//!
//! | payment   | booking   | inventory per night           |
//! |-----------|-----------|-------------------------------|
//! | succeeded | confirmed | unchanged                     |
//! | failed    | failed    | `max(0, booked_count - 1)`    |
//! | timed_out | cancelled | `max(0, booked_count - 1)`    |
//!
//! The store applies the transition, the compensation, the notification
//! event and the processed marker in one transaction. A result for a
//! booking that is no longer pending is recorded and ignored.

use std::sync::Arc;

use tracing::{info, warn};

use super::HandlerError;
use crate::domain::PaymentOutcome;
use crate::events::PaymentResult;
use crate::interfaces::{BookingStore, SettleOutcome};

pub struct SagaOrchestrator {
    bookings: Arc<dyn BookingStore>,
}

impl SagaOrchestrator {
    pub fn new(bookings: Arc<dyn BookingStore>) -> Self {
        Self { bookings }
    }

    #[tracing::instrument(
        name = "saga.settle",
        skip(self, result, outcome),
        fields(booking_id = %result.booking_id, outcome = outcome.event_type())
    )]
    pub async fn handle(
        &self,
        message_id: &str,
        result: &PaymentResult,
        outcome: &PaymentOutcome,
    ) -> Result<SettleOutcome, HandlerError> {
        let settled = self.bookings.settle(message_id, result, outcome).await?;

        match &settled {
            SettleOutcome::AlreadyProcessed => {
                info!("Duplicate payment result, skipping");
            }
            SettleOutcome::Applied {
                from,
                to,
                released_nights,
            } => {
                info!(%from, %to, released_nights, "Booking settled");
            }
            SettleOutcome::Ignored { status } => {
                warn!(%status, "Payment result for a booking that is not pending");
            }
        }

        Ok(settled)
    }
}

//! Coordination services.
//!
//! - `BookingService`: lock, reserve, release on the request path
//! - `PaymentProcessor`: charges the gateway for `payment.initiated`
//! - `SagaOrchestrator`: settles bookings from `payment.*` results
//! - `Dispatcher`: routes an inbound delivery and decides its disposition

pub mod booking;
pub mod dispatch;
pub mod payment_processor;
pub mod saga;

pub use booking::{BookingError, BookingService, ErrorKind};
pub use dispatch::{Dispatcher, Disposition, IncomingMessage};
pub use payment_processor::{PaymentProcessor, PaymentsConfig, ProcessOutcome};
pub use saga::SagaOrchestrator;

use crate::interfaces::StorageError;

/// Failure of a message handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Redelivery cannot succeed.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl HandlerError {
    /// Whether the message should be dead-lettered rather than redelivered.
    ///
    /// Missing rows, refused transitions and undecodable rows will look the
    /// same on every delivery. Database and conflict errors may clear up.
    pub fn is_permanent(&self) -> bool {
        match self {
            HandlerError::Permanent(_) => true,
            HandlerError::Storage(e) => matches!(
                e,
                StorageError::NotFound { .. }
                    | StorageError::InvalidTransition(_)
                    | StorageError::Corrupt { .. }
                    | StorageError::Serialization(_)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InvalidTransition;

    #[test]
    fn test_permanence() {
        assert!(HandlerError::Permanent("bad".into()).is_permanent());
        assert!(HandlerError::from(StorageError::NotFound {
            entity: "payment",
            id: "p".into()
        })
        .is_permanent());
        assert!(HandlerError::from(StorageError::InvalidTransition(InvalidTransition {
            entity: "payment",
            from: "succeeded",
            on: "begin_gateway_call",
        }))
        .is_permanent());
        assert!(!HandlerError::from(StorageError::Conflict("busy".into())).is_permanent());
        assert!(!HandlerError::from(StorageError::Database(sqlx::Error::PoolTimedOut))
            .is_permanent());
    }
}

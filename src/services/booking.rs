//! Booking creation on the request path.
//!
//! ```text
//! acquire lock(s) ──► reserve (one DB transaction) ──► release lock(s)
//!                      │ check capacity for every night
//!                      │ increment booked_count
//!                      │ insert booking + payment
//!                      └ append payment.initiated to the outbox
//! ```
//!
//! The locks bracket the whole check-then-update. They are released on
//! every exit path: explicitly after the transaction, or by the guards'
//! drop when the future is cancelled or panics.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Booking, InvalidRange, StayRange};
use crate::interfaces::{BookingStore, LockError, ReservationRequest, StorageError};
use crate::lock::{release_all, DistributedLock, LockScope};

/// Caller-facing error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Another booking holds the room; retry later.
    LockBusy,
    /// No capacity left for the stay.
    NotAvailable,
    /// Duplicate identity or idempotency key.
    Conflict,
    NotFound,
    /// Malformed request, such as an empty stay.
    Invalid,
    /// Infrastructure failure.
    Internal,
}

impl ErrorKind {
    /// Whether the caller should see a 409-equivalent.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ErrorKind::LockBusy | ErrorKind::NotAvailable | ErrorKind::Conflict
        )
    }
}

/// Errors from [`BookingService`].
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Room {room_id} not available on {dates:?}")]
    NotAvailable {
        room_id: Uuid,
        dates: Vec<NaiveDate>,
    },

    #[error("Lock failed: {0}")]
    LockFailed(#[from] LockError),

    #[error("{0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::NotAvailable { .. } => ErrorKind::NotAvailable,
            BookingError::LockFailed(LockError::Busy { .. }) => ErrorKind::LockBusy,
            BookingError::LockFailed(_) => ErrorKind::Internal,
            BookingError::NotFound(_) => ErrorKind::NotFound,
            BookingError::Conflict(_) => ErrorKind::Conflict,
            BookingError::InvalidRange(_) => ErrorKind::Invalid,
            BookingError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<StorageError> for BookingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotAvailable { room_id, dates } => {
                BookingError::NotAvailable { room_id, dates }
            }
            StorageError::NotFound { .. } => BookingError::NotFound(err.to_string()),
            StorageError::Conflict(msg) => BookingError::Conflict(msg),
            other => BookingError::Internal(other.to_string()),
        }
    }
}

/// Creates bookings under the room lock.
pub struct BookingService {
    lock: DistributedLock,
    bookings: Arc<dyn BookingStore>,
    scope: LockScope,
}

impl BookingService {
    pub fn new(lock: DistributedLock, bookings: Arc<dyn BookingStore>, scope: LockScope) -> Self {
        Self {
            lock,
            bookings,
            scope,
        }
    }

    /// Reserve `room_id` for the nights `[start, end)` and return the
    /// pending booking.
    ///
    /// Confirmation is asynchronous: the booking becomes `confirmed`,
    /// `failed` or `cancelled` once its payment settles.
    #[tracing::instrument(
        name = "booking.create",
        skip(self),
        fields(booking_id = tracing::field::Empty)
    )]
    pub async fn create_booking(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Booking, BookingError> {
        let stay = StayRange::new(start, end)?;
        let keys = self.scope.keys_for(room_id, &stay);
        let guards = self.lock.acquire_all(&keys).await?;

        let request = ReservationRequest {
            booking_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            user_id,
            room_id,
            stay,
        };
        tracing::Span::current().record("booking_id", tracing::field::display(request.booking_id));

        let outcome = self.bookings.reserve(&request).await;
        release_all(guards).await;

        match outcome {
            Ok(reservation) => {
                info!(
                    nights = reservation.booking.stay.night_count(),
                    total_cents = reservation.booking.total_cents,
                    "Booking reserved"
                );
                Ok(reservation.booking)
            }
            Err(e) => {
                warn!(error = %e, "Booking rejected");
                Err(e.into())
            }
        }
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        self.bookings
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking not found: {}", booking_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_booking_errors() {
        let room_id = Uuid::new_v4();
        let err = BookingError::from(StorageError::NotAvailable {
            room_id,
            dates: vec![],
        });
        assert_eq!(err.kind(), ErrorKind::NotAvailable);

        let err = BookingError::from(StorageError::Conflict("dup".into()));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = BookingError::from(StorageError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_busy_lock_is_a_conflict() {
        let err = BookingError::from(LockError::Busy {
            key: "room:1:2025-06-01".into(),
            attempts: 3,
        });
        assert_eq!(err.kind(), ErrorKind::LockBusy);
        assert!(err.kind().is_conflict());
        assert!(!ErrorKind::Internal.is_conflict());
    }
}

//! Booking storage interface.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::{
    Booking, BookingStatus, InvalidTransition, InventoryCounter, Payment, PaymentOutcome,
    RoomRate, StayRange,
};
use crate::events::PaymentResult;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("No capacity for room {room_id} on {dates:?}")]
    NotAvailable {
        room_id: Uuid,
        dates: Vec<NaiveDate>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        StorageError::Corrupt {
            table,
            detail: detail.into(),
        }
    }
}

/// Input to [`BookingStore::reserve`].
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub room_id: Uuid,
    pub stay: StayRange,
}

/// Everything [`BookingStore::reserve`] committed.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub booking: Booking,
    pub payment: Payment,
    /// Id of the `payment.initiated` outbox row.
    pub outbox_event_id: Uuid,
}

/// What applying a payment result did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The message id was already recorded; nothing changed.
    AlreadyProcessed,
    /// The booking moved to a final status.
    Applied {
        from: BookingStatus,
        to: BookingStatus,
        /// Nights whose `booked_count` was decremented.
        released_nights: usize,
    },
    /// The booking was not pending; the result was recorded but not applied.
    Ignored { status: BookingStatus },
}

/// Interface for booking and inventory persistence.
///
/// Every mutating method is one local transaction.
///
/// Implementations:
/// - `SqlBookingStore<Sqlite>`: SQLite storage
/// - `SqlBookingStore<Postgres>`: PostgreSQL storage
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Reserve capacity and record the booking.
    ///
    /// In one transaction: fail with `NotAvailable` if any night of the stay
    /// is full or has no inventory row; increment `booked_count` for every
    /// night; insert the pending booking, its pending payment, and a
    /// `payment.initiated` outbox event. Callers hold the room lock.
    async fn reserve(&self, request: &ReservationRequest) -> Result<Reservation>;

    /// Apply a settled payment to its booking.
    ///
    /// In one transaction: skip if `message_id` is already recorded; move a
    /// pending booking to its final status; give back one unit of capacity
    /// per night (never below zero) when the payment did not succeed; stage a
    /// booking notification event; record `message_id`.
    async fn settle(
        &self,
        message_id: &str,
        result: &PaymentResult,
        outcome: &PaymentOutcome,
    ) -> Result<SettleOutcome>;

    /// Fetch a booking by id.
    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>>;

    /// Read the counter for one room night.
    async fn get_inventory(&self, room_id: Uuid, date: NaiveDate)
        -> Result<Option<InventoryCounter>>;

    /// Create or resize the counter for one room night.
    ///
    /// Resizing never touches `booked_count`. A negative total, or one below
    /// the current `booked_count`, fails with [`StorageError::Conflict`] and
    /// changes nothing.
    async fn set_capacity(&self, room_id: Uuid, date: NaiveDate, total: i64) -> Result<()>;

    /// Create or replace a room's nightly rate.
    async fn set_room_rate(&self, rate: &RoomRate) -> Result<()>;
}

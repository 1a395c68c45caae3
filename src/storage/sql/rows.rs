//! Row types shared by the SQL backends.
//!
//! Columns are decoded into plain strings and integers by `sqlx::FromRow`,
//! then parsed into domain types here so both backends share one mapping.

use uuid::Uuid;

use crate::domain::{
    parse_date_key, parse_timestamp, Booking, BookingStatus, InventoryCounter, Payment,
    PaymentStatus, StayRange,
};
use crate::events::OutboxEvent;
use crate::interfaces::{booking_store::Result, StorageError};

fn parse_uuid(table: &'static str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| StorageError::corrupt(table, format!("bad uuid '{}': {}", value, e)))
}

fn parse_at(table: &'static str, value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    parse_timestamp(value)
        .ok_or_else(|| StorageError::corrupt(table, format!("bad timestamp '{}'", value)))
}

fn parse_date(table: &'static str, value: &str) -> Result<chrono::NaiveDate> {
    parse_date_key(value)
        .ok_or_else(|| StorageError::corrupt(table, format!("bad date '{}'", value)))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookingRow {
    pub id: String,
    pub user_id: String,
    pub room_id: String,
    pub start_date: String,
    pub end_date: String,
    pub total_price: i64,
    pub currency: String,
    pub status: String,
    pub created_at: String,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StorageError;

    fn try_from(row: BookingRow) -> Result<Self> {
        const TABLE: &str = "bookings";
        let stay = StayRange::new(
            parse_date(TABLE, &row.start_date)?,
            parse_date(TABLE, &row.end_date)?,
        )
        .map_err(|e| StorageError::corrupt(TABLE, e.to_string()))?;
        let status = BookingStatus::parse(&row.status)
            .ok_or_else(|| StorageError::corrupt(TABLE, format!("bad status '{}'", row.status)))?;

        Ok(Booking {
            id: parse_uuid(TABLE, &row.id)?,
            user_id: parse_uuid(TABLE, &row.user_id)?,
            room_id: parse_uuid(TABLE, &row.room_id)?,
            stay,
            total_cents: row.total_price,
            currency: row.currency,
            status,
            created_at: parse_at(TABLE, &row.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct InventoryRow {
    pub room_id: String,
    pub date: String,
    pub total_inventory: i64,
    pub booked_count: i64,
}

impl TryFrom<InventoryRow> for InventoryCounter {
    type Error = StorageError;

    fn try_from(row: InventoryRow) -> Result<Self> {
        Ok(InventoryCounter {
            room_id: parse_uuid("inventory", &row.room_id)?,
            date: parse_date("inventory", &row.date)?,
            total_inventory: row.total_inventory,
            booked_count: row.booked_count,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PaymentRow {
    pub id: String,
    pub booking_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub idempotency_key: String,
    pub gateway_ref: Option<String>,
    pub failed_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StorageError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        const TABLE: &str = "payments";
        let status = PaymentStatus::parse(&row.status)
            .ok_or_else(|| StorageError::corrupt(TABLE, format!("bad status '{}'", row.status)))?;

        Ok(Payment {
            id: parse_uuid(TABLE, &row.id)?,
            booking_id: parse_uuid(TABLE, &row.booking_id)?,
            amount_cents: row.amount,
            currency: row.currency,
            status,
            idempotency_key: row.idempotency_key,
            gateway_ref: row.gateway_ref,
            failed_reason: row.failed_reason,
            created_at: parse_at(TABLE, &row.created_at)?,
            updated_at: parse_at(TABLE, &row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OutboxRow {
    pub id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: String,
    pub published_at: Option<String>,
    pub retry_count: i64,
    pub created_at: String,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = StorageError;

    fn try_from(row: OutboxRow) -> Result<Self> {
        const TABLE: &str = "outbox_events";
        Ok(OutboxEvent {
            id: parse_uuid(TABLE, &row.id)?,
            aggregate_type: row.aggregate_type,
            aggregate_id: parse_uuid(TABLE, &row.aggregate_id)?,
            event_type: row.event_type,
            payload: row.payload,
            created_at: parse_at(TABLE, &row.created_at)?,
            published_at: row
                .published_at
                .as_deref()
                .map(|at| parse_at(TABLE, at))
                .transpose()?,
            retry_count: row.retry_count,
        })
    }
}

/// Rows into domain values, failing on the first corrupt row.
pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StorageError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Map a unique-constraint violation to [`StorageError::Conflict`].
pub(crate) fn conflict_on_unique(e: sqlx::Error, what: impl Into<String>) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict(what.into()),
        _ => StorageError::Database(e),
    }
}

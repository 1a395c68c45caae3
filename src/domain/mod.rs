//! Domain model for bookings, payments, and room inventory.
//!
//! Everything here is pure: status enums, their transition rules, and the
//! stay-range arithmetic. Storage and messaging code call into these types
//! rather than encoding the rules in SQL.

mod booking;
mod inventory;
mod payment;

pub use booking::{Booking, BookingStatus, InvalidRange, StayRange};
pub use inventory::{InventoryCounter, RoomRate};
pub use payment::{Payment, PaymentOutcome, PaymentStatus, PaymentTransition};

/// A state machine refused a transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {entity} transition from '{from}' on '{on}'")]
pub struct InvalidTransition {
    /// Which state machine rejected the transition.
    pub entity: &'static str,
    /// State the entity was in.
    pub from: &'static str,
    /// The event that could not be applied.
    pub on: &'static str,
}

/// Format a date the way it appears in lock keys and date columns.
pub fn date_key(date: chrono::NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a date column value written by [`date_key`].
pub fn parse_date_key(value: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Current time rendered for timestamp columns.
///
/// Fixed microsecond precision keeps lexical and chronological order equal.
pub fn timestamp_now() -> String {
    format_timestamp(chrono::Utc::now())
}

/// Render a timestamp for storage.
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&chrono::Utc))
}

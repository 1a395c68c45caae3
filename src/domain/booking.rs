//! Booking aggregate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{InvalidTransition, PaymentOutcome};

/// Booking lifecycle.
///
/// A booking is created `Pending` with capacity already reserved. The saga
/// moves it to exactly one of the other states once the payment settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Failed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "failed" => Some(BookingStatus::Failed),
            _ => None,
        }
    }

    /// Whether the booking holds reserved capacity.
    pub fn holds_inventory(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Apply a settled payment to a pending booking.
    ///
    /// Success confirms; a gateway failure fails the booking; a timeout
    /// cancels it. Any other starting state is rejected so that a late or
    /// duplicated result cannot flip a settled booking.
    pub fn settle(self, outcome: &PaymentOutcome) -> Result<BookingStatus, InvalidTransition> {
        match (self, outcome) {
            (BookingStatus::Pending, PaymentOutcome::Succeeded { .. }) => {
                Ok(BookingStatus::Confirmed)
            }
            (BookingStatus::Pending, PaymentOutcome::Failed { .. }) => Ok(BookingStatus::Failed),
            (BookingStatus::Pending, PaymentOutcome::TimedOut) => Ok(BookingStatus::Cancelled),
            (from, outcome) => Err(InvalidTransition {
                entity: "booking",
                from: from.as_str(),
                on: outcome.event_type(),
            }),
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stay range was empty or inverted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stay must end after it starts: {start} .. {end}")]
pub struct InvalidRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Nights of a stay: `start` inclusive, `end` (checkout day) exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl StayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        if end <= start {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of nights in the stay.
    pub fn night_count(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Every night of the stay in ascending order.
    pub fn nights(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

/// A reservation of one room over a stay range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub room_id: Uuid,
    pub stay: StayRange,
    pub total_cents: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

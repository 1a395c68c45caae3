//! Per-night room capacity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capacity counter for one room on one night.
///
/// Committed state always satisfies `0 <= booked_count <= total_inventory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCounter {
    pub room_id: Uuid,
    pub date: NaiveDate,
    pub total_inventory: i64,
    pub booked_count: i64,
}

impl InventoryCounter {
    pub fn available(&self) -> i64 {
        (self.total_inventory - self.booked_count).max(0)
    }

    pub fn is_full(&self) -> bool {
        self.booked_count >= self.total_inventory
    }
}

/// Nightly price of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRate {
    pub room_id: Uuid,
    pub price_cents: i64,
    pub currency: String,
}

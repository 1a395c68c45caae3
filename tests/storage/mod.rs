//! Shared storage integration tests.
//!
//! Tests the BookingStore, PaymentStore and OutboxStore interfaces against
//! all implementations. Each backend module calls these functions with its
//! own stores. Every test works on freshly generated room and booking ids,
//! so the suites can share one database.

#![allow(dead_code)]

pub mod booking_store_tests;
pub mod outbox_store_tests;
pub mod payment_store_tests;

use chrono::NaiveDate;
use uuid::Uuid;

use innkeep::domain::{RoomRate, StayRange};
use innkeep::interfaces::{BookingStore, Reservation, ReservationRequest};

pub const PRICE_CENTS: i64 = 12_500;

pub fn night(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 7, day).expect("valid date")
}

pub fn stay(from: u32, to: u32) -> StayRange {
    StayRange::new(night(from), night(to)).expect("valid stay")
}

/// Create a priced room with `capacity` on nights `[from, to)`.
pub async fn seed_room<B: BookingStore>(store: &B, from: u32, to: u32, capacity: i64) -> Uuid {
    let room_id = Uuid::new_v4();
    store
        .set_room_rate(&RoomRate {
            room_id,
            price_cents: PRICE_CENTS,
            currency: "EUR".into(),
        })
        .await
        .expect("set_room_rate should succeed");
    for day in from..to {
        store
            .set_capacity(room_id, night(day), capacity)
            .await
            .expect("set_capacity should succeed");
    }
    room_id
}

pub fn request(room_id: Uuid, stay: StayRange) -> ReservationRequest {
    ReservationRequest {
        booking_id: Uuid::new_v4(),
        payment_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        room_id,
        stay,
    }
}

pub async fn reserve<B: BookingStore>(store: &B, room_id: Uuid, stay: StayRange) -> Reservation {
    store
        .reserve(&request(room_id, stay))
        .await
        .expect("reserve should succeed")
}

pub async fn booked<B: BookingStore>(store: &B, room_id: Uuid, day: u32) -> i64 {
    store
        .get_inventory(room_id, night(day))
        .await
        .expect("get_inventory should succeed")
        .expect("counter should exist")
        .booked_count
}

//! BookingStore interface tests.
//!
//! These tests verify the contract of the BookingStore trait.
//! Each storage implementation should run these tests.

use innkeep::domain::{BookingStatus, PaymentOutcome, PaymentStatus};
use innkeep::events::{PaymentResult, PAYMENT_INITIATED};
use innkeep::interfaces::{BookingStore, OutboxStore, PaymentStore, SettleOutcome, StorageError};
use uuid::Uuid;

use super::{booked, night, request, reserve, seed_room, stay, PRICE_CENTS};

fn result_for(reservation: &innkeep::interfaces::Reservation) -> PaymentResult {
    PaymentResult {
        payment_id: reservation.payment.id,
        booking_id: reservation.booking.id,
        reason: None,
        gateway_ref: None,
    }
}

fn declined() -> PaymentOutcome {
    PaymentOutcome::Failed {
        reason: "card declined".into(),
    }
}

// =============================================================================
// BookingStore::reserve tests
// =============================================================================

pub async fn test_reserve_books_every_night<B, P, O>(bookings: &B, payments: &P, outbox: &O)
where
    B: BookingStore,
    P: PaymentStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 4, 2).await;
    let reservation = reserve(bookings, room_id, stay(1, 4)).await;

    for day in 1..4 {
        assert_eq!(booked(bookings, room_id, day).await, 1, "night {} booked", day);
    }

    let booking = bookings
        .get_booking(reservation.booking.id)
        .await
        .unwrap()
        .expect("booking should be stored");
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.total_cents, PRICE_CENTS * 3);
    assert_eq!(booking.currency, "EUR");
    assert_eq!(booking.stay, stay(1, 4));

    let payment = payments
        .get_payment(reservation.payment.id)
        .await
        .unwrap()
        .expect("payment should be stored");
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount_cents, PRICE_CENTS * 3);
    assert_eq!(payment.idempotency_key, format!("booking:{}", booking.id));

    let staged = outbox
        .list_unpublished(10_000)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.id == reservation.outbox_event_id)
        .expect("payment.initiated should be staged");
    assert_eq!(staged.event_type, PAYMENT_INITIATED);
    assert_eq!(staged.aggregate_id, payment.id);
    let body: serde_json::Value = serde_json::from_str(&staged.payload).unwrap();
    assert_eq!(body["amount"], PRICE_CENTS * 3);
    assert_eq!(body["booking_id"], booking.id.to_string());
}

pub async fn test_reserve_full_night_changes_nothing<B: BookingStore>(bookings: &B) {
    let room_id = seed_room(bookings, 1, 4, 1).await;
    reserve(bookings, room_id, stay(2, 3)).await;

    let rejected = request(room_id, stay(1, 4));
    let err = bookings.reserve(&rejected).await.unwrap_err();
    match err {
        StorageError::NotAvailable { dates, .. } => assert_eq!(dates, vec![night(2)]),
        other => panic!("expected NotAvailable, got {:?}", other),
    }

    assert_eq!(booked(bookings, room_id, 1).await, 0, "rolled back");
    assert_eq!(booked(bookings, room_id, 3).await, 0, "rolled back");
    assert!(bookings
        .get_booking(rejected.booking_id)
        .await
        .unwrap()
        .is_none());
}

pub async fn test_reserve_without_inventory_row<B: BookingStore>(bookings: &B) {
    // Nights 1 and 2 seeded; night 3 has no counter.
    let room_id = seed_room(bookings, 1, 3, 5).await;
    let err = bookings
        .reserve(&request(room_id, stay(1, 4)))
        .await
        .unwrap_err();
    assert!(
        matches!(err, StorageError::NotAvailable { ref dates, .. } if dates == &vec![night(3)]),
        "got {:?}",
        err
    );
}

pub async fn test_reserve_unpriced_room<B: BookingStore>(bookings: &B) {
    let err = bookings
        .reserve(&request(Uuid::new_v4(), stay(1, 2)))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { entity: "room", .. }));
}

pub async fn test_reserve_duplicate_booking_id_conflicts<B: BookingStore>(bookings: &B) {
    let room_id = seed_room(bookings, 1, 2, 5).await;
    let first = request(room_id, stay(1, 2));
    bookings.reserve(&first).await.unwrap();

    let mut again = request(room_id, stay(1, 2));
    again.booking_id = first.booking_id;
    let err = bookings.reserve(&again).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)), "got {:?}", err);
    assert_eq!(booked(bookings, room_id, 1).await, 1, "second attempt rolled back");
}

pub async fn test_set_capacity_keeps_booked_count<B: BookingStore>(bookings: &B) {
    let room_id = seed_room(bookings, 1, 2, 1).await;
    reserve(bookings, room_id, stay(1, 2)).await;

    bookings.set_capacity(room_id, night(1), 4).await.unwrap();
    let counter = bookings
        .get_inventory(room_id, night(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counter.total_inventory, 4);
    assert_eq!(counter.booked_count, 1);
    assert_eq!(counter.available(), 3);
}

pub async fn test_set_capacity_never_below_booked<B: BookingStore>(bookings: &B) {
    let room_id = seed_room(bookings, 1, 2, 2).await;
    reserve(bookings, room_id, stay(1, 2)).await;
    reserve(bookings, room_id, stay(1, 2)).await;

    let shrink = bookings.set_capacity(room_id, night(1), 1).await;
    assert!(matches!(shrink, Err(StorageError::Conflict(_))));
    let negative = bookings.set_capacity(room_id, night(1), -5).await;
    assert!(matches!(negative, Err(StorageError::Conflict(_))));
    let fresh_negative = bookings.set_capacity(room_id, night(9), -1).await;
    assert!(matches!(fresh_negative, Err(StorageError::Conflict(_))));
    assert!(bookings.get_inventory(room_id, night(9)).await.unwrap().is_none());

    let counter = bookings
        .get_inventory(room_id, night(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counter.total_inventory, 2);
    assert_eq!(counter.booked_count, 2);

    // Shrinking down to exactly what is booked is allowed.
    bookings.set_capacity(room_id, night(1), 2).await.unwrap();
}

// =============================================================================
// BookingStore::settle tests
// =============================================================================

pub async fn test_settle_success_confirms<B: BookingStore>(bookings: &B) {
    let room_id = seed_room(bookings, 1, 3, 2).await;
    let reservation = reserve(bookings, room_id, stay(1, 3)).await;

    let outcome = PaymentOutcome::Succeeded {
        gateway_ref: "gw-1".into(),
    };
    let settled = bookings
        .settle(&Uuid::new_v4().to_string(), &result_for(&reservation), &outcome)
        .await
        .unwrap();

    assert_eq!(
        settled,
        SettleOutcome::Applied {
            from: BookingStatus::Pending,
            to: BookingStatus::Confirmed,
            released_nights: 0,
        }
    );
    assert_eq!(booked(bookings, room_id, 1).await, 1, "capacity stays reserved");
    assert_eq!(booked(bookings, room_id, 2).await, 1, "capacity stays reserved");
}

pub async fn test_settle_timeout_cancels_and_releases<B: BookingStore>(bookings: &B) {
    let room_id = seed_room(bookings, 1, 3, 2).await;
    let reservation = reserve(bookings, room_id, stay(1, 3)).await;

    let settled = bookings
        .settle(
            &Uuid::new_v4().to_string(),
            &result_for(&reservation),
            &PaymentOutcome::TimedOut,
        )
        .await
        .unwrap();

    assert_eq!(
        settled,
        SettleOutcome::Applied {
            from: BookingStatus::Pending,
            to: BookingStatus::Cancelled,
            released_nights: 2,
        }
    );
    assert_eq!(booked(bookings, room_id, 1).await, 0);
    assert_eq!(booked(bookings, room_id, 2).await, 0);
}

pub async fn test_settle_failure_fails_booking<B: BookingStore>(bookings: &B) {
    let room_id = seed_room(bookings, 1, 2, 3).await;
    let keep = reserve(bookings, room_id, stay(1, 2)).await;
    let reservation = reserve(bookings, room_id, stay(1, 2)).await;

    bookings
        .settle(&Uuid::new_v4().to_string(), &result_for(&reservation), &declined())
        .await
        .unwrap();

    let booking = bookings
        .get_booking(reservation.booking.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Failed);
    assert_eq!(booked(bookings, room_id, 1).await, 1, "only own night released");

    let untouched = bookings.get_booking(keep.booking.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, BookingStatus::Pending);
}

pub async fn test_settle_same_message_twice<B, O>(bookings: &B, outbox: &O)
where
    B: BookingStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 2, 2).await;
    let reservation = reserve(bookings, room_id, stay(1, 2)).await;
    let message_id = Uuid::new_v4().to_string();

    let first = bookings
        .settle(&message_id, &result_for(&reservation), &PaymentOutcome::TimedOut)
        .await
        .unwrap();
    assert!(matches!(first, SettleOutcome::Applied { .. }));
    assert!(outbox.is_processed(&message_id).await.unwrap());

    let second = bookings
        .settle(&message_id, &result_for(&reservation), &PaymentOutcome::TimedOut)
        .await
        .unwrap();
    assert_eq!(second, SettleOutcome::AlreadyProcessed);
    assert_eq!(booked(bookings, room_id, 1).await, 0, "released exactly once");
}

pub async fn test_settle_late_result_is_ignored<B, O>(bookings: &B, outbox: &O)
where
    B: BookingStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 2, 2).await;
    let reservation = reserve(bookings, room_id, stay(1, 2)).await;

    bookings
        .settle(
            &Uuid::new_v4().to_string(),
            &result_for(&reservation),
            &PaymentOutcome::Succeeded {
                gateway_ref: "gw-2".into(),
            },
        )
        .await
        .unwrap();

    // A contradicting result under a different message id.
    let late_id = Uuid::new_v4().to_string();
    let late = bookings
        .settle(&late_id, &result_for(&reservation), &PaymentOutcome::TimedOut)
        .await
        .unwrap();

    assert_eq!(
        late,
        SettleOutcome::Ignored {
            status: BookingStatus::Confirmed
        }
    );
    assert!(outbox.is_processed(&late_id).await.unwrap());
    assert_eq!(booked(bookings, room_id, 1).await, 1, "no compensation");
}

pub async fn test_settle_unknown_booking<B: BookingStore>(bookings: &B) {
    let err = bookings
        .settle(
            &Uuid::new_v4().to_string(),
            &PaymentResult {
                payment_id: Uuid::new_v4(),
                booking_id: Uuid::new_v4(),
                reason: None,
                gateway_ref: None,
            },
            &PaymentOutcome::TimedOut,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { entity: "booking", .. }));
}

pub async fn test_settle_stages_booking_event<B, O>(bookings: &B, outbox: &O)
where
    B: BookingStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 2, 1).await;
    let reservation = reserve(bookings, room_id, stay(1, 2)).await;

    bookings
        .settle(&Uuid::new_v4().to_string(), &result_for(&reservation), &declined())
        .await
        .unwrap();

    let staged = outbox
        .list_unpublished(10_000)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.aggregate_id == reservation.booking.id)
        .expect("booking event should be staged");
    assert_eq!(staged.event_type, "booking.failed");
    assert_eq!(staged.aggregate_type, "booking");
}

//! PaymentStore interface tests.
//!
//! These tests verify the contract of the PaymentStore trait.
//! Each storage implementation should run these tests.

use innkeep::domain::{PaymentOutcome, PaymentStatus};
use innkeep::events::{DomainEvent, PAYMENT_SUCCEEDED};
use innkeep::interfaces::{
    BookingStore, OutboxStore, PaymentStore, RecordOutcome, StorageError,
};
use uuid::Uuid;

use super::{reserve, seed_room, stay};

pub async fn test_get_nonexistent<P: PaymentStore>(payments: &P) {
    let result = payments
        .get_payment(Uuid::new_v4())
        .await
        .expect("get should succeed");
    assert!(result.is_none(), "nonexistent payment should be None");
}

pub async fn test_begin_processing_is_repeatable<B, P>(bookings: &B, payments: &P)
where
    B: BookingStore,
    P: PaymentStore,
{
    let room_id = seed_room(bookings, 1, 2, 1).await;
    let payment_id = reserve(bookings, room_id, stay(1, 2)).await.payment.id;

    let payment = payments.begin_processing(payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Processing);

    // A redelivered message after a crash mid-call starts over.
    let again = payments.begin_processing(payment_id).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Processing);
}

pub async fn test_begin_processing_unknown_payment<P: PaymentStore>(payments: &P) {
    let err = payments.begin_processing(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { entity: "payment", .. }));
}

pub async fn test_record_outcome_stages_result<B, P, O>(bookings: &B, payments: &P, outbox: &O)
where
    B: BookingStore,
    P: PaymentStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 2, 1).await;
    let reservation = reserve(bookings, room_id, stay(1, 2)).await;
    let payment_id = reservation.payment.id;
    let message_id = reservation.outbox_event_id.to_string();

    payments.begin_processing(payment_id).await.unwrap();
    let outcome = PaymentOutcome::Succeeded {
        gateway_ref: "gw-42".into(),
    };
    let recorded = payments
        .record_outcome(&message_id, payment_id, &outcome)
        .await
        .unwrap();

    let (payment, outbox_event_id) = match recorded {
        RecordOutcome::Recorded {
            payment,
            outbox_event_id,
        } => (payment, outbox_event_id),
        other => panic!("expected Recorded, got {:?}", other),
    };
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert_eq!(payment.gateway_ref.as_deref(), Some("gw-42"));
    assert!(outbox.is_processed(&message_id).await.unwrap());

    let stored = payments.get_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Succeeded);
    assert_eq!(stored.gateway_ref.as_deref(), Some("gw-42"));

    let staged = outbox
        .list_unpublished(10_000)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.id == outbox_event_id)
        .expect("result event should be staged");
    assert_eq!(staged.event_type, PAYMENT_SUCCEEDED);
    let decoded = DomainEvent::decode(&staged.event_type, staged.payload.as_bytes()).unwrap();
    let (result, decoded_outcome) = decoded.payment_outcome().expect("result event");
    assert_eq!(result.booking_id, reservation.booking.id);
    assert_eq!(decoded_outcome, outcome);
}

pub async fn test_record_outcome_twice_is_noop<B, P>(bookings: &B, payments: &P)
where
    B: BookingStore,
    P: PaymentStore,
{
    let room_id = seed_room(bookings, 1, 2, 1).await;
    let payment_id = reserve(bookings, room_id, stay(1, 2)).await.payment.id;
    let message_id = Uuid::new_v4().to_string();

    payments.begin_processing(payment_id).await.unwrap();
    payments
        .record_outcome(&message_id, payment_id, &PaymentOutcome::TimedOut)
        .await
        .unwrap();
    let second = payments
        .record_outcome(&message_id, payment_id, &PaymentOutcome::TimedOut)
        .await
        .unwrap();

    assert_eq!(second, RecordOutcome::AlreadyProcessed);
    let stored = payments.get_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::TimedOut);
    assert!(stored.failed_reason.is_some());
}

pub async fn test_settled_payment_refuses_new_call<B, P>(bookings: &B, payments: &P)
where
    B: BookingStore,
    P: PaymentStore,
{
    let room_id = seed_room(bookings, 1, 2, 1).await;
    let payment_id = reserve(bookings, room_id, stay(1, 2)).await.payment.id;

    payments.begin_processing(payment_id).await.unwrap();
    payments
        .record_outcome(
            &Uuid::new_v4().to_string(),
            payment_id,
            &PaymentOutcome::Failed {
                reason: "insufficient funds".into(),
            },
        )
        .await
        .unwrap();

    let err = payments.begin_processing(payment_id).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidTransition(_)), "got {:?}", err);

    let stored = payments.get_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(stored.failed_reason.as_deref(), Some("insufficient funds"));
}

//! OutboxStore interface tests.
//!
//! These tests verify the contract of the OutboxStore trait. Rows are
//! produced through `BookingStore::reserve`, the only writer of
//! `payment.initiated` events.

use chrono::Utc;
use innkeep::interfaces::{BookingStore, OutboxStore, StorageError};
use uuid::Uuid;

use super::{reserve, seed_room, stay};

// =============================================================================
// Publish bookkeeping
// =============================================================================

pub async fn test_mark_published_hides_event<B, O>(bookings: &B, outbox: &O)
where
    B: BookingStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 2, 1).await;
    let reservation = reserve(bookings, room_id, stay(1, 2)).await;
    let id = reservation.outbox_event_id;

    outbox.mark_published(id, Utc::now()).await.unwrap();

    let pending = outbox.list_unpublished(10_000).await.unwrap();
    assert!(pending.iter().all(|e| e.id != id), "published event still listed");
    assert!(!outbox.reset_retry(id).await.unwrap(), "published events are not retried");
}

pub async fn test_unpublished_oldest_first<B, O>(bookings: &B, outbox: &O)
where
    B: BookingStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 2, 3).await;
    let first = reserve(bookings, room_id, stay(1, 2)).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = reserve(bookings, room_id, stay(1, 2)).await;

    let ids: Vec<Uuid> = outbox
        .list_unpublished(10_000)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .filter(|id| *id == first.outbox_event_id || *id == second.outbox_event_id)
        .collect();
    assert_eq!(ids, vec![first.outbox_event_id, second.outbox_event_id]);

    let all = outbox.list_unpublished(10_000).await.unwrap();
    assert!(
        all.windows(2).all(|w| w[0].created_at <= w[1].created_at),
        "listing must be ordered by creation time"
    );
}

pub async fn test_increment_retry_counts_up<B, O>(bookings: &B, outbox: &O)
where
    B: BookingStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 2, 1).await;
    let id = reserve(bookings, room_id, stay(1, 2)).await.outbox_event_id;

    assert_eq!(outbox.increment_retry(id).await.unwrap(), 1);
    assert_eq!(outbox.increment_retry(id).await.unwrap(), 2);

    let event = outbox
        .list_unpublished(10_000)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.id == id)
        .expect("still pending");
    assert_eq!(event.retry_count, 2);
}

pub async fn test_increment_retry_unknown_event<O: OutboxStore>(outbox: &O) {
    let err = outbox.increment_retry(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }), "got {:?}", err);
}

/// `max_retries` must match the store under test.
pub async fn test_dead_letter_and_reset<B, O>(bookings: &B, outbox: &O, max_retries: i64)
where
    B: BookingStore,
    O: OutboxStore,
{
    let room_id = seed_room(bookings, 1, 2, 1).await;
    let id = reserve(bookings, room_id, stay(1, 2)).await.outbox_event_id;

    for _ in 0..=max_retries {
        outbox.increment_retry(id).await.unwrap();
    }

    assert!(outbox
        .list_unpublished(10_000)
        .await
        .unwrap()
        .iter()
        .all(|e| e.id != id));
    let dead = outbox.list_dead_letters(10_000).await.unwrap();
    assert!(dead.iter().any(|e| e.id == id), "should be dead-lettered");

    assert!(outbox.reset_retry(id).await.unwrap());
    let pending = outbox.list_unpublished(10_000).await.unwrap();
    let event = pending.iter().find(|e| e.id == id).expect("back in the queue");
    assert_eq!(event.retry_count, 0);
}

// =============================================================================
// Processed markers
// =============================================================================

pub async fn test_mark_processed_is_idempotent<O: OutboxStore>(outbox: &O) {
    let message_id = Uuid::new_v4().to_string();

    assert!(!outbox.is_processed(&message_id).await.unwrap());
    outbox.mark_processed(&message_id).await.unwrap();
    outbox
        .mark_processed(&message_id)
        .await
        .expect("second mark should be a no-op");
    assert!(outbox.is_processed(&message_id).await.unwrap());
}

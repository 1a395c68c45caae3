//! Outbox storage interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::booking_store::Result;
use crate::events::OutboxEvent;

/// Interface for the transactional outbox and the processed-message ledger.
///
/// Appending is deliberately absent: an outbox row is only ever written on
/// the connection of the transaction that produced it (see
/// `SqlOutboxStore::append`).
///
/// Implementations:
/// - `SqlOutboxStore<Sqlite>`: SQLite storage
/// - `SqlOutboxStore<Postgres>`: PostgreSQL storage
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Unpublished events still within the retry budget, oldest first.
    async fn list_unpublished(&self, limit: u64) -> Result<Vec<OutboxEvent>>;

    /// Mark an event as shipped to the broker.
    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Record a failed publish attempt; returns the new retry count.
    async fn increment_retry(&self, id: Uuid) -> Result<i64>;

    /// Unpublished events whose retry count exceeded the budget, oldest first.
    async fn list_dead_letters(&self, limit: u64) -> Result<Vec<OutboxEvent>>;

    /// Operator action: reset the retry count so the relay picks it up again.
    ///
    /// Returns `false` if no unpublished event has this id.
    async fn reset_retry(&self, id: Uuid) -> Result<bool>;

    /// Whether an inbound message was already applied.
    async fn is_processed(&self, message_id: &str) -> Result<bool>;

    /// Record an inbound message as applied. Recording twice is a no-op.
    async fn mark_processed(&self, message_id: &str) -> Result<()>;
}

//! Unified SQL OutboxStore implementation.
//!
//! Besides the pool-backed [`OutboxStore`] operations, each backend gets
//! connection-level functions (`append`, `is_processed_in`,
//! `mark_processed_in`) that run on the caller's open transaction, so an
//! event or a processed marker commits together with the business rows that
//! produced it.

use std::marker::PhantomData;

use super::SqlDatabase;

/// Default retry budget before an event is treated as dead-lettered.
pub const DEFAULT_MAX_RETRIES: i64 = 10;

/// SQL-based implementation of OutboxStore.
pub struct SqlOutboxStore<DB: SqlDatabase> {
    pool: DB::Pool,
    max_retries: i64,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlOutboxStore<DB> {
    /// Create a new SQL outbox store with the given pool.
    pub fn new(pool: DB::Pool) -> Self {
        Self::with_max_retries(pool, DEFAULT_MAX_RETRIES)
    }

    /// Create a store whose events dead-letter once `retry_count` exceeds
    /// `max_retries`.
    pub fn with_max_retries(pool: DB::Pool, max_retries: i64) -> Self {
        Self {
            pool,
            max_retries,
            _marker: PhantomData,
        }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }

    pub fn max_retries(&self) -> i64 {
        self.max_retries
    }
}

/// Macro to implement OutboxStore for a specific SQL backend.
///
/// `$conn` is the backend's connection type; transactions deref to it.
macro_rules! impl_outbox_store {
    ($db_type:ty, $feature:literal, $conn:ty) => {
        #[cfg(feature = $feature)]
        impl SqlOutboxStore<$db_type> {
            /// Append an event on an open transaction. Nothing is committed
            /// here; the row becomes visible when the caller commits.
            pub async fn append(
                conn: &mut $conn,
                event: &crate::events::OutboxEvent,
            ) -> crate::interfaces::booking_store::Result<()> {
                use sea_query::Query;

                use crate::domain::format_timestamp;
                use crate::storage::schema::OutboxEvents;

                let stmt = Query::insert()
                    .into_table(OutboxEvents::Table)
                    .columns(crate::storage::schema::OUTBOX_COLUMNS)
                    .values_panic([
                        event.id.to_string().into(),
                        event.aggregate_type.clone().into(),
                        event.aggregate_id.to_string().into(),
                        event.event_type.clone().into(),
                        event.payload.clone().into(),
                        event.published_at.map(format_timestamp).into(),
                        event.retry_count.into(),
                        format_timestamp(event.created_at).into(),
                    ])
                    .to_owned();

                let sql = <$db_type>::build_insert(stmt);
                sqlx::query(&sql).execute(&mut *conn).await?;

                tracing::debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Appended outbox event"
                );
                Ok(())
            }

            /// Whether `message_id` is recorded, read on an open transaction.
            pub async fn is_processed_in(
                conn: &mut $conn,
                message_id: &str,
            ) -> crate::interfaces::booking_store::Result<bool> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::ProcessedEvents;

                let stmt = Query::select()
                    .column(ProcessedEvents::EventId)
                    .from(ProcessedEvents::Table)
                    .and_where(Expr::col(ProcessedEvents::EventId).eq(message_id))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let row = sqlx::query(&sql).fetch_optional(&mut *conn).await?;
                Ok(row.is_some())
            }

            /// Record `message_id` on an open transaction. A second insert of
            /// the same id is ignored.
            pub async fn mark_processed_in(
                conn: &mut $conn,
                message_id: &str,
            ) -> crate::interfaces::booking_store::Result<()> {
                use sea_query::{OnConflict, Query};

                use crate::domain::timestamp_now;
                use crate::storage::schema::ProcessedEvents;

                let stmt = Query::insert()
                    .into_table(ProcessedEvents::Table)
                    .columns([ProcessedEvents::EventId, ProcessedEvents::ProcessedAt])
                    .values_panic([message_id.into(), timestamp_now().into()])
                    .on_conflict(
                        OnConflict::column(ProcessedEvents::EventId)
                            .do_nothing()
                            .to_owned(),
                    )
                    .to_owned();

                let sql = <$db_type>::build_insert(stmt);
                sqlx::query(&sql).execute(&mut *conn).await?;
                Ok(())
            }

            async fn list_where(
                &self,
                dead: bool,
                limit: u64,
            ) -> crate::interfaces::booking_store::Result<Vec<crate::events::OutboxEvent>> {
                use sea_query::{Expr, Order, Query};

                use crate::storage::schema::{OutboxEvents, OUTBOX_COLUMNS};
                use crate::storage::sql::rows::{convert_all, OutboxRow};

                let retry_filter = if dead {
                    Expr::col(OutboxEvents::RetryCount).gt(self.max_retries)
                } else {
                    Expr::col(OutboxEvents::RetryCount).lte(self.max_retries)
                };

                let stmt = Query::select()
                    .columns(OUTBOX_COLUMNS)
                    .from(OutboxEvents::Table)
                    .and_where(Expr::col(OutboxEvents::PublishedAt).is_null())
                    .and_where(retry_filter)
                    .order_by(OutboxEvents::CreatedAt, Order::Asc)
                    .order_by(OutboxEvents::Id, Order::Asc)
                    .limit(limit)
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let rows: Vec<OutboxRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
                convert_all(rows)
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::interfaces::OutboxStore for SqlOutboxStore<$db_type> {
            async fn list_unpublished(
                &self,
                limit: u64,
            ) -> crate::interfaces::booking_store::Result<Vec<crate::events::OutboxEvent>> {
                self.list_where(false, limit).await
            }

            async fn mark_published(
                &self,
                id: uuid::Uuid,
                at: chrono::DateTime<chrono::Utc>,
            ) -> crate::interfaces::booking_store::Result<()> {
                use sea_query::{Expr, Query};

                use crate::domain::format_timestamp;
                use crate::storage::schema::OutboxEvents;

                let stmt = Query::update()
                    .table(OutboxEvents::Table)
                    .value(OutboxEvents::PublishedAt, format_timestamp(at))
                    .and_where(Expr::col(OutboxEvents::Id).eq(id.to_string()))
                    .and_where(Expr::col(OutboxEvents::PublishedAt).is_null())
                    .to_owned();

                let sql = <$db_type>::build_update(stmt);
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            }

            async fn increment_retry(
                &self,
                id: uuid::Uuid,
            ) -> crate::interfaces::booking_store::Result<i64> {
                use sea_query::{Expr, Query};

                use crate::interfaces::StorageError;
                use crate::storage::schema::OutboxEvents;

                let mut tx = self.pool.begin().await?;

                let stmt = Query::update()
                    .table(OutboxEvents::Table)
                    .value(
                        OutboxEvents::RetryCount,
                        Expr::col(OutboxEvents::RetryCount).add(1),
                    )
                    .and_where(Expr::col(OutboxEvents::Id).eq(id.to_string()))
                    .to_owned();
                let sql = <$db_type>::build_update(stmt);
                let updated = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
                if updated == 0 {
                    return Err(StorageError::NotFound {
                        entity: "outbox event",
                        id: id.to_string(),
                    });
                }

                let stmt = Query::select()
                    .column(OutboxEvents::RetryCount)
                    .from(OutboxEvents::Table)
                    .and_where(Expr::col(OutboxEvents::Id).eq(id.to_string()))
                    .to_owned();
                let sql = <$db_type>::build_select(stmt);
                let (retry_count,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut *tx).await?;

                tx.commit().await?;
                Ok(retry_count)
            }

            async fn list_dead_letters(
                &self,
                limit: u64,
            ) -> crate::interfaces::booking_store::Result<Vec<crate::events::OutboxEvent>> {
                self.list_where(true, limit).await
            }

            async fn reset_retry(
                &self,
                id: uuid::Uuid,
            ) -> crate::interfaces::booking_store::Result<bool> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::OutboxEvents;

                let stmt = Query::update()
                    .table(OutboxEvents::Table)
                    .value(OutboxEvents::RetryCount, 0i64)
                    .and_where(Expr::col(OutboxEvents::Id).eq(id.to_string()))
                    .and_where(Expr::col(OutboxEvents::PublishedAt).is_null())
                    .to_owned();

                let sql = <$db_type>::build_update(stmt);
                let updated = sqlx::query(&sql).execute(&self.pool).await?.rows_affected();
                if updated > 0 {
                    tracing::info!(event_id = %id, "Outbox event retry count reset");
                }
                Ok(updated > 0)
            }

            async fn is_processed(
                &self,
                message_id: &str,
            ) -> crate::interfaces::booking_store::Result<bool> {
                let mut conn = self.pool.acquire().await?;
                Self::is_processed_in(&mut conn, message_id).await
            }

            async fn mark_processed(
                &self,
                message_id: &str,
            ) -> crate::interfaces::booking_store::Result<()> {
                let mut conn = self.pool.acquire().await?;
                Self::mark_processed_in(&mut conn, message_id).await
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_outbox_store!(super::postgres::Postgres, "postgres", sqlx::PgConnection);
impl_outbox_store!(super::sqlite::Sqlite, "sqlite", sqlx::SqliteConnection);

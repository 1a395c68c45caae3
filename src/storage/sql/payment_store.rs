//! Unified SQL PaymentStore implementation.

use std::marker::PhantomData;

use super::SqlDatabase;

/// SQL-based implementation of PaymentStore.
pub struct SqlPaymentStore<DB: SqlDatabase> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlPaymentStore<DB> {
    /// Create a new SQL payment store with the given pool.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }
}

/// Macro to implement PaymentStore for a specific SQL backend.
macro_rules! impl_payment_store {
    ($db_type:ty, $feature:literal, $conn:ty) => {
        #[cfg(feature = $feature)]
        impl SqlPaymentStore<$db_type> {
            async fn load_payment(
                conn: &mut $conn,
                payment_id: uuid::Uuid,
            ) -> crate::interfaces::booking_store::Result<Option<crate::domain::Payment>> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::{Payments, PAYMENT_COLUMNS};
                use crate::storage::sql::rows::PaymentRow;

                let stmt = Query::select()
                    .columns(PAYMENT_COLUMNS)
                    .from(Payments::Table)
                    .and_where(Expr::col(Payments::Id).eq(payment_id.to_string()))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let row: Option<PaymentRow> =
                    sqlx::query_as(&sql).fetch_optional(&mut *conn).await?;
                row.map(crate::domain::Payment::try_from).transpose()
            }

            /// Write status, gateway reference, failure reason and
            /// `updated_at`, guarded on the status read by the caller.
            async fn store_status(
                conn: &mut $conn,
                previous: crate::domain::PaymentStatus,
                payment: &crate::domain::Payment,
            ) -> crate::interfaces::booking_store::Result<()> {
                use sea_query::{Expr, Query};

                use crate::domain::format_timestamp;
                use crate::interfaces::StorageError;
                use crate::storage::schema::Payments;

                let stmt = Query::update()
                    .table(Payments::Table)
                    .value(Payments::Status, payment.status.as_str())
                    .value(Payments::GatewayRef, payment.gateway_ref.clone())
                    .value(Payments::FailedReason, payment.failed_reason.clone())
                    .value(Payments::UpdatedAt, format_timestamp(payment.updated_at))
                    .and_where(Expr::col(Payments::Id).eq(payment.id.to_string()))
                    .and_where(Expr::col(Payments::Status).eq(previous.as_str()))
                    .to_owned();

                let sql = <$db_type>::build_update(stmt);
                let updated = sqlx::query(&sql).execute(&mut *conn).await?.rows_affected();
                if updated != 1 {
                    return Err(StorageError::Conflict(format!(
                        "payment {} changed concurrently",
                        payment.id
                    )));
                }
                Ok(())
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::interfaces::PaymentStore for SqlPaymentStore<$db_type> {
            async fn get_payment(
                &self,
                payment_id: uuid::Uuid,
            ) -> crate::interfaces::booking_store::Result<Option<crate::domain::Payment>> {
                let mut conn = self.pool.acquire().await?;
                Self::load_payment(&mut conn, payment_id).await
            }

            async fn begin_processing(
                &self,
                payment_id: uuid::Uuid,
            ) -> crate::interfaces::booking_store::Result<crate::domain::Payment> {
                use crate::domain::PaymentTransition;
                use crate::interfaces::StorageError;

                let mut tx = self.pool.begin().await?;

                let mut payment = Self::load_payment(&mut tx, payment_id)
                    .await?
                    .ok_or_else(|| StorageError::NotFound {
                        entity: "payment",
                        id: payment_id.to_string(),
                    })?;

                let previous = payment.status;
                payment.status = previous.transition(PaymentTransition::BeginGatewayCall)?;
                payment.updated_at = chrono::Utc::now();
                Self::store_status(&mut tx, previous, &payment).await?;

                tx.commit().await?;

                tracing::debug!(payment_id = %payment_id, from = %previous, "Payment processing");
                Ok(payment)
            }

            async fn record_outcome(
                &self,
                message_id: &str,
                payment_id: uuid::Uuid,
                outcome: &crate::domain::PaymentOutcome,
            ) -> crate::interfaces::booking_store::Result<crate::interfaces::RecordOutcome> {
                use crate::events::{DomainEvent, OutboxEvent};
                use crate::interfaces::{RecordOutcome, StorageError};
                use crate::storage::sql::SqlOutboxStore;

                let mut tx = self.pool.begin().await?;

                if SqlOutboxStore::<$db_type>::is_processed_in(&mut tx, message_id).await? {
                    return Ok(RecordOutcome::AlreadyProcessed);
                }

                let mut payment = Self::load_payment(&mut tx, payment_id)
                    .await?
                    .ok_or_else(|| StorageError::NotFound {
                        entity: "payment",
                        id: payment_id.to_string(),
                    })?;

                let previous = payment.status;
                payment.status = previous.transition(outcome.transition())?;
                payment.gateway_ref = outcome.gateway_ref().map(str::to_string);
                payment.failed_reason = outcome.failure_reason().map(str::to_string);
                payment.updated_at = chrono::Utc::now();
                Self::store_status(&mut tx, previous, &payment).await?;

                let event = OutboxEvent::stage(&DomainEvent::payment_result(
                    payment.id,
                    payment.booking_id,
                    outcome,
                ))?;
                SqlOutboxStore::<$db_type>::append(&mut tx, &event).await?;
                SqlOutboxStore::<$db_type>::mark_processed_in(&mut tx, message_id).await?;

                tx.commit().await?;

                tracing::info!(
                    payment_id = %payment.id,
                    booking_id = %payment.booking_id,
                    status = %payment.status,
                    "Payment outcome recorded"
                );

                Ok(RecordOutcome::Recorded {
                    payment,
                    outbox_event_id: event.id,
                })
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_payment_store!(super::postgres::Postgres, "postgres", sqlx::PgConnection);
impl_payment_store!(super::sqlite::Sqlite, "sqlite", sqlx::SqliteConnection);

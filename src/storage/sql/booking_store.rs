//! Unified SQL BookingStore implementation.
//!
//! Capacity is reserved with a conditional increment
//! (`booked_count < total_inventory`) checked by rows affected, so a
//! transaction that lost a race fails instead of overbooking even when the
//! caller's lock did not cover the night. Compensation decrements with a
//! floor at zero.

use std::marker::PhantomData;

use super::SqlDatabase;

/// SQL-based implementation of BookingStore.
pub struct SqlBookingStore<DB: SqlDatabase> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlBookingStore<DB> {
    /// Create a new SQL booking store with the given pool.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }
}

/// Macro to implement BookingStore for a specific SQL backend.
macro_rules! impl_booking_store {
    ($db_type:ty, $feature:literal, $conn:ty) => {
        #[cfg(feature = $feature)]
        impl SqlBookingStore<$db_type> {
            async fn load_booking(
                conn: &mut $conn,
                booking_id: uuid::Uuid,
            ) -> crate::interfaces::booking_store::Result<Option<crate::domain::Booking>> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::{Bookings, BOOKING_COLUMNS};
                use crate::storage::sql::rows::BookingRow;

                let stmt = Query::select()
                    .columns(BOOKING_COLUMNS)
                    .from(Bookings::Table)
                    .and_where(Expr::col(Bookings::Id).eq(booking_id.to_string()))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let row: Option<BookingRow> =
                    sqlx::query_as(&sql).fetch_optional(&mut *conn).await?;
                row.map(crate::domain::Booking::try_from).transpose()
            }

            async fn load_counters(
                conn: &mut $conn,
                room_id: uuid::Uuid,
                stay: &crate::domain::StayRange,
            ) -> crate::interfaces::booking_store::Result<Vec<crate::domain::InventoryCounter>>
            {
                use sea_query::{Expr, Order, Query};

                use crate::domain::date_key;
                use crate::storage::schema::Inventory;
                use crate::storage::sql::rows::{convert_all, InventoryRow};

                let stmt = Query::select()
                    .columns([
                        Inventory::RoomId,
                        Inventory::Date,
                        Inventory::TotalInventory,
                        Inventory::BookedCount,
                    ])
                    .from(Inventory::Table)
                    .and_where(Expr::col(Inventory::RoomId).eq(room_id.to_string()))
                    .and_where(Expr::col(Inventory::Date).gte(date_key(stay.start())))
                    .and_where(Expr::col(Inventory::Date).lt(date_key(stay.end())))
                    .order_by(Inventory::Date, Order::Asc)
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let rows: Vec<InventoryRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
                convert_all(rows)
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::interfaces::BookingStore for SqlBookingStore<$db_type> {
            async fn reserve(
                &self,
                request: &crate::interfaces::ReservationRequest,
            ) -> crate::interfaces::booking_store::Result<crate::interfaces::Reservation> {
                use sea_query::{Expr, Query};
                use tracing::{debug, info};

                use crate::domain::{
                    date_key, format_timestamp, Booking, BookingStatus, Payment, PaymentStatus,
                };
                use crate::events::{DomainEvent, OutboxEvent, PaymentInitiated};
                use crate::interfaces::{Reservation, StorageError};
                use crate::storage::schema::{
                    Bookings, Inventory, Payments, Rooms, BOOKING_COLUMNS, PAYMENT_COLUMNS,
                };
                use crate::storage::sql::rows::conflict_on_unique;
                use crate::storage::sql::SqlOutboxStore;

                let room_key = request.room_id.to_string();
                let stay = request.stay;
                let mut tx = self.pool.begin().await?;

                // Price the stay.
                let stmt = Query::select()
                    .columns([Rooms::PriceCents, Rooms::Currency])
                    .from(Rooms::Table)
                    .and_where(Expr::col(Rooms::Id).eq(room_key.clone()))
                    .to_owned();
                let sql = <$db_type>::build_select(stmt);
                let rate: Option<(i64, String)> =
                    sqlx::query_as(&sql).fetch_optional(&mut *tx).await?;
                let (price_cents, currency) = rate.ok_or_else(|| StorageError::NotFound {
                    entity: "room",
                    id: room_key.clone(),
                })?;
                let total_cents = price_cents
                    .checked_mul(stay.night_count())
                    .ok_or_else(|| StorageError::corrupt("rooms", "stay price overflows i64"))?;

                // Availability: every night needs a counter with room to spare.
                let counters = Self::load_counters(&mut tx, request.room_id, &stay).await?;
                let unavailable: Vec<_> = stay
                    .nights()
                    .filter(|night| {
                        counters
                            .iter()
                            .find(|c| c.date == *night)
                            .map_or(true, |c| c.is_full())
                    })
                    .collect();
                if !unavailable.is_empty() {
                    debug!(room_id = %request.room_id, dates = ?unavailable, "No capacity");
                    return Err(StorageError::NotAvailable {
                        room_id: request.room_id,
                        dates: unavailable,
                    });
                }

                for night in stay.nights() {
                    let stmt = Query::update()
                        .table(Inventory::Table)
                        .value(
                            Inventory::BookedCount,
                            Expr::col(Inventory::BookedCount).add(1),
                        )
                        .and_where(Expr::col(Inventory::RoomId).eq(room_key.clone()))
                        .and_where(Expr::col(Inventory::Date).eq(date_key(night)))
                        .and_where(
                            Expr::col(Inventory::BookedCount)
                                .lt(Expr::col(Inventory::TotalInventory)),
                        )
                        .to_owned();
                    let sql = <$db_type>::build_update(stmt);
                    let updated = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
                    if updated != 1 {
                        return Err(StorageError::NotAvailable {
                            room_id: request.room_id,
                            dates: vec![night],
                        });
                    }
                }

                let now = chrono::Utc::now();
                let booking = Booking {
                    id: request.booking_id,
                    user_id: request.user_id,
                    room_id: request.room_id,
                    stay,
                    total_cents,
                    currency: currency.clone(),
                    status: BookingStatus::Pending,
                    created_at: now,
                };

                let stmt = Query::insert()
                    .into_table(Bookings::Table)
                    .columns(BOOKING_COLUMNS)
                    .values_panic([
                        booking.id.to_string().into(),
                        booking.user_id.to_string().into(),
                        room_key.clone().into(),
                        date_key(stay.start()).into(),
                        date_key(stay.end()).into(),
                        total_cents.into(),
                        currency.clone().into(),
                        booking.status.as_str().into(),
                        format_timestamp(now).into(),
                    ])
                    .to_owned();
                let sql = <$db_type>::build_insert(stmt);
                sqlx::query(&sql)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| conflict_on_unique(e, format!("booking {} exists", booking.id)))?;

                let payment = Payment {
                    id: request.payment_id,
                    booking_id: booking.id,
                    amount_cents: total_cents,
                    currency: currency.clone(),
                    status: PaymentStatus::Pending,
                    idempotency_key: Payment::idempotency_key_for(booking.id),
                    gateway_ref: None,
                    failed_reason: None,
                    created_at: now,
                    updated_at: now,
                };

                let stmt = Query::insert()
                    .into_table(Payments::Table)
                    .columns(PAYMENT_COLUMNS)
                    .values_panic([
                        payment.id.to_string().into(),
                        payment.booking_id.to_string().into(),
                        payment.amount_cents.into(),
                        payment.currency.clone().into(),
                        payment.status.as_str().into(),
                        payment.idempotency_key.clone().into(),
                        payment.gateway_ref.clone().into(),
                        payment.failed_reason.clone().into(),
                        format_timestamp(now).into(),
                        format_timestamp(now).into(),
                    ])
                    .to_owned();
                let sql = <$db_type>::build_insert(stmt);
                sqlx::query(&sql).execute(&mut *tx).await.map_err(|e| {
                    conflict_on_unique(
                        e,
                        format!("duplicate idempotency key {}", payment.idempotency_key),
                    )
                })?;

                let event = OutboxEvent::stage(&DomainEvent::PaymentInitiated(PaymentInitiated {
                    payment_id: payment.id,
                    booking_id: booking.id,
                    amount: total_cents,
                    currency,
                    user_id: booking.user_id,
                }))?;
                SqlOutboxStore::<$db_type>::append(&mut tx, &event).await?;

                tx.commit().await?;

                info!(
                    booking_id = %booking.id,
                    room_id = %booking.room_id,
                    nights = stay.night_count(),
                    total_cents,
                    "Booking reserved"
                );

                Ok(Reservation {
                    booking,
                    payment,
                    outbox_event_id: event.id,
                })
            }

            async fn settle(
                &self,
                message_id: &str,
                result: &crate::events::PaymentResult,
                outcome: &crate::domain::PaymentOutcome,
            ) -> crate::interfaces::booking_store::Result<crate::interfaces::SettleOutcome> {
                use sea_query::{Expr, Query};
                use tracing::{info, warn};

                use crate::domain::{date_key, BookingStatus};
                use crate::events::{BookingSettled, DomainEvent, OutboxEvent};
                use crate::interfaces::{SettleOutcome, StorageError};
                use crate::storage::schema::{Bookings, Inventory};
                use crate::storage::sql::SqlOutboxStore;

                let mut tx = self.pool.begin().await?;

                if SqlOutboxStore::<$db_type>::is_processed_in(&mut tx, message_id).await? {
                    return Ok(SettleOutcome::AlreadyProcessed);
                }

                let booking = Self::load_booking(&mut tx, result.booking_id)
                    .await?
                    .ok_or_else(|| StorageError::NotFound {
                        entity: "booking",
                        id: result.booking_id.to_string(),
                    })?;

                let target = match booking.status.settle(outcome) {
                    Ok(target) => target,
                    Err(e) => {
                        warn!(booking_id = %booking.id, error = %e, "Ignoring payment result");
                        SqlOutboxStore::<$db_type>::mark_processed_in(&mut tx, message_id)
                            .await?;
                        tx.commit().await?;
                        return Ok(SettleOutcome::Ignored {
                            status: booking.status,
                        });
                    }
                };

                let stmt = Query::update()
                    .table(Bookings::Table)
                    .value(Bookings::Status, target.as_str())
                    .and_where(Expr::col(Bookings::Id).eq(booking.id.to_string()))
                    .and_where(Expr::col(Bookings::Status).eq(BookingStatus::Pending.as_str()))
                    .to_owned();
                let sql = <$db_type>::build_update(stmt);
                let updated = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
                if updated != 1 {
                    return Err(StorageError::Conflict(format!(
                        "booking {} left pending concurrently",
                        booking.id
                    )));
                }

                let mut released_nights = 0;
                if outcome.releases_inventory() {
                    for night in booking.stay.nights() {
                        let stmt = Query::update()
                            .table(Inventory::Table)
                            .value(
                                Inventory::BookedCount,
                                Expr::case(
                                    Expr::col(Inventory::BookedCount).gt(0),
                                    Expr::col(Inventory::BookedCount).sub(1),
                                )
                                .finally(0),
                            )
                            .and_where(
                                Expr::col(Inventory::RoomId).eq(booking.room_id.to_string()),
                            )
                            .and_where(Expr::col(Inventory::Date).eq(date_key(night)))
                            .to_owned();
                        let sql = <$db_type>::build_update(stmt);
                        let updated = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
                        released_nights += updated as usize;
                    }
                }

                let settled = BookingSettled {
                    booking_id: booking.id,
                    user_id: booking.user_id,
                    room_id: booking.room_id,
                    status: target,
                };
                if let Some(event) = DomainEvent::booking_settled(settled) {
                    let event = OutboxEvent::stage(&event)?;
                    SqlOutboxStore::<$db_type>::append(&mut tx, &event).await?;
                }

                SqlOutboxStore::<$db_type>::mark_processed_in(&mut tx, message_id).await?;
                tx.commit().await?;

                info!(
                    booking_id = %booking.id,
                    from = %booking.status,
                    to = %target,
                    released_nights,
                    "Booking settled"
                );

                Ok(SettleOutcome::Applied {
                    from: booking.status,
                    to: target,
                    released_nights,
                })
            }

            async fn get_booking(
                &self,
                booking_id: uuid::Uuid,
            ) -> crate::interfaces::booking_store::Result<Option<crate::domain::Booking>> {
                let mut conn = self.pool.acquire().await?;
                Self::load_booking(&mut conn, booking_id).await
            }

            async fn get_inventory(
                &self,
                room_id: uuid::Uuid,
                date: chrono::NaiveDate,
            ) -> crate::interfaces::booking_store::Result<Option<crate::domain::InventoryCounter>>
            {
                use sea_query::{Expr, Query};

                use crate::domain::date_key;
                use crate::storage::schema::Inventory;
                use crate::storage::sql::rows::InventoryRow;

                let stmt = Query::select()
                    .columns([
                        Inventory::RoomId,
                        Inventory::Date,
                        Inventory::TotalInventory,
                        Inventory::BookedCount,
                    ])
                    .from(Inventory::Table)
                    .and_where(Expr::col(Inventory::RoomId).eq(room_id.to_string()))
                    .and_where(Expr::col(Inventory::Date).eq(date_key(date)))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let row: Option<InventoryRow> =
                    sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
                row.map(crate::domain::InventoryCounter::try_from).transpose()
            }

            async fn set_capacity(
                &self,
                room_id: uuid::Uuid,
                date: chrono::NaiveDate,
                total: i64,
            ) -> crate::interfaces::booking_store::Result<()> {
                use sea_query::{Expr, OnConflict, Query};

                use crate::domain::date_key;
                use crate::interfaces::StorageError;
                use crate::storage::schema::Inventory;

                if total < 0 {
                    return Err(StorageError::Conflict(format!(
                        "capacity {} for room {} on {} is negative",
                        total, room_id, date
                    )));
                }

                // Resize only while the new total still covers what is booked.
                let resize = Query::update()
                    .table(Inventory::Table)
                    .value(Inventory::TotalInventory, total)
                    .and_where(Expr::col(Inventory::RoomId).eq(room_id.to_string()))
                    .and_where(Expr::col(Inventory::Date).eq(date_key(date)))
                    .and_where(Expr::col(Inventory::BookedCount).lte(total))
                    .to_owned();
                let resize = <$db_type>::build_update(resize);
                if sqlx::query(&resize).execute(&self.pool).await?.rows_affected() > 0 {
                    return Ok(());
                }

                let create = Query::insert()
                    .into_table(Inventory::Table)
                    .columns([
                        Inventory::RoomId,
                        Inventory::Date,
                        Inventory::TotalInventory,
                        Inventory::BookedCount,
                    ])
                    .values_panic([
                        room_id.to_string().into(),
                        date_key(date).into(),
                        total.into(),
                        0i64.into(),
                    ])
                    .on_conflict(
                        OnConflict::columns([Inventory::RoomId, Inventory::Date])
                            .do_nothing()
                            .to_owned(),
                    )
                    .to_owned();
                let create = <$db_type>::build_insert(create);
                if sqlx::query(&create).execute(&self.pool).await?.rows_affected() > 0 {
                    return Ok(());
                }

                // Created concurrently between the two statements.
                if sqlx::query(&resize).execute(&self.pool).await?.rows_affected() > 0 {
                    return Ok(());
                }

                Err(StorageError::Conflict(format!(
                    "capacity {} for room {} on {} is below the rooms already booked",
                    total, room_id, date
                )))
            }

            async fn set_room_rate(
                &self,
                rate: &crate::domain::RoomRate,
            ) -> crate::interfaces::booking_store::Result<()> {
                use sea_query::{OnConflict, Query};

                use crate::storage::schema::Rooms;

                let stmt = Query::insert()
                    .into_table(Rooms::Table)
                    .columns([Rooms::Id, Rooms::PriceCents, Rooms::Currency])
                    .values_panic([
                        rate.room_id.to_string().into(),
                        rate.price_cents.into(),
                        rate.currency.clone().into(),
                    ])
                    .on_conflict(
                        OnConflict::column(Rooms::Id)
                            .update_columns([Rooms::PriceCents, Rooms::Currency])
                            .to_owned(),
                    )
                    .to_owned();

                let sql = <$db_type>::build_insert(stmt);
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_booking_store!(super::postgres::Postgres, "postgres", sqlx::PgConnection);
impl_booking_store!(super::sqlite::Sqlite, "sqlite", sqlx::SqliteConnection);

//! End-to-end harness: booking service, payment processor and saga wired
//! over in-memory SQLite, the in-process lock store and a mock publisher.
//!
//! The broker is replaced by [`Harness::pump`], which drains the outbox
//! through the relay and dispatches every published payment event the way
//! the consumer would.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use innkeep::bus::{MockPublisher, OutboxConfig, OutboxRelay};
use innkeep::domain::{Booking, InventoryCounter, PaymentOutcome, RoomRate};
use innkeep::events::{OutboxEvent, PaymentResult};
use innkeep::interfaces::{
    BookingStore, ChargeReceipt, ChargeRequest, GatewayError, PaymentGateway, Reservation,
    ReservationRequest, SettleOutcome, StorageError,
};
use innkeep::lock::{DistributedLock, LockConfig, LockScope, MemoryLockStore};
use innkeep::services::{
    BookingService, Dispatcher, Disposition, IncomingMessage, PaymentProcessor, SagaOrchestrator,
};
use innkeep::storage::{connect_sqlite, SqliteBookingStore, SqliteOutboxStore, SqlitePaymentStore};

pub const PRICE_CENTS: i64 = 9_900;
pub const GATEWAY_TIMEOUT: Duration = Duration::from_millis(50);

pub fn night(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 8, day).expect("valid date")
}

/// How the scripted gateway answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Approve,
    Decline,
    /// Never answers; the processor's deadline fires.
    Hang,
}

/// Gateway whose answer the test controls.
pub struct ScriptedGateway {
    script: RwLock<Script>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(script: Script) -> Self {
        Self {
            script: RwLock::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn set(&self, script: Script) {
        *self.script.write().await = script;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.script.read().await {
            Script::Approve => Ok(ChargeReceipt {
                gateway_ref: format!("test_{}", request.payment_id.simple()),
            }),
            Script::Decline => Err(GatewayError::Declined("card declined".into())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GatewayError::Unavailable("unreachable".into()))
            }
        }
    }
}

/// Booking store that stretches every reservation by `pause` and records
/// how many ran at once. With the caller's lock doing its job the peak stays
/// at one, whatever the pool size.
pub struct OverlapTrackingStore {
    inner: Arc<SqliteBookingStore>,
    pause: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl OverlapTrackingStore {
    pub fn new(inner: Arc<SqliteBookingStore>, pause: Duration) -> Self {
        Self {
            inner,
            pause,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookingStore for OverlapTrackingStore {
    async fn reserve(&self, request: &ReservationRequest) -> Result<Reservation, StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.pause).await;
        let result = self.inner.reserve(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn settle(
        &self,
        message_id: &str,
        result: &PaymentResult,
        outcome: &PaymentOutcome,
    ) -> Result<SettleOutcome, StorageError> {
        self.inner.settle(message_id, result, outcome).await
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StorageError> {
        self.inner.get_booking(booking_id).await
    }

    async fn get_inventory(
        &self,
        room_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<InventoryCounter>, StorageError> {
        self.inner.get_inventory(room_id, date).await
    }

    async fn set_capacity(&self, room_id: Uuid, date: NaiveDate, total: i64) -> Result<(), StorageError> {
        self.inner.set_capacity(room_id, date, total).await
    }

    async fn set_room_rate(&self, rate: &RoomRate) -> Result<(), StorageError> {
        self.inner.set_room_rate(rate).await
    }
}

pub struct Harness {
    pub pool: sqlx::SqlitePool,
    pub bookings: Arc<SqliteBookingStore>,
    pub payments: Arc<SqlitePaymentStore>,
    pub outbox: Arc<SqliteOutboxStore>,
    pub locks: Arc<MemoryLockStore>,
    pub lock: DistributedLock,
    pub service: Arc<BookingService>,
    pub gateway: Arc<ScriptedGateway>,
    pub dispatcher: Dispatcher,
    pub publisher: Arc<MockPublisher>,
    pub relay: OutboxRelay,
}

/// Lock settings that let a burst of contending bookings all get their turn.
pub fn patient_lock_config(scope: LockScope) -> LockConfig {
    LockConfig {
        ttl_ms: 5_000,
        retry_attempts: 200,
        retry_delay_ms: 5,
        scope,
        ..LockConfig::default()
    }
}

impl Harness {
    pub async fn new(scope: LockScope) -> Self {
        let pool = connect_sqlite(":memory:")
            .await
            .expect("Failed to open in-memory SQLite");
        Self::on_pool(pool, scope).await
    }

    /// Build a harness over an existing database, as a restarted process
    /// would.
    pub async fn on_pool(pool: sqlx::SqlitePool, scope: LockScope) -> Self {
        let bookings = Arc::new(SqliteBookingStore::new(pool.clone()));
        let payments = Arc::new(SqlitePaymentStore::new(pool.clone()));
        let outbox = Arc::new(SqliteOutboxStore::new(pool.clone()));

        let locks = Arc::new(MemoryLockStore::new());
        let lock = DistributedLock::new(locks.clone(), &patient_lock_config(scope));
        let service = Arc::new(BookingService::new(lock.clone(), bookings.clone(), scope));

        let gateway = Arc::new(ScriptedGateway::new(Script::Approve));
        let processor = Arc::new(PaymentProcessor::new(
            payments.clone(),
            outbox.clone(),
            gateway.clone(),
            GATEWAY_TIMEOUT,
        ));
        let saga = Arc::new(SagaOrchestrator::new(bookings.clone()));
        let dispatcher = Dispatcher::new(processor, saga);

        let publisher = Arc::new(MockPublisher::new());
        let relay = OutboxRelay::new(outbox.clone(), publisher.clone(), &OutboxConfig::default());

        Self {
            pool,
            bookings,
            payments,
            outbox,
            locks,
            lock,
            service,
            gateway,
            dispatcher,
            publisher,
            relay,
        }
    }

    /// Create a priced room with `capacity` rooms on nights `[from, to)`.
    pub async fn seed_room(&self, from: u32, to: u32, capacity: i64) -> Uuid {
        let room_id = Uuid::new_v4();
        self.bookings
            .set_room_rate(&RoomRate {
                room_id,
                price_cents: PRICE_CENTS,
                currency: "USD".into(),
            })
            .await
            .expect("set_room_rate should succeed");
        for day in from..to {
            self.bookings
                .set_capacity(room_id, night(day), capacity)
                .await
                .expect("set_capacity should succeed");
        }
        room_id
    }

    pub async fn booked(&self, room_id: Uuid, day: u32) -> i64 {
        self.bookings
            .get_inventory(room_id, night(day))
            .await
            .expect("get_inventory should succeed")
            .expect("counter should exist")
            .booked_count
    }

    /// Publish pending outbox events and deliver the payment events.
    ///
    /// Returns the delivered events with their dispositions.
    pub async fn pump_once(&self) -> Vec<(OutboxEvent, Disposition)> {
        self.relay.drain_once().await.expect("drain should succeed");
        let mut delivered = Vec::new();
        for event in self.publisher.take_published().await {
            if !event.event_type.starts_with("payment.") {
                continue;
            }
            let disposition = self.deliver(&event).await;
            delivered.push((event, disposition));
        }
        delivered
    }

    /// Pump until the outbox has nothing more to deliver.
    pub async fn pump(&self) -> Vec<(OutboxEvent, Disposition)> {
        let mut all = Vec::new();
        loop {
            let round = self.pump_once().await;
            if round.is_empty() {
                return all;
            }
            all.extend(round);
        }
    }

    /// Deliver one event as the consumer would: outbox id as message id,
    /// event type as routing key.
    pub async fn deliver(&self, event: &OutboxEvent) -> Disposition {
        let message_id = event.id.to_string();
        self.dispatcher
            .dispatch(IncomingMessage {
                message_id: Some(&message_id),
                routing_key: &event.event_type,
                payload: event.payload.as_bytes(),
            })
            .await
    }
}

//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! The tables themselves are created by the migrations under `migrations/`.

use sea_query::Iden;

/// Rooms table schema.
#[derive(Iden)]
pub enum Rooms {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "price_cents"]
    PriceCents,
    #[iden = "currency"]
    Currency,
}

/// Inventory table schema.
#[derive(Iden)]
pub enum Inventory {
    Table,
    #[iden = "room_id"]
    RoomId,
    #[iden = "date"]
    Date,
    #[iden = "total_inventory"]
    TotalInventory,
    #[iden = "booked_count"]
    BookedCount,
}

/// Bookings table schema.
#[derive(Iden)]
pub enum Bookings {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "room_id"]
    RoomId,
    #[iden = "start_date"]
    StartDate,
    #[iden = "end_date"]
    EndDate,
    #[iden = "total_price"]
    TotalPrice,
    #[iden = "currency"]
    Currency,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
}

/// Payments table schema.
#[derive(Iden)]
pub enum Payments {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "booking_id"]
    BookingId,
    #[iden = "amount"]
    Amount,
    #[iden = "currency"]
    Currency,
    #[iden = "status"]
    Status,
    #[iden = "idempotency_key"]
    IdempotencyKey,
    #[iden = "gateway_ref"]
    GatewayRef,
    #[iden = "failed_reason"]
    FailedReason,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Outbox events table schema.
#[derive(Iden)]
pub enum OutboxEvents {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "aggregate_type"]
    AggregateType,
    #[iden = "aggregate_id"]
    AggregateId,
    #[iden = "event_type"]
    EventType,
    #[iden = "payload"]
    Payload,
    #[iden = "published_at"]
    PublishedAt,
    #[iden = "retry_count"]
    RetryCount,
    #[iden = "created_at"]
    CreatedAt,
}

/// Processed events (idempotency markers) table schema.
#[derive(Iden)]
pub enum ProcessedEvents {
    Table,
    #[iden = "event_id"]
    EventId,
    #[iden = "processed_at"]
    ProcessedAt,
}

/// Columns selected for a booking row.
pub const BOOKING_COLUMNS: [Bookings; 9] = [
    Bookings::Id,
    Bookings::UserId,
    Bookings::RoomId,
    Bookings::StartDate,
    Bookings::EndDate,
    Bookings::TotalPrice,
    Bookings::Currency,
    Bookings::Status,
    Bookings::CreatedAt,
];

/// Columns selected for a payment row.
pub const PAYMENT_COLUMNS: [Payments; 10] = [
    Payments::Id,
    Payments::BookingId,
    Payments::Amount,
    Payments::Currency,
    Payments::Status,
    Payments::IdempotencyKey,
    Payments::GatewayRef,
    Payments::FailedReason,
    Payments::CreatedAt,
    Payments::UpdatedAt,
];

/// Columns selected for an outbox row.
pub const OUTBOX_COLUMNS: [OutboxEvents; 8] = [
    OutboxEvents::Id,
    OutboxEvents::AggregateType,
    OutboxEvents::AggregateId,
    OutboxEvents::EventType,
    OutboxEvents::Payload,
    OutboxEvents::PublishedAt,
    OutboxEvents::RetryCount,
    OutboxEvents::CreatedAt,
];

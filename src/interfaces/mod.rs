//! Abstract interfaces for innkeep components.
//!
//! These traits define the contracts for:
//! - Lock storage (distributed mutual exclusion)
//! - Booking and payment storage (transactional business state)
//! - Outbox storage (pending events and idempotency markers)
//! - Event publishing (broker delivery with confirms)
//! - Payment gateway (external charge call)

pub mod booking_store;
pub mod lock_store;
pub mod outbox_store;
pub mod payment_gateway;
pub mod payment_store;
pub mod publisher;

pub use booking_store::{
    BookingStore, Reservation, ReservationRequest, SettleOutcome, StorageError,
};
pub use lock_store::{LockError, LockStore};
pub use outbox_store::OutboxStore;
pub use payment_gateway::{ChargeReceipt, ChargeRequest, GatewayError, PaymentGateway};
pub use payment_store::{PaymentStore, RecordOutcome};
pub use publisher::EventPublisher;

//! Innkeep - booking consistency core
//!
//! Keeps room inventory from being over-booked under concurrent requests
//! and drives every booking to a final state through an asynchronous
//! payment saga:
//!
//! - `lock`: TTL-bounded distributed mutex over room nights
//! - `storage`: transactional booking, payment and outbox persistence
//! - `bus`: resilient AMQP connection, confirmed publishing, outbox relay
//! - `services`: booking creation, payment processing, booking saga

pub mod bus;
pub mod config;
pub mod domain;
pub mod events;
pub mod gateway;
pub mod interfaces;
pub mod lock;
pub mod services;
pub mod storage;
pub mod utils;

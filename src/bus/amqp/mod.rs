//! AMQP (RabbitMQ) broker implementation.
//!
//! Events are published to a durable topic exchange with the event type as
//! routing key (`payment.initiated`, `booking.confirmed`, ...). Workers
//! consume `payment.#` from a quorum work queue that dead-letters into a
//! parking queue.

mod connection;
mod consumer;
mod publisher;
mod topology;

pub use connection::AmqpConnector;
pub use consumer::PaymentConsumer;
pub use publisher::{message_properties, AmqpPublisher};
pub use topology::{declare_topology, work_queue_arguments};

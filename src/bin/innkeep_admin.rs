//! innkeep-admin: operator commands
//!
//! ```text
//! innkeep-admin seed-room <room-id> <price-cents> <currency> <from> <to> <capacity>
//! innkeep-admin book <user-id> <room-id> <check-in> <check-out>
//! innkeep-admin booking <booking-id>
//! innkeep-admin dead-letters [--limit N]
//! innkeep-admin retry <event-id>
//! ```
//!
//! Dates are `YYYY-MM-DD`. `seed-room` sets the rate and the capacity of
//! every night in `[from, to)`. `book` goes through the same lock and
//! transaction as the request path; the resulting `payment.initiated`
//! event is shipped by a running `innkeep-worker`.
//!
//! ## Configuration
//! - --config / INNKEEP_CONFIG: Path to a YAML config file (optional)
//! - INNKEEP__<SECTION>__<KEY>: Override any config value
//! - INNKEEP_LOG: Log filter (default: info)

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use innkeep::config::Config;
use innkeep::domain::{RoomRate, StayRange};
use innkeep::lock::{init_lock_store, DistributedLock};
use innkeep::services::BookingService;
use innkeep::storage::init_storage;
use innkeep::utils::bootstrap::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "innkeep-admin", version, about = "Operator commands for innkeep", long_about = None)]
struct Cli {
    /// Config file layered over config.yaml
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set a room's nightly rate and its capacity for nights [from, to)
    SeedRoom {
        room_id: Uuid,
        price_cents: i64,
        currency: String,
        from: NaiveDate,
        to: NaiveDate,
        capacity: i64,
    },
    /// Reserve a room through the lock and booking transaction
    Book {
        user_id: Uuid,
        room_id: Uuid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    /// Show one booking
    Booking { booking_id: Uuid },
    /// List outbox events that ran out of publish attempts
    DeadLetters {
        #[arg(short, long, default_value = "50", value_name = "COUNT")]
        limit: u64,
    },
    /// Reset a dead-lettered event's retry counter
    Retry { event_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let stores = init_storage(&config.storage, config.outbox.max_retries).await?;

    match cli.command {
        Commands::SeedRoom {
            room_id,
            price_cents,
            currency,
            from,
            to,
            capacity,
        } => {
            let stay = StayRange::new(from, to)?;
            stores
                .bookings
                .set_room_rate(&RoomRate {
                    room_id,
                    price_cents,
                    currency: currency.to_uppercase(),
                })
                .await?;
            for night in stay.nights() {
                stores.bookings.set_capacity(room_id, night, capacity).await?;
            }
            info!(room_id = %room_id, nights = stay.night_count(), capacity, "Room seeded");
        }
        Commands::Book {
            user_id,
            room_id,
            check_in,
            check_out,
        } => {
            let lock = DistributedLock::new(init_lock_store(&config.lock).await?, &config.lock);
            let service = BookingService::new(lock, Arc::clone(&stores.bookings), config.lock.scope);
            let booking = service
                .create_booking(user_id, room_id, check_in, check_out)
                .await?;
            println!("{}", serde_json::to_string_pretty(&booking)?);
        }
        Commands::Booking { booking_id } => match stores.bookings.get_booking(booking_id).await? {
            Some(booking) => println!("{}", serde_json::to_string_pretty(&booking)?),
            None => return Err(format!("booking not found: {}", booking_id).into()),
        },
        Commands::DeadLetters { limit } => {
            let events = stores.outbox.list_dead_letters(limit).await?;
            for event in &events {
                println!(
                    "{}  {:<18} {}:{}  retries={}  created={}",
                    event.id,
                    event.event_type,
                    event.aggregate_type,
                    event.aggregate_id,
                    event.retry_count,
                    event.created_at.to_rfc3339()
                );
            }
            info!(count = events.len(), "Listed dead-lettered outbox events");
        }
        Commands::Retry { event_id } => {
            if !stores.outbox.reset_retry(event_id).await? {
                return Err(format!("no unpublished outbox event {}", event_id).into());
            }
            info!(event_id = %event_id, "Outbox event queued for another attempt");
        }
    }

    Ok(())
}

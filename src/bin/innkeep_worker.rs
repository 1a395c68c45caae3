//! innkeep-worker: outbox relay and payment consumer
//!
//! ## Architecture
//! ```text
//! [outbox_events] --relay--> [innkeep.events] --payment.#--> [innkeep.payments]
//!                                                                 |
//!                                            processor / saga <---+
//!                                                   |
//!                                                   v
//!                                   [payments, bookings, inventory, outbox_events]
//! ```
//!
//! ## Configuration
//! - INNKEEP_CONFIG: Path to a YAML config file (optional)
//! - INNKEEP__<SECTION>__<KEY>: Override any config value
//! - INNKEEP_LOG: Log filter (default: info)
//!
//! The process exits non-zero if the first broker dial fails or the
//! connection gives up reconnecting.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use innkeep::bus::{
    declare_topology, spawn_relay, AmqpConnector, AmqpPublisher, ConnectionManager, OutboxRelay,
    PaymentConsumer,
};
use innkeep::config::Config;
use innkeep::gateway::SimulatedGateway;
use innkeep::services::{Dispatcher, PaymentProcessor, SagaOrchestrator};
use innkeep::storage::init_storage;
use innkeep::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let stores = init_storage(&config.storage, config.outbox.max_retries).await?;

    let messaging = &config.messaging;
    let connection = Arc::new(
        ConnectionManager::connect(AmqpConnector::new(&messaging.url), messaging.into()).await?,
    );
    {
        let channel = connection.create_channel().await?;
        declare_topology(&channel, messaging).await?;
        if let Err(e) = channel.close(200, "topology declared").await {
            error!(error = %e, "Failed to close topology channel");
        }
    }

    let publisher = Arc::new(AmqpPublisher::new(Arc::clone(&connection), messaging));
    let relay = Arc::new(
        OutboxRelay::new(Arc::clone(&stores.outbox), publisher, &config.outbox)
            .with_connection(connection.subscribe()),
    );
    let relay_handle = spawn_relay(relay, config.outbox.poll_interval());

    let gateway = Arc::new(SimulatedGateway::new(
        config.payments.simulated_latency(),
        config.payments.simulated_failure_rate,
    ));
    let processor = Arc::new(PaymentProcessor::new(
        Arc::clone(&stores.payments),
        Arc::clone(&stores.outbox),
        gateway,
        config.payments.gateway_timeout(),
    ));
    let saga = Arc::new(SagaOrchestrator::new(Arc::clone(&stores.bookings)));
    let dispatcher = Arc::new(Dispatcher::new(processor, saga));

    let consumer = PaymentConsumer::new(Arc::clone(&connection), messaging, dispatcher);
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    let consumer_task = tokio::spawn(async move { consumer.run(cancel_rx).await });

    info!(
        exchange = %messaging.exchange,
        queue = %messaging.queue,
        "innkeep-worker started"
    );

    let mut failure: Option<String> = None;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested");
        }
        _ = connection.wait_terminal() => {
            error!("Broker connection gave up reconnecting");
            failure = Some("broker connection lost".to_string());
        }
    }

    // Let the current message and relay pass finish.
    let _ = cancel_tx.send(true);
    match tokio::time::timeout(Duration::from_secs(30), consumer_task).await {
        Ok(Ok(Err(e))) => error!(error = %e, "Consumer stopped with error"),
        Ok(Err(e)) => error!(error = %e, "Consumer task panicked"),
        Err(_) => error!("Consumer did not stop in time"),
        Ok(Ok(Ok(()))) => {}
    }
    relay_handle.shutdown().await;
    connection.shutdown().await;

    match failure {
        Some(reason) => Err(reason.into()),
        None => {
            info!("innkeep-worker stopped");
            Ok(())
        }
    }
}

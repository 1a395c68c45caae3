//! Outbox relay.
//!
//! Business transactions write their events to `outbox_events` instead of
//! publishing directly. The relay drains that table to the broker:
//!
//! 1. Read a bounded batch of unpublished events, oldest first
//! 2. Publish each one and wait for the broker confirm
//! 3. On confirm mark it published, otherwise bump its retry count and hold
//!    the event back on an exponential schedule
//!
//! A failed or held-back event blocks the rest of its aggregate for the
//! current pass, so one aggregate's events leave in creation order. Events
//! whose retry count passes the budget drop out of the batch and are only
//! reachable through the dead-letter listing until an operator resets them.
//!
//! Losing the broker connection is not charged to any event: the pass stops
//! and the background task waits for the connection to come back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::ConnectionStatus;
use crate::interfaces::{EventPublisher, OutboxStore, StorageError};

// ============================================================================
// Configuration
// ============================================================================

/// Outbox configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Events read per pass. Default: 100.
    pub batch_size: u64,
    /// Pause between passes in milliseconds. Default: 1000.
    pub poll_interval_ms: u64,
    /// Failed publishes tolerated before an event dead-letters. Default: 10.
    pub max_retries: i64,
    /// Hold-back after the first failed publish in milliseconds; doubles on
    /// each further failure. Default: 1000.
    pub retry_base_delay_ms: u64,
    /// Ceiling for the hold-back in milliseconds. Default: 60000.
    pub retry_max_delay_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 1000,
            max_retries: 10,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Counts from one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Confirmed by the broker and marked published.
    pub published: usize,
    /// Publish failed; retry count incremented.
    pub failed: usize,
    /// Skipped: still backing off, or an earlier event of the same
    /// aggregate did not go out.
    pub deferred: usize,
    /// The broker connection was down; the pass stopped early.
    pub broker_down: bool,
}

/// Ships outbox rows through an [`EventPublisher`].
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: u64,
    max_retries: i64,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    /// Earliest time each failed event may be tried again.
    held: Mutex<HashMap<Uuid, Instant>>,
    connection: Option<watch::Receiver<ConnectionStatus>>,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: &OutboxConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
            held: Mutex::new(HashMap::new()),
            connection: None,
        }
    }

    /// Follow a broker connection: passes are skipped while it is not
    /// connected, and the background task sleeps until it is.
    pub fn with_connection(mut self, status: watch::Receiver<ConnectionStatus>) -> Self {
        self.connection = Some(status);
        self
    }

    fn broker_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(true, |status| *status.borrow() == ConnectionStatus::Connected)
    }

    /// Hold-back after the `retries`-th failed publish.
    fn retry_delay(&self, retries: i64) -> Duration {
        let times = usize::try_from(retries).unwrap_or(1).clamp(1, 32);
        ExponentialBuilder::default()
            .with_min_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
            .with_factor(2.0)
            .with_max_times(times)
            .build()
            .last()
            .unwrap_or(self.retry_max_delay)
    }

    /// Run one pass over the unpublished events.
    ///
    /// Only listing errors abort the pass; per-event storage errors are
    /// logged and the event is retried on the next pass.
    pub async fn drain_once(&self) -> Result<DrainReport, StorageError> {
        let mut report = DrainReport::default();
        if !self.broker_connected() {
            report.broker_down = true;
            return Ok(report);
        }

        let events = self.store.list_unpublished(self.batch_size).await?;
        let mut held = self.held.lock().await;
        let mut blocked: HashSet<(String, Uuid)> = HashSet::new();
        let now = Instant::now();

        for event in events {
            let aggregate = (event.aggregate_type.clone(), event.aggregate_id);
            if blocked.contains(&aggregate) {
                report.deferred += 1;
                continue;
            }
            if held.get(&event.id).is_some_and(|until| *until > now) {
                report.deferred += 1;
                blocked.insert(aggregate);
                continue;
            }

            match self.publisher.publish(&event).await {
                Ok(()) => {
                    held.remove(&event.id);
                    // A crash here republishes on restart; consumers dedupe on message id.
                    if let Err(e) = self.store.mark_published(event.id, Utc::now()).await {
                        error!(event_id = %event.id, error = %e, "Failed to mark event published");
                        blocked.insert(aggregate);
                        continue;
                    }
                    debug!(event_id = %event.id, event_type = %event.event_type, "Relayed event");
                    report.published += 1;
                }
                Err(publish_error) if publish_error.is_connection() => {
                    warn!(
                        event_id = %event.id,
                        error = %publish_error,
                        "Broker unavailable, pausing outbox pass"
                    );
                    report.broker_down = true;
                    break;
                }
                Err(publish_error) => {
                    report.failed += 1;
                    blocked.insert(aggregate);

                    match self.store.increment_retry(event.id).await {
                        Ok(retries) if retries > self.max_retries => {
                            held.remove(&event.id);
                            error!(
                                event_id = %event.id,
                                event_type = %event.event_type,
                                retries,
                                error = %publish_error,
                                "Outbox event dead-lettered"
                            );
                        }
                        Ok(retries) => {
                            let delay = self.retry_delay(retries);
                            held.insert(event.id, Instant::now() + delay);
                            warn!(
                                event_id = %event.id,
                                event_type = %event.event_type,
                                retries,
                                retry_in_ms = delay.as_millis() as u64,
                                error = %publish_error,
                                "Publish failed, will retry"
                            );
                        }
                        Err(e) => {
                            error!(event_id = %event.id, error = %e, "Failed to record publish retry");
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Resolve once the followed connection is usable again, or can never
    /// be. Returns at once when no connection is followed.
    async fn wait_for_broker(&self) {
        if let Some(status) = &self.connection {
            let mut status = status.clone();
            let _ = status
                .wait_for(|s| !matches!(s, ConnectionStatus::Reconnecting { .. }))
                .await;
        }
    }
}

// ============================================================================
// Background Task
// ============================================================================

/// Handle to a running relay task.
pub struct RelayHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    /// Signal the relay to stop after its current pass.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop and wait for the current pass to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.join.await {
            error!(error = %e, "Outbox relay task panicked");
        }
    }
}

/// Spawn a task that drains the outbox every `interval` until stopped.
pub fn spawn_relay(relay: Arc<OutboxRelay>, interval: Duration) -> RelayHandle {
    let (cancel_tx, mut cancel_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Outbox relay started");

        loop {
            let mut broker_down = false;
            match relay.drain_once().await {
                Ok(report) if report != DrainReport::default() => {
                    info!(
                        published = report.published,
                        failed = report.failed,
                        deferred = report.deferred,
                        broker_down = report.broker_down,
                        "Outbox pass"
                    );
                    broker_down = report.broker_down;
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Outbox pass failed"),
            }

            if broker_down {
                tokio::select! {
                    _ = relay.wait_for_broker() => {}
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("Outbox relay stopped");
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!("Outbox relay stopped");
                        break;
                    }
                }
            }
        }
    });

    RelayHandle {
        cancel: cancel_tx,
        join,
    }
}

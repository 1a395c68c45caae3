//! Auto-reconnecting broker connection.
//!
//! ```text
//! connect ──ok──> Connected ──closed──> Reconnecting ──ok──> Connected
//!    │                                       │
//!    └─err: fatal                            └─attempts used up──> Terminal
//! ```
//!
//! The first dial is synchronous and its failure is returned to the caller.
//! After that a watcher task owns the lifecycle: it waits for the closure
//! signal, swaps the state to `Reconnecting`, redials with a fixed delay up to
//! a bounded number of attempts, and either installs the new connection or
//! parks the manager in `Terminal`. Channel creation reads the state and
//! fails fast unless it is `Connected`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ConstantBuilder};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{error, info, warn};

use super::{BrokerError, MessagingConfig, Result};

/// Receives one message per unsolicited connection closure.
pub type ClosedSignal = mpsc::UnboundedReceiver<String>;

/// Dials the broker.
///
/// Implementations:
/// - `AmqpConnector`: RabbitMQ via lapin (`amqp` feature)
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;
    type Channel: Send + 'static;

    /// Open a connection and the signal that fires when it closes.
    async fn connect(&self) -> Result<(Self::Connection, ClosedSignal)>;

    /// Whether the connection is usable right now.
    fn is_open(&self, conn: &Self::Connection) -> bool;

    /// Open a channel on a live connection.
    async fn create_channel(&self, conn: &Self::Connection) -> Result<Self::Channel>;

    /// Close the connection gracefully.
    async fn close(&self, conn: Self::Connection);
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// Redialing; `attempt` is 0 before the first redial.
    Reconnecting { attempt: usize },
    /// Reconnection gave up. Operator intervention required.
    Terminal,
    /// Shut down on request.
    Disconnected,
}

/// Reconnect schedule.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: usize,
}

impl From<&MessagingConfig> for ReconnectPolicy {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

enum State<T> {
    Connected(T),
    Reconnecting,
    Terminal,
    Disconnected,
}

struct Shared<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
    state: RwLock<State<C::Connection>>,
    status: watch::Sender<ConnectionStatus>,
}

impl<C: Connector> Shared<C> {
    /// Publish a status; `Disconnected` is final and never overwritten.
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == ConnectionStatus::Disconnected {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Replace the state unless shutdown already ran, in which case the
    /// rejected state is handed back.
    async fn install(
        &self,
        next: State<C::Connection>,
        status: ConnectionStatus,
    ) -> std::result::Result<(), State<C::Connection>> {
        let mut state = self.state.write().await;
        if matches!(*state, State::Disconnected) {
            return Err(next);
        }
        *state = next;
        self.set_status(status);
        Ok(())
    }
}

/// Process-wide broker connection with a reconnect lifecycle.
pub struct ConnectionManager<C: Connector> {
    shared: Arc<Shared<C>>,
    cancel: watch::Sender<bool>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Dial the broker and start the watcher.
    ///
    /// A failed first dial is returned as is; callers treat it as fatal.
    pub async fn connect(connector: C, policy: ReconnectPolicy) -> Result<Self> {
        let (conn, closed) = connector.connect().await?;
        info!("Connected to broker");

        let (status, _) = watch::channel(ConnectionStatus::Connected);
        let shared = Arc::new(Shared {
            connector,
            policy,
            state: RwLock::new(State::Connected(conn)),
            status,
        });

        let (cancel, cancel_rx) = watch::channel(false);
        tokio::spawn(watch_connection(Arc::clone(&shared), closed, cancel_rx));

        Ok(Self { shared, cancel })
    }

    /// Current state.
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Resolve once reconnection has given up.
    pub async fn wait_terminal(&self) {
        let mut rx = self.shared.status.subscribe();
        // The sender lives in `shared`, which outlives this borrow.
        let _ = rx.wait_for(|s| *s == ConnectionStatus::Terminal).await;
    }

    /// Open a channel, failing fast unless connected.
    pub async fn create_channel(&self) -> Result<C::Channel> {
        let conn = {
            let state = self.shared.state.read().await;
            match &*state {
                State::Connected(conn) => conn.clone(),
                State::Reconnecting | State::Disconnected => {
                    return Err(BrokerError::ConnectionClosed)
                }
                State::Terminal => {
                    return Err(BrokerError::RetriesExhausted {
                        attempts: self.shared.policy.max_attempts,
                    })
                }
            }
        };

        if !self.shared.connector.is_open(&conn) {
            return Err(BrokerError::ConnectionClosed);
        }
        self.shared.connector.create_channel(&conn).await
    }

    /// Stop the watcher and close the connection.
    pub async fn shutdown(&self) {
        let _ = self.cancel.send(true);

        let previous = {
            let mut state = self.shared.state.write().await;
            std::mem::replace(&mut *state, State::Disconnected)
        };
        self.shared.status.send_replace(ConnectionStatus::Disconnected);

        if let State::Connected(conn) = previous {
            self.shared.connector.close(conn).await;
            info!("Broker connection closed");
        }
    }
}

async fn watch_connection<C: Connector>(
    shared: Arc<Shared<C>>,
    mut closed: ClosedSignal,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let reason = tokio::select! {
            reason = closed.recv() => reason.unwrap_or_else(|| "closure signal dropped".to_string()),
            _ = cancel.changed() => return,
        };
        if *cancel.borrow() {
            return;
        }

        warn!(reason = %reason, "Broker connection closed, reconnecting");
        if shared
            .install(State::Reconnecting, ConnectionStatus::Reconnecting { attempt: 0 })
            .await
            .is_err()
        {
            return;
        }

        let backoff = ConstantBuilder::default()
            .with_delay(shared.policy.delay)
            .with_max_times(shared.policy.max_attempts)
            .build();

        let mut reconnected = None;
        for (i, delay) in backoff.enumerate() {
            let attempt = i + 1;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.changed() => return,
            }

            shared.set_status(ConnectionStatus::Reconnecting { attempt });
            let dialed = tokio::select! {
                dialed = shared.connector.connect() => dialed,
                _ = cancel.changed() => return,
            };
            match dialed {
                Ok(pair) => {
                    info!(attempt, "Reconnected to broker");
                    reconnected = Some(pair);
                    break;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = shared.policy.max_attempts,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }

        match reconnected {
            Some((conn, signal)) => {
                match shared
                    .install(State::Connected(conn), ConnectionStatus::Connected)
                    .await
                {
                    Ok(()) => closed = signal,
                    Err(rejected) => {
                        if let State::Connected(conn) = rejected {
                            shared.connector.close(conn).await;
                        }
                        info!("Shut down during reconnect, discarded new connection");
                        return;
                    }
                }
            }
            None => {
                error!(
                    attempts = shared.policy.max_attempts,
                    "Broker reconnection exhausted, connection is terminal"
                );
                let _ = shared
                    .install(State::Terminal, ConnectionStatus::Terminal)
                    .await;
                return;
            }
        }
    }
}

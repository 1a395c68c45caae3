//! lapin dialer for the broker connection manager.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::mpsc;
use tracing::warn;

use crate::bus::connection::{ClosedSignal, Connector};
use crate::bus::{BrokerError, Result};

/// lapin connector.
pub struct AmqpConnector {
    url: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    type Connection = Arc<Connection>;
    type Channel = Channel;

    async fn connect(&self) -> Result<(Self::Connection, ClosedSignal)> {
        let conn = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to connect: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        conn.on_error(move |e| {
            let _ = tx.send(e.to_string());
        });

        Ok((Arc::new(conn), rx))
    }

    fn is_open(&self, conn: &Self::Connection) -> bool {
        conn.status().connected()
    }

    async fn create_channel(&self, conn: &Self::Connection) -> Result<Self::Channel> {
        conn.create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn close(&self, conn: Self::Connection) {
        if let Err(e) = conn.close(200, "shutdown").await {
            warn!(error = %e, "Error closing broker connection");
        }
    }
}

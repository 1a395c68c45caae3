//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::interfaces::{BookingStore, OutboxStore, PaymentStore, StorageError};

pub mod schema;
pub mod sql;

#[cfg(feature = "sqlite")]
pub use sql::sqlite::{SqliteBookingStore, SqliteOutboxStore, SqlitePaymentStore};

#[cfg(feature = "postgres")]
pub use sql::postgres::{PostgresBookingStore, PostgresOutboxStore, PostgresPaymentStore};

/// The three stores, sharing one pool.
#[derive(Clone)]
pub struct Stores {
    pub bookings: Arc<dyn BookingStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

/// Open a SQLite pool and run migrations.
///
/// One connection: SQLite serializes writers anyway, and an in-memory
/// database exists per connection.
#[cfg(feature = "sqlite")]
pub async fn connect_sqlite(path: &str) -> Result<sqlx::SqlitePool, StorageError> {
    let url = if path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Database(sqlx::Error::Io(e)))?;
        }
        format!("sqlite:{}?mode=rwc", path)
    };

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await?;
    sqlx::migrate!("migrations/sqlite").run(&pool).await?;
    Ok(pool)
}

/// Open a PostgreSQL pool and run migrations.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(
    uri: &str,
    max_connections: u32,
) -> Result<sqlx::PgPool, StorageError> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(uri)
        .await?;
    sqlx::migrate!("migrations/postgres").run(&pool).await?;
    Ok(pool)
}

/// Initialize storage based on configuration.
///
/// `max_retries` is the outbox retry budget before an event dead-letters.
pub async fn init_storage(config: &StorageConfig, max_retries: i64) -> Result<Stores, StorageError> {
    match &config.storage_type {
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!(path = %config.sqlite.path, "Storage: sqlite");
            let pool = connect_sqlite(&config.sqlite.path).await?;
            Ok(Stores {
                bookings: Arc::new(SqliteBookingStore::new(pool.clone())),
                payments: Arc::new(SqlitePaymentStore::new(pool.clone())),
                outbox: Arc::new(SqliteOutboxStore::with_max_retries(pool, max_retries)),
            })
        }
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            info!("Storage: postgres");
            let pool =
                connect_postgres(&config.postgres.uri, config.postgres.max_connections).await?;
            Ok(Stores {
                bookings: Arc::new(PostgresBookingStore::new(pool.clone())),
                payments: Arc::new(PostgresPaymentStore::new(pool.clone())),
                outbox: Arc::new(PostgresOutboxStore::with_max_retries(pool, max_retries)),
            })
        }
        #[allow(unreachable_patterns)]
        other => Err(StorageError::Database(sqlx::Error::Configuration(
            format!("storage type {:?} not enabled in this build", other).into(),
        ))),
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::config::SqliteConfig;

    #[tokio::test]
    async fn test_init_storage_opens_configured_sqlite() {
        let config = StorageConfig {
            storage_type: StorageType::Sqlite,
            sqlite: SqliteConfig {
                path: ":memory:".to_string(),
            },
            ..Default::default()
        };

        let stores = init_storage(&config, 3).await.unwrap();
        assert!(stores.outbox.list_unpublished(10).await.unwrap().is_empty());
        assert_eq!(config.storage_type, StorageType::Sqlite);
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_init_storage_rejects_backend_not_built() {
        let config = StorageConfig {
            storage_type: StorageType::Postgres,
            ..Default::default()
        };

        assert!(init_storage(&config, 3).await.is_err());
    }
}

//! Unified SQL storage implementations.
//!
//! This module provides shared implementations for SQL-based storage backends
//! (PostgreSQL, SQLite). The implementations are parameterized by database type
//! using the `SqlDatabase` trait; a macro per store generates the concrete
//! impls, since transactions need the backend's own connection type.

mod booking_store;
mod outbox_store;
mod payment_store;
mod query;
pub(crate) mod rows;

pub use booking_store::SqlBookingStore;
pub use outbox_store::SqlOutboxStore;
pub use payment_store::SqlPaymentStore;
pub use query::SqlDatabase;

#[cfg(feature = "postgres")]
pub mod postgres {
    //! PostgreSQL database backend.

    use sea_query::PostgresQueryBuilder;
    use sqlx::PgPool;

    /// PostgreSQL database marker type.
    pub struct Postgres;

    impl super::SqlDatabase for Postgres {
        type Pool = PgPool;

        fn build_select(stmt: sea_query::SelectStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_update(stmt: sea_query::UpdateStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }
    }

    /// PostgreSQL booking store.
    pub type PostgresBookingStore = super::SqlBookingStore<Postgres>;

    /// PostgreSQL payment store.
    pub type PostgresPaymentStore = super::SqlPaymentStore<Postgres>;

    /// PostgreSQL outbox store.
    pub type PostgresOutboxStore = super::SqlOutboxStore<Postgres>;
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! SQLite database backend.

    use sea_query::SqliteQueryBuilder;
    use sqlx::SqlitePool;

    /// SQLite database marker type.
    pub struct Sqlite;

    impl super::SqlDatabase for Sqlite {
        type Pool = SqlitePool;

        fn build_select(stmt: sea_query::SelectStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_update(stmt: sea_query::UpdateStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }
    }

    /// SQLite booking store.
    pub type SqliteBookingStore = super::SqlBookingStore<Sqlite>;

    /// SQLite payment store.
    pub type SqlitePaymentStore = super::SqlPaymentStore<Sqlite>;

    /// SQLite outbox store.
    pub type SqliteOutboxStore = super::SqlOutboxStore<Sqlite>;
}

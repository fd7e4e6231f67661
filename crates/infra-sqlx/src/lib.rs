// txoutbox Infrastructure - sqlx adapters
// Implements: TransactionManager, MigrationManager over PostgreSQL, MySQL and SQLite

mod connection;
mod error;
mod migration;
mod transaction;

pub use connection::{
    create_pool, ConnectionConfig, SqlxConnectionProvider, DEFAULT_ACQUIRE_TIMEOUT,
    DEFAULT_MAX_CONNECTIONS,
};
pub use migration::SqlMigrationManager;
pub use transaction::{SqlxTransaction, SqlxTransactionManager};

// Note: sqlx::Error conversion goes through error::map_sqlx_error
// (orphan rules prevent From<sqlx::Error> for OutboxError here)

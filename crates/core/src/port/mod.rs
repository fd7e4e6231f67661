// Port Layer - Interfaces for external dependencies

pub mod id_provider;
pub mod migration;
pub mod persistor;
pub mod serializer;
pub mod transaction;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use migration::MigrationManager;
pub use persistor::Persistor;
pub use serializer::{InvocationSerializer, JsonInvocationSerializer};
pub use transaction::{
    Row, SqlValue, Statement, Transaction, TransactionContext, TransactionManager,
};

// txoutbox Core - Outbox Entries, Ports & the Persistor Protocol
// NO database driver dependencies (statements go through port::TransactionContext)

pub mod application;
pub mod dialect;
pub mod domain;
pub mod error;
pub mod port;

pub use application::DefaultPersistor;
pub use dialect::{Dialect, DialectKind};
pub use domain::{EntryId, Invocation, OutboxEntry};
pub use error::{DatabaseError, OutboxError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Domain Layer - Outbox entries and the work they carry

pub mod entry;
pub mod error;
pub mod invocation;

// Re-exports
pub use entry::{EntryId, OutboxEntry, MAX_ID_LEN};
pub use error::ValidationError;
pub use invocation::Invocation;

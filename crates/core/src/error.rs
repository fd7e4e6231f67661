// Central Error Type for the Outbox

use std::fmt;
use thiserror::Error;

/// Outbox error type
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Validation error: {0}")]
    Validation(#[from] crate::domain::ValidationError),

    /// An update or delete matched no row: the entry was claimed, changed or
    /// removed by someone else. Abandon this attempt and re-read next cycle.
    #[error("Optimistic lock conflict on entry {id} (version {version})")]
    OptimisticLock { id: String, version: i32 },

    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt outbox entry {id}: {reason}")]
    CorruptEntry { id: String, reason: String },

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OutboxError {
    /// Lost a race with another worker; retrying later is the right reaction
    pub fn is_conflict(&self) -> bool {
        matches!(self, OutboxError::OptimisticLock { .. })
    }

    /// Storage-level failure (statement error or unreadable data)
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            OutboxError::Database(_)
                | OutboxError::Serialization(_)
                | OutboxError::CorruptEntry { .. }
        )
    }
}

/// Result type alias using OutboxError
pub type Result<T> = std::result::Result<T, OutboxError>;

/// Driver-independent view of a failed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    /// SQLSTATE, SQLite extended result code or MySQL error number
    pub code: Option<String>,
    pub message: String,
}

impl DatabaseError {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Primary key / unique index violation on any supported backend
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self.code(),
            // SQLite (SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY),
            // PostgreSQL unique_violation, MySQL ER_DUP_ENTRY
            Some("2067" | "1555" | "23505" | "1062")
        )
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<DatabaseError> for OutboxError {
    fn from(err: DatabaseError) -> Self {
        OutboxError::Database(err)
    }
}

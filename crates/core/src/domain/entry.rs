// Outbox Entry Domain Model

use crate::domain::error::{Result, ValidationError};
use crate::domain::invocation::Invocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entry ID (assigned by the creator before the first save)
pub type EntryId = String;

/// Longest id every supported backend can index as a primary key
pub const MAX_ID_LEN: usize = 255;

/// A durable, retryable unit of work stored in the outbox table.
///
/// An entry value is only meaningful inside the transaction that read or locked
/// it: `version` can go stale as soon as that transaction ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: EntryId,
    pub invocation: Invocation,

    /// Not eligible for selection before this instant (stored as epoch ms)
    pub next_attempt_time: DateTime<Utc>,

    /// Prior processing attempts
    pub attempts: i32,

    /// Permanently excluded from selection until an operator intervenes
    pub blacklisted: bool,

    /// Optimistic-concurrency token, +1 on every successful update
    pub version: i32,
}

impl OutboxEntry {
    /// Create a fresh entry: no attempts, version 0, not blacklisted
    ///
    /// # Arguments
    ///
    /// * `id` - Unique entry ID (injected, see [`IdProvider`](crate::port::IdProvider))
    /// * `invocation` - Work to perform
    /// * `next_attempt_time` - Earliest time the entry may be selected
    pub fn new(
        id: impl Into<EntryId>,
        invocation: Invocation,
        next_attempt_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            invocation,
            next_attempt_time,
            attempts: 0,
            blacklisted: false,
            version: 0,
        }
    }

    /// Check the structural constraints required before any write
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::Blank { field: "id" });
        }
        let id_len = self.id.chars().count();
        if id_len > MAX_ID_LEN {
            return Err(ValidationError::TooLong {
                field: "id",
                len: id_len,
                max: MAX_ID_LEN,
            });
        }
        if self.invocation.target.trim().is_empty() {
            return Err(ValidationError::Blank {
                field: "invocation.target",
            });
        }
        if self.invocation.method.trim().is_empty() {
            return Err(ValidationError::Blank {
                field: "invocation.method",
            });
        }
        if self.attempts < 0 {
            return Err(ValidationError::Negative {
                field: "attempts",
                value: self.attempts,
            });
        }
        if self.version < 0 {
            return Err(ValidationError::Negative {
                field: "version",
                value: self.version,
            });
        }
        Ok(())
    }

    /// Short form for log lines: `target.method(args) [id]`
    pub fn description(&self) -> String {
        format!("{} [{}]", self.invocation, self.id)
    }
}

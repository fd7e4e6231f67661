// Domain Error Types

use thiserror::Error;

/// Structural problems with an entry, detected before any statement is issued
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be blank")]
    Blank { field: &'static str },

    #[error("{field} is too long ({len} > {max} characters)")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: i32 },

    #[error("{field} cannot be incremented past {value}")]
    Exhausted { field: &'static str, value: i32 },
}

pub type Result<T> = std::result::Result<T, ValidationError>;

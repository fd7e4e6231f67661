// sqlx error mapping

use sqlx::mysql::MySqlDatabaseError;
use txoutbox_core::error::{DatabaseError, OutboxError};

/// Convert sqlx::Error to OutboxError, keeping the driver's error code
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> OutboxError {
    OutboxError::Database(database_error(&err))
}

fn database_error(err: &sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::Database(db_err) => {
            // MySQL reports most failures as SQLSTATE HY000; the error number identifies them
            let code = match db_err.try_downcast_ref::<MySqlDatabaseError>() {
                Some(mysql) => Some(mysql.number().to_string()),
                None => db_err.code().map(|c| c.into_owned()),
            };

            let message = match code.as_deref() {
                // SQLite extended codes, PostgreSQL SQLSTATE, MySQL ER_DUP_ENTRY
                Some("2067" | "1555" | "23505" | "1062") => {
                    format!("Unique constraint violation: {}", db_err.message())
                }
                Some("5") => format!("Database locked (SQLITE_BUSY): {}", db_err.message()),
                _ => db_err.message().to_string(),
            };
            DatabaseError::new(code, message)
        }
        sqlx::Error::RowNotFound => DatabaseError::new(None, "Row not found"),
        sqlx::Error::ColumnNotFound(col) => {
            DatabaseError::new(None, format!("Column not found: {}", col))
        }
        sqlx::Error::PoolTimedOut => {
            DatabaseError::new(None, "Timed out waiting for a pooled connection")
        }
        // Connection, pool, protocol and decode errors
        _ => DatabaseError::new(None, err.to_string()),
    }
}

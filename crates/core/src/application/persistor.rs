// Default Persistor - entry CRUD, row mapping and the dequeue lock protocol

use crate::dialect::{Dialect, LockPlan, LockProbe, OUTBOX_TABLE};
use crate::domain::{OutboxEntry, ValidationError};
use crate::error::{OutboxError, Result};
use crate::port::{
    InvocationSerializer, JsonInvocationSerializer, MigrationManager, Persistor, Row, Statement,
    TransactionContext, TransactionManager,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracing::debug;

const COLUMNS: &str = "id, invocation, next_attempt_time, attempts, blacklisted, version";

/// Every statement the persistor issues, rendered once for one dialect
#[derive(Debug, Clone)]
struct Statements {
    insert: String,
    delete: String,
    update: String,
    lock: LockPlan,
    select_batch: String,
}

impl Statements {
    fn for_dialect(dialect: &Dialect) -> Self {
        Self {
            // Batched: rendered by the transaction when it is flushed
            insert: format!(
                "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?)",
                OUTBOX_TABLE, COLUMNS
            ),
            delete: dialect.render(&format!(
                "DELETE FROM {} WHERE id = ? AND version = ?",
                OUTBOX_TABLE
            )),
            update: dialect.render(&format!(
                "UPDATE {} SET next_attempt_time = ?, attempts = ?, blacklisted = ?, version = ? \
                 WHERE id = ? AND version = ?",
                OUTBOX_TABLE
            )),
            lock: dialect.lock_plan(),
            select_batch: dialect.render(&format!(
                "SELECT {} FROM {} WHERE next_attempt_time < {} AND blacklisted = false LIMIT ?",
                COLUMNS,
                OUTBOX_TABLE,
                dialect.now_millis_sql()
            )),
        }
    }
}

/// The default [`Persistor`].
///
/// Due times are compared against the database server clock so that workers
/// on different hosts agree on what is due.
pub struct DefaultPersistor {
    dialect: Dialect,
    serializer: Arc<dyn InvocationSerializer>,
    migrations: Arc<dyn MigrationManager>,
    statements: Statements,
}

impl DefaultPersistor {
    /// Create a persistor using the JSON invocation serializer
    pub fn new(dialect: Dialect, migrations: Arc<dyn MigrationManager>) -> Self {
        Self {
            dialect,
            serializer: Arc::new(JsonInvocationSerializer),
            migrations,
            statements: Statements::for_dialect(&dialect),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn InvocationSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    fn map(&self, row: &dyn Row) -> Result<OutboxEntry> {
        let id = row.get_text("id")?;
        let corrupt = |reason: String| OutboxError::CorruptEntry {
            id: id.clone(),
            reason,
        };

        let invocation = self
            .serializer
            .deserialize(&row.get_text("invocation")?)
            .map_err(|e| corrupt(format!("unreadable invocation: {}", e)))?;

        let millis = row.get_i64("next_attempt_time")?;
        let next_attempt_time = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| corrupt(format!("next_attempt_time {} is out of range", millis)))?;

        let attempts = row.get_i64("attempts")?;
        let attempts = i32::try_from(attempts)
            .map_err(|_| corrupt(format!("attempts {} does not fit", attempts)))?;
        let version = row.get_i64("version")?;
        let version = i32::try_from(version)
            .map_err(|_| corrupt(format!("version {} does not fit", version)))?;
        let blacklisted = row.get_bool("blacklisted")?;

        let entry = OutboxEntry {
            id,
            invocation,
            next_attempt_time,
            attempts,
            blacklisted,
            version,
        };
        debug!(entry_id = %entry.id, version = entry.version, "Found {}", entry.description());
        Ok(entry)
    }
}

#[async_trait]
impl Persistor for DefaultPersistor {
    async fn migrate(&self, transactions: &dyn TransactionManager) -> Result<()> {
        self.migrations.migrate(transactions).await
    }

    async fn save(&self, tx: &mut dyn TransactionContext, entry: &OutboxEntry) -> Result<()> {
        entry.validate()?;
        let invocation = self.serializer.serialize(&entry.invocation)?;

        tx.add_batch(
            Statement::new(&self.statements.insert)
                .bind(entry.id.as_str())
                .bind(invocation)
                .bind(entry.next_attempt_time.timestamp_millis())
                .bind(entry.attempts)
                .bind(entry.blacklisted)
                .bind(entry.version),
        );
        debug!(entry_id = %entry.id, "Inserted {} in batch", entry.description());
        Ok(())
    }

    async fn delete(&self, tx: &mut dyn TransactionContext, entry: &OutboxEntry) -> Result<()> {
        let affected = tx
            .execute(
                Statement::new(&self.statements.delete)
                    .bind(entry.id.as_str())
                    .bind(entry.version),
            )
            .await?;

        if affected != 1 {
            return Err(OutboxError::OptimisticLock {
                id: entry.id.clone(),
                version: entry.version,
            });
        }
        debug!(entry_id = %entry.id, "Deleted {}", entry.description());
        Ok(())
    }

    async fn update(
        &self,
        tx: &mut dyn TransactionContext,
        entry: &mut OutboxEntry,
    ) -> Result<()> {
        entry.validate()?;
        let next_version = entry.version.checked_add(1).ok_or(ValidationError::Exhausted {
            field: "version",
            value: entry.version,
        })?;

        let affected = tx
            .execute(
                Statement::new(&self.statements.update)
                    .bind(entry.next_attempt_time.timestamp_millis())
                    .bind(entry.attempts)
                    .bind(entry.blacklisted)
                    .bind(next_version)
                    .bind(entry.id.as_str())
                    .bind(entry.version),
            )
            .await?;

        if affected != 1 {
            return Err(OutboxError::OptimisticLock {
                id: entry.id.clone(),
                version: entry.version,
            });
        }
        entry.version = next_version;
        debug!(entry_id = %entry.id, version = entry.version, "Updated {}", entry.description());
        Ok(())
    }

    async fn lock(&self, tx: &mut dyn TransactionContext, entry: &OutboxEntry) -> Result<bool> {
        let LockPlan { setup, probe } = &self.statements.lock;

        if let Some(setup) = setup {
            tx.execute(Statement::new(setup)).await?;
        }

        let outcome = match probe {
            LockProbe::Select(sql) => tx
                .fetch_all(Statement::new(sql).bind(entry.id.as_str()).bind(entry.version))
                .await
                .map(|rows| !rows.is_empty()),
            LockProbe::Touch(sql) => tx
                .execute(Statement::new(sql).bind(entry.id.as_str()).bind(entry.version))
                .await
                .map(|affected| affected == 1),
        };

        match outcome {
            Ok(acquired) => {
                debug!(entry_id = %entry.id, acquired, "Lock attempt on {}", entry.description());
                Ok(acquired)
            }
            Err(OutboxError::Database(err)) if self.dialect.is_lock_timeout(&err) => {
                debug!(entry_id = %entry.id, error = %err, "Lock attempt timed out on {}", entry.description());
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn select_batch(
        &self,
        tx: &mut dyn TransactionContext,
        batch_size: usize,
    ) -> Result<Vec<OutboxEntry>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);

        let rows = tx
            .fetch_all(Statement::new(&self.statements.select_batch).bind(limit))
            .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            result.push(self.map(row.as_ref())?);
        }
        debug!("Found {} results", result.len());
        Ok(result)
    }
}

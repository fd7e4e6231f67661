// Migration Runner

use async_trait::async_trait;
use tracing::{debug, info};
use txoutbox_core::error::{OutboxError, Result};
use txoutbox_core::port::{MigrationManager, Statement, TransactionContext, TransactionManager};
use txoutbox_core::{Dialect, DialectKind};

const VERSION_TABLE: &str = "outbox_schema_version";

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const SQLITE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_outbox_entries",
        sql: include_str!("../migrations/sqlite/001_create_outbox_entries.sql"),
    },
    Migration {
        version: 2,
        name: "add_due_index",
        sql: include_str!("../migrations/sqlite/002_add_due_index.sql"),
    },
];

const POSTGRES_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_outbox_entries",
        sql: include_str!("../migrations/postgres/001_create_outbox_entries.sql"),
    },
    Migration {
        version: 2,
        name: "add_due_index",
        sql: include_str!("../migrations/postgres/002_add_due_index.sql"),
    },
];

const MYSQL_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_outbox_entries",
        sql: include_str!("../migrations/mysql/001_create_outbox_entries.sql"),
    },
    Migration {
        version: 2,
        name: "add_due_index",
        sql: include_str!("../migrations/mysql/002_add_due_index.sql"),
    },
];

/// Applies the outbox schema scripts for one backend, in version order
///
/// Each migration runs in its own transaction holding a lock on the version
/// row, so concurrent processes apply every script exactly once. MySQL commits
/// DDL implicitly; there the version row is still written after the script.
pub struct SqlMigrationManager {
    dialect: Dialect,
}

impl SqlMigrationManager {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn migrations(&self) -> &'static [Migration] {
        match self.dialect.kind() {
            DialectKind::PostgreSql => POSTGRES_MIGRATIONS,
            DialectKind::MySql => MYSQL_MIGRATIONS,
            DialectKind::Sqlite => SQLITE_MIGRATIONS,
        }
    }

    /// Highest version this build knows how to apply
    pub fn latest_version(&self) -> i32 {
        self.migrations().last().map(|m| m.version).unwrap_or(0)
    }

    /// Version recorded in the database (fails if migrations never ran)
    pub async fn current_version(&self, transactions: &dyn TransactionManager) -> Result<i32> {
        let mut tx = transactions.begin_transaction().await?;
        let version = read_version(tx.as_mut()).await;
        tx.rollback().await?;
        version
    }

    async fn ensure_version_table(&self, transactions: &dyn TransactionManager) -> Result<()> {
        let mut tx = transactions
            .begin_transaction()
            .await
            .map_err(|e| migration_error("begin transaction", e))?;
        tx.execute(Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (version INTEGER NOT NULL)",
            VERSION_TABLE
        )))
        .await
        .map_err(|e| migration_error("create version table", e))?;

        let rows = tx
            .fetch_all(Statement::new(format!(
                "SELECT COUNT(*) AS total FROM {}",
                VERSION_TABLE
            )))
            .await
            .map_err(|e| migration_error("count version rows", e))?;
        let total = match rows.first() {
            Some(row) => row
                .get_i64("total")
                .map_err(|e| migration_error("count version rows", e))?,
            None => 0,
        };
        if total == 0 {
            tx.execute(Statement::new(format!(
                "INSERT INTO {} (version) VALUES (0)",
                VERSION_TABLE
            )))
            .await
            .map_err(|e| migration_error("seed version table", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| migration_error("commit version table", e))
    }

    async fn lock_version(&self, tx: &mut dyn TransactionContext) -> Result<()> {
        let locked = match self.dialect.kind() {
            // A write is the only row-level claim SQLite offers; it takes the database lock
            DialectKind::Sqlite => {
                tx.execute(Statement::new(format!(
                    "UPDATE {} SET version = version",
                    VERSION_TABLE
                )))
                .await
                .map(|_| ())
            }
            DialectKind::PostgreSql | DialectKind::MySql => tx
                .fetch_all(Statement::new(format!(
                    "SELECT version FROM {} FOR UPDATE",
                    VERSION_TABLE
                )))
                .await
                .map(|_| ()),
        };
        locked.map_err(|e| migration_error("lock version table", e))
    }

    async fn apply(
        &self,
        transactions: &dyn TransactionManager,
        migration: &Migration,
    ) -> Result<bool> {
        let mut tx = transactions
            .begin_transaction()
            .await
            .map_err(|e| migration_error("begin transaction", e))?;
        self.lock_version(tx.as_mut()).await?;

        let current = read_version(tx.as_mut())
            .await
            .map_err(|e| migration_error("read version", e))?;
        if current >= migration.version {
            debug!(version = migration.version, current, "Migration already applied");
            tx.rollback()
                .await
                .map_err(|e| migration_error("rollback", e))?;
            return Ok(false);
        }

        info!(
            "Applying migration {:03}: {}",
            migration.version, migration.name
        );
        for statement in split_statements(migration.sql) {
            tx.execute(Statement::new(statement))
                .await
                .map_err(|e| migration_error(migration.name, e))?;
        }

        let record = self
            .dialect
            .render(&format!("UPDATE {} SET version = ?", VERSION_TABLE));
        tx.execute(Statement::new(record).bind(migration.version))
            .await
            .map_err(|e| migration_error("record version", e))?;
        tx.commit()
            .await
            .map_err(|e| migration_error(migration.name, e))?;
        Ok(true)
    }
}

#[async_trait]
impl MigrationManager for SqlMigrationManager {
    async fn migrate(&self, transactions: &dyn TransactionManager) -> Result<()> {
        info!(dialect = %self.dialect, "Running outbox migrations...");
        self.ensure_version_table(transactions).await?;

        let mut applied = 0;
        for migration in self.migrations() {
            if self.apply(transactions, migration).await? {
                applied += 1;
            }
        }

        info!(
            applied,
            version = self.latest_version(),
            "Outbox schema is up to date"
        );
        Ok(())
    }
}

async fn read_version(tx: &mut dyn TransactionContext) -> Result<i32> {
    let rows = tx
        .fetch_all(Statement::new(format!(
            "SELECT MAX(version) AS version FROM {}",
            VERSION_TABLE
        )))
        .await?;
    let version = match rows.first() {
        Some(row) => row.get_i64("version")?,
        None => 0,
    };
    i32::try_from(version)
        .map_err(|_| OutboxError::Migration(format!("Schema version {} out of range", version)))
}

fn migration_error(step: &str, err: OutboxError) -> OutboxError {
    OutboxError::Migration(format!("{}: {}", step, err))
}

/// Split a script on semicolons, dropping comment lines and empty statements
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|statement| {
            statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}

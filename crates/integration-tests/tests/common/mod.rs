//! Shared fixtures for the persistor integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use txoutbox_core::port::{
    IdProvider, Persistor, Row, Statement, TransactionContext, TransactionManager, UuidProvider,
};
use txoutbox_core::{DefaultPersistor, Dialect, Invocation, OutboxEntry};
use txoutbox_infra_sqlx::{
    ConnectionConfig, SqlMigrationManager, SqlxConnectionProvider, SqlxTransactionManager,
};

/// Lock waits on the fallback backends are bounded by this in tests
pub const TEST_LOCK_TIMEOUT_MS: u64 = 200;

pub fn test_lock_timeout() -> std::time::Duration {
    std::time::Duration::from_millis(TEST_LOCK_TIMEOUT_MS)
}

pub struct Harness {
    pub transactions: SqlxTransactionManager,
    pub persistor: DefaultPersistor,
    pub migrations: Arc<SqlMigrationManager>,
}

/// A fresh SQLite file under the temp dir
pub fn temp_sqlite_url() -> String {
    let path = std::env::temp_dir().join(format!("txoutbox-it-{}.db", UuidProvider.generate_id()));
    format!("sqlite://{}?mode=rwc", path.display())
}

/// Connect (without migrating) to `url` using `dialect`
pub fn harness(url: String, dialect: Dialect) -> Harness {
    let provider = SqlxConnectionProvider::new(ConnectionConfig::new(url, dialect))
        .expect("valid test configuration");
    let migrations = Arc::new(SqlMigrationManager::new(dialect));

    Harness {
        transactions: SqlxTransactionManager::new(Arc::new(provider)),
        persistor: DefaultPersistor::new(dialect, migrations.clone()),
        migrations,
    }
}

/// Migrated SQLite database, ready for entries
pub async fn sqlite_harness() -> Harness {
    let dialect = Dialect::SQLITE.with_lock_timeout(test_lock_timeout());
    let harness = harness(temp_sqlite_url(), dialect);
    harness
        .persistor
        .migrate(&harness.transactions)
        .await
        .expect("migrations apply");
    harness
}

/// Millisecond-precision instant `offset` away from now (storage keeps epoch ms)
pub fn at_offset(offset: Duration) -> DateTime<Utc> {
    let instant = Utc::now() + offset;
    DateTime::<Utc>::from_timestamp_millis(instant.timestamp_millis()).expect("in range")
}

pub fn entry_due_at(next_attempt_time: DateTime<Utc>) -> OutboxEntry {
    let invocation = Invocation::new("com.example.Mailer", "send")
        .with_argument("java.lang.String", serde_json::json!("ops@example.com"))
        .with_argument("int", serde_json::json!(3));
    OutboxEntry::new(UuidProvider.generate_id(), invocation, next_attempt_time)
}

/// An entry that became due a minute ago
pub fn due_entry() -> OutboxEntry {
    entry_due_at(at_offset(-Duration::minutes(1)))
}

/// Save entries in one committed transaction
pub async fn save_committed(harness: &Harness, entries: &[OutboxEntry]) {
    let mut tx = harness.transactions.begin_transaction().await.unwrap();
    for entry in entries {
        harness.persistor.save(tx.as_mut(), entry).await.unwrap();
    }
    tx.commit().await.unwrap();
}

/// Due entries as seen by a fresh transaction
pub async fn select_committed(harness: &Harness, batch_size: usize) -> Vec<OutboxEntry> {
    let mut tx = harness.transactions.begin_transaction().await.unwrap();
    let entries = harness
        .persistor
        .select_batch(tx.as_mut(), batch_size)
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    entries
}

pub async fn run_sql(transactions: &dyn TransactionManager, sql: &str) {
    let mut tx = transactions.begin_transaction().await.unwrap();
    tx.execute(Statement::new(sql)).await.unwrap();
    tx.commit().await.unwrap();
}

pub async fn count_rows(transactions: &dyn TransactionManager, table: &str) -> i64 {
    let mut tx = transactions.begin_transaction().await.unwrap();
    let rows = tx
        .fetch_all(Statement::new(format!("SELECT COUNT(*) AS total FROM {}", table)))
        .await
        .unwrap();
    let total = rows[0].get_i64("total").unwrap();
    tx.rollback().await.unwrap();
    total
}

/// Read one row straight from the table, bypassing the due/blacklist filter
pub async fn stored(harness: &Harness, id: &str) -> Option<(i32, bool, i32)> {
    let mut tx = harness.transactions.begin_transaction().await.unwrap();
    let sql = harness
        .persistor
        .dialect()
        .render("SELECT attempts, blacklisted, version FROM outbox_entries WHERE id = ?");
    let rows = tx
        .fetch_all(Statement::new(sql).bind(id))
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    rows.first().map(|row| {
        (
            row.get_i64("attempts").unwrap() as i32,
            row.get_bool("blacklisted").unwrap(),
            row.get_i64("version").unwrap() as i32,
        )
    })
}

pub async fn is_due(transactions: &dyn TransactionManager, persistor: &DefaultPersistor, id: &str) -> bool {
    let mut tx = transactions.begin_transaction().await.unwrap();
    let found = persistor
        .select_batch(tx.as_mut(), 1000)
        .await
        .unwrap()
        .iter()
        .any(|entry| entry.id == id);
    tx.rollback().await.unwrap();
    found
}

// sqlx Transaction Implementation

use crate::connection::SqlxConnectionProvider;
use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::Row as _;
use sqlx::{Any, AnyConnection, Transaction as DbTransaction};
use std::sync::Arc;
use tracing::debug;
use txoutbox_core::error::Result;
use txoutbox_core::port::{
    Row, SqlValue, Statement, Transaction, TransactionContext, TransactionManager,
};
use txoutbox_core::Dialect;

/// Parameter sets queued for one SQL text
struct PendingBatch {
    sql: String,
    rows: Vec<Vec<SqlValue>>,
}

/// A live database transaction plus the batched statements not yet sent
pub struct SqlxTransaction {
    tx: DbTransaction<'static, Any>,
    dialect: Dialect,
    batches: Vec<PendingBatch>,
}

impl SqlxTransaction {
    /// `dialect` renders queued batches when they are flushed
    pub fn new(tx: DbTransaction<'static, Any>, dialect: Dialect) -> Self {
        Self {
            tx,
            dialect,
            batches: Vec::new(),
        }
    }

    /// The underlying connection, for business writes in the same transaction
    ///
    /// Queued batches are not flushed by statements run here; call
    /// `flush_batches` first when ordering matters.
    pub fn connection(&mut self) -> &mut AnyConnection {
        &mut *self.tx
    }

    pub async fn commit(mut self) -> Result<()> {
        self.flush().await?;
        self.tx.commit().await.map_err(map_sqlx_error)?;
        debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let discarded: usize = self.batches.iter().map(|b| b.rows.len()).sum();
        self.tx.rollback().await.map_err(map_sqlx_error)?;
        debug!(discarded, "Transaction rolled back");
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        for batch in std::mem::take(&mut self.batches) {
            let rows = batch.rows.len();
            let statements = batch_statements(&self.dialect, batch);
            let sent = statements.len();
            for (sql, params) in statements {
                bind_all(sqlx::query(&sql), params)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(map_sqlx_error)?;
            }
            debug!(rows, statements = sent, "Flushed batch");
        }
        Ok(())
    }
}

/// Split `INSERT ... VALUES (...)` into the part up to `VALUES` and the row tuple
fn split_values(sql: &str) -> Option<(&str, &str)> {
    let sql = sql.trim();
    if !sql.get(..6)?.eq_ignore_ascii_case("INSERT") {
        return None;
    }
    let at = sql.rfind("VALUES")? + "VALUES".len();
    let (head, tuple) = (&sql[..at], sql[at..].trim());
    (tuple.starts_with('(') && tuple.ends_with(')')).then_some((head, tuple))
}

/// Rendered statements for one batch
///
/// Single-row inserts are folded into multi-row inserts, as many rows per
/// statement as the backend's bind parameter limit allows. Anything else is
/// sent once per row.
fn batch_statements(dialect: &Dialect, batch: PendingBatch) -> Vec<(String, Vec<SqlValue>)> {
    let PendingBatch { sql, rows } = batch;

    let Some((head, tuple)) = split_values(&sql) else {
        let rendered = dialect.render(&sql);
        return rows
            .into_iter()
            .map(|params| (rendered.clone(), params))
            .collect();
    };

    let width = rows.first().map_or(1, Vec::len).max(1);
    let per_statement = (dialect.max_bind_params() / width).max(1);

    let mut statements = Vec::with_capacity(rows.len().div_ceil(per_statement));
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<Vec<SqlValue>> = rows.by_ref().take(per_statement).collect();
        let sql = dialect.render(&format!("{} {}", head, vec![tuple; chunk.len()].join(", ")));
        statements.push((sql, chunk.into_iter().flatten().collect()));
    }
    statements
}

fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: Vec<SqlValue>,
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Int(v) => query.bind(v),
            SqlValue::BigInt(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
        };
    }
    query
}

struct SqlxRow(AnyRow);

impl Row for SqlxRow {
    fn get_text(&self, column: &str) -> Result<String> {
        self.0.try_get::<String, _>(column).map_err(map_sqlx_error)
    }

    fn get_i64(&self, column: &str) -> Result<i64> {
        // INTEGER is four bytes on PostgreSQL and MySQL, eight on SQLite
        self.0
            .try_get::<i64, _>(column)
            .or_else(|_| self.0.try_get::<i32, _>(column).map(i64::from))
            .map_err(map_sqlx_error)
    }

    fn get_bool(&self, column: &str) -> Result<bool> {
        // SQLite and MySQL hand BOOLEAN columns back as integers
        self.0
            .try_get::<bool, _>(column)
            .or_else(|_| self.0.try_get::<i64, _>(column).map(|v| v != 0))
            .or_else(|_| self.0.try_get::<i32, _>(column).map(|v| v != 0))
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Transaction for SqlxTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        SqlxTransaction::commit(*self).await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        SqlxTransaction::rollback(*self).await
    }
}

#[async_trait]
impl TransactionContext for SqlxTransaction {
    async fn execute(&mut self, statement: Statement) -> Result<u64> {
        self.flush().await?;
        let result = bind_all(sqlx::query(&statement.sql), statement.params)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, statement: Statement) -> Result<Vec<Box<dyn Row>>> {
        self.flush().await?;
        let rows = bind_all(sqlx::query(&statement.sql), statement.params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(SqlxRow(row)) as Box<dyn Row>)
            .collect())
    }

    fn add_batch(&mut self, statement: Statement) {
        if let Some(batch) = self
            .batches
            .last_mut()
            .filter(|batch| batch.sql == statement.sql)
        {
            batch.rows.push(statement.params);
            return;
        }
        self.batches.push(PendingBatch {
            sql: statement.sql,
            rows: vec![statement.params],
        });
    }

    async fn flush_batches(&mut self) -> Result<()> {
        self.flush().await
    }
}

/// Opens transactions on the provider's pool
#[derive(Clone)]
pub struct SqlxTransactionManager {
    provider: Arc<SqlxConnectionProvider>,
}

impl SqlxTransactionManager {
    pub fn new(provider: Arc<SqlxConnectionProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &SqlxConnectionProvider {
        &self.provider
    }

    /// Begin a transaction with direct access to the connection
    pub async fn begin(&self) -> Result<SqlxTransaction> {
        let pool = self.provider.pool().await?;
        let tx = pool.begin().await.map_err(map_sqlx_error)?;
        Ok(SqlxTransaction::new(tx, self.provider.dialect()))
    }
}

#[async_trait]
impl TransactionManager for SqlxTransactionManager {
    async fn begin_transaction(&self) -> Result<Box<dyn TransactionContext>> {
        Ok(Box::new(self.begin().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sqlite_manager;
    use txoutbox_core::error::OutboxError;

    const CREATE_ITEMS: &str =
        "CREATE TABLE items (id TEXT PRIMARY KEY NOT NULL, qty INTEGER NOT NULL, done INTEGER NOT NULL)";

    fn insert(id: &str, qty: i32) -> Statement {
        Statement::new("INSERT INTO items (id, qty, done) VALUES (?, ?, ?)")
            .bind(id)
            .bind(qty)
            .bind(false)
    }

    async fn count(manager: &SqlxTransactionManager) -> i64 {
        let mut tx = manager.begin().await.unwrap();
        let rows = tx
            .fetch_all(Statement::new("SELECT COUNT(*) AS total FROM items"))
            .await
            .unwrap();
        let total = rows[0].get_i64("total").unwrap();
        tx.rollback().await.unwrap();
        total
    }

    fn pending(sql: &str, rows: usize) -> PendingBatch {
        PendingBatch {
            sql: sql.to_string(),
            rows: (0..rows)
                .map(|i| {
                    vec![
                        SqlValue::Text(format!("id-{}", i)),
                        SqlValue::Int(i as i32),
                        SqlValue::Bool(false),
                    ]
                })
                .collect(),
        }
    }

    async fn items_manager() -> SqlxTransactionManager {
        let manager = sqlite_manager().await;
        let mut tx = manager.begin().await.unwrap();
        tx.execute(Statement::new(CREATE_ITEMS)).await.unwrap();
        tx.commit().await.unwrap();
        manager
    }

    #[test]
    fn test_inserts_folded_into_one_statement() {
        let statements = batch_statements(
            &Dialect::SQLITE,
            pending("INSERT INTO items (id, qty, done) VALUES (?, ?, ?)", 5),
        );

        assert_eq!(statements.len(), 1);
        let (sql, params) = &statements[0];
        assert_eq!(
            sql,
            "INSERT INTO items (id, qty, done) VALUES (?, ?, ?), (?, ?, ?), (?, ?, ?), (?, ?, ?), (?, ?, ?)"
        );
        assert_eq!(params.len(), 15);
        assert_eq!(params[3], SqlValue::Text("id-1".into()));
    }

    #[test]
    fn test_folded_insert_numbers_dollar_placeholders() {
        let statements = batch_statements(
            &Dialect::POSTGRESQL_9,
            pending("INSERT INTO items (id, qty, done) VALUES (?, ?, ?)", 2),
        );

        assert_eq!(
            statements[0].0,
            "INSERT INTO items (id, qty, done) VALUES ($1, $2, $3), ($4, $5, $6)"
        );
    }

    #[test]
    fn test_folded_insert_respects_bind_limit() {
        // 999 / 3 = 333 rows per statement
        let statements = batch_statements(
            &Dialect::SQLITE,
            pending("INSERT INTO items (id, qty, done) VALUES (?, ?, ?)", 400),
        );

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].1.len(), 333 * 3);
        assert_eq!(statements[1].1.len(), 67 * 3);
        assert!(statements
            .iter()
            .all(|(_, params)| params.len() <= Dialect::SQLITE.max_bind_params()));
    }

    #[test]
    fn test_other_statements_sent_per_row() {
        let statements = batch_statements(
            &Dialect::POSTGRESQL_9,
            pending("UPDATE items SET qty = ?, done = ? WHERE id = ?", 3),
        );

        assert_eq!(statements.len(), 3);
        assert!(statements
            .iter()
            .all(|(sql, params)| sql == "UPDATE items SET qty = $1, done = $2 WHERE id = $3"
                && params.len() == 3));
    }

    #[tokio::test]
    async fn test_large_batch_flushed_across_statements() {
        let manager = items_manager().await;

        let mut tx = manager.begin().await.unwrap();
        for i in 0..1000 {
            tx.add_batch(insert(&format!("item-{}", i), i));
        }
        tx.commit().await.unwrap();

        assert_eq!(count(&manager).await, 1000);
    }

    #[tokio::test]
    async fn test_batches_flushed_at_commit() {
        let manager = items_manager().await;

        let mut tx = manager.begin().await.unwrap();
        tx.add_batch(insert("a", 1));
        tx.add_batch(insert("b", 2));
        tx.commit().await.unwrap();

        assert_eq!(count(&manager).await, 2);
    }

    #[tokio::test]
    async fn test_rollback_discards_batches() {
        let manager = items_manager().await;

        let mut tx = manager.begin().await.unwrap();
        tx.add_batch(insert("a", 1));
        tx.rollback().await.unwrap();

        assert_eq!(count(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_batches_flushed_before_immediate_statement() {
        let manager = items_manager().await;

        let mut tx = manager.begin().await.unwrap();
        tx.add_batch(insert("a", 7));
        let rows = tx
            .fetch_all(Statement::new("SELECT id, qty, done FROM items"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_text("id").unwrap(), "a");
        assert_eq!(rows[0].get_i64("qty").unwrap(), 7);
        assert!(!rows[0].get_bool("done").unwrap());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_key_surfaces_at_commit() {
        let manager = items_manager().await;

        let mut tx = manager.begin().await.unwrap();
        tx.add_batch(insert("a", 1));
        tx.add_batch(insert("a", 2));

        match tx.commit().await {
            Err(OutboxError::Database(err)) => assert!(err.is_unique_violation(), "{}", err),
            other => panic!("expected unique violation, got {:?}", other),
        }
        assert_eq!(count(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_connection_shares_the_transaction() {
        let manager = items_manager().await;

        let mut tx = manager.begin().await.unwrap();
        sqlx::query("INSERT INTO items (id, qty, done) VALUES ('direct', 3, 1)")
            .execute(tx.connection())
            .await
            .unwrap();
        let affected = tx
            .execute(Statement::new("UPDATE items SET qty = qty + 1 WHERE id = ?").bind("direct"))
            .await
            .unwrap();
        assert_eq!(affected, 1);
        tx.rollback().await.unwrap();

        assert_eq!(count(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_boxed_transaction_through_port() {
        let manager = items_manager().await;

        let mut tx = manager.begin_transaction().await.unwrap();
        tx.add_batch(insert("a", 1));
        tx.flush_batches().await.unwrap();
        let affected = tx
            .execute(Statement::new("DELETE FROM items WHERE id = ?").bind("a"))
            .await
            .unwrap();
        assert_eq!(affected, 1);
        tx.commit().await.unwrap();

        assert_eq!(count(&manager).await, 0);
    }
}

// Transaction port - the contract the persistor needs from a live transaction

use crate::error::Result;
use async_trait::async_trait;

/// A bindable statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i32),
    BigInt(i64),
    Bool(bool),
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

/// SQL text plus positional parameters
///
/// Immediate statements arrive rendered for the backend; batched ones keep `?`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Column access on a fetched row
pub trait Row: Send {
    fn get_text(&self, column: &str) -> Result<String>;
    fn get_i64(&self, column: &str) -> Result<i64>;
    fn get_bool(&self, column: &str) -> Result<bool>;
}

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction (pending batches are flushed first)
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction (pending batches are discarded)
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Statement execution within a caller-owned transaction
#[async_trait]
pub trait TransactionContext: Transaction {
    /// Run a statement now and return the number of affected rows
    async fn execute(&mut self, statement: Statement) -> Result<u64>;

    /// Run a query now and return every row
    async fn fetch_all(&mut self, statement: Statement) -> Result<Vec<Box<dyn Row>>>;

    /// Queue a parameter set for batched execution
    ///
    /// Nothing reaches the database until the batch is flushed: explicitly,
    /// before the next immediate statement, or at commit. Batched SQL keeps
    /// `?` placeholders; the transaction renders it for its backend when
    /// flushing, and consecutive `INSERT ... VALUES (...)` parameter sets are
    /// sent as multi-row inserts.
    fn add_batch(&mut self, statement: Statement);

    /// Send all queued parameter sets, in order
    async fn flush_batches(&mut self) -> Result<()>;
}

/// Source of new transactions
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn TransactionContext>>;
}

/// Mock implementations for testing
pub mod mocks {
    use super::*;
    use crate::error::{DatabaseError, OutboxError};
    use std::collections::{HashMap, VecDeque};

    /// Scripted outcome for the next immediate statement
    #[derive(Debug, Clone)]
    pub enum MockResponse {
        Affected(u64),
        Rows(Vec<MockRow>),
        Fail(DatabaseError),
    }

    /// In-memory row keyed by column name
    #[derive(Debug, Clone, Default)]
    pub struct MockRow {
        columns: HashMap<String, SqlValue>,
    }

    impl MockRow {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
            self.columns.insert(column.to_string(), value.into());
            self
        }

        fn value(&self, column: &str) -> Result<&SqlValue> {
            self.columns.get(column).ok_or_else(|| {
                OutboxError::Database(DatabaseError::new(
                    None,
                    format!("Column not found: {}", column),
                ))
            })
        }

        fn mismatch(column: &str, expected: &str) -> OutboxError {
            OutboxError::Database(DatabaseError::new(
                None,
                format!("Column {} is not {}", column, expected),
            ))
        }
    }

    impl Row for MockRow {
        fn get_text(&self, column: &str) -> Result<String> {
            match self.value(column)? {
                SqlValue::Text(s) => Ok(s.clone()),
                _ => Err(Self::mismatch(column, "text")),
            }
        }

        fn get_i64(&self, column: &str) -> Result<i64> {
            match self.value(column)? {
                SqlValue::Int(i) => Ok(i64::from(*i)),
                SqlValue::BigInt(i) => Ok(*i),
                _ => Err(Self::mismatch(column, "an integer")),
            }
        }

        fn get_bool(&self, column: &str) -> Result<bool> {
            match self.value(column)? {
                SqlValue::Bool(b) => Ok(*b),
                _ => Err(Self::mismatch(column, "a boolean")),
            }
        }
    }

    /// Records every statement and answers from a script.
    ///
    /// When the script runs dry, statements affect one row and queries return
    /// no rows.
    #[derive(Debug, Default)]
    pub struct MockTransaction {
        responses: VecDeque<MockResponse>,
        pub executed: Vec<Statement>,
        pub batched: Vec<Statement>,
        pub flushed: Vec<Statement>,
    }

    impl MockTransaction {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, response: MockResponse) -> Self {
            self.responses.push_back(response);
            self
        }

        fn next_response(&mut self) -> Option<MockResponse> {
            self.responses.pop_front()
        }
    }

    #[async_trait]
    impl Transaction for MockTransaction {
        async fn commit(mut self: Box<Self>) -> Result<()> {
            self.flush_batches().await
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TransactionContext for MockTransaction {
        async fn execute(&mut self, statement: Statement) -> Result<u64> {
            self.executed.push(statement);
            match self.next_response() {
                None => Ok(1),
                Some(MockResponse::Affected(n)) => Ok(n),
                Some(MockResponse::Rows(rows)) => Ok(rows.len() as u64),
                Some(MockResponse::Fail(err)) => Err(OutboxError::Database(err)),
            }
        }

        async fn fetch_all(&mut self, statement: Statement) -> Result<Vec<Box<dyn Row>>> {
            self.executed.push(statement);
            match self.next_response() {
                None | Some(MockResponse::Affected(_)) => Ok(Vec::new()),
                Some(MockResponse::Rows(rows)) => Ok(rows
                    .into_iter()
                    .map(|r| Box::new(r) as Box<dyn Row>)
                    .collect()),
                Some(MockResponse::Fail(err)) => Err(OutboxError::Database(err)),
            }
        }

        fn add_batch(&mut self, statement: Statement) {
            self.batched.push(statement);
        }

        async fn flush_batches(&mut self) -> Result<()> {
            self.flushed.append(&mut self.batched);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;

    #[test]
    fn test_statement_bind_order() {
        let stmt = Statement::new("SELECT ?, ?").bind("a").bind(7i32).bind(true);
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Text("a".to_string()),
                SqlValue::Int(7),
                SqlValue::Bool(true)
            ]
        );
    }

    #[tokio::test]
    async fn test_mock_commit_flushes_batches() {
        let mut tx = Box::new(MockTransaction::new());
        tx.add_batch(Statement::new("INSERT 1"));
        tx.add_batch(Statement::new("INSERT 2"));
        assert_eq!(tx.batched.len(), 2);

        tx.flush_batches().await.unwrap();
        assert!(tx.batched.is_empty());
        assert_eq!(tx.flushed.len(), 2);
        tx.commit().await.unwrap();
    }

    #[test]
    fn test_mock_row_widens_int() {
        let row = MockRow::new().with("version", 4i32);
        assert_eq!(row.get_i64("version").unwrap(), 4);
        assert!(row.get_text("version").is_err());
        assert!(row.get_bool("missing").is_err());
    }
}

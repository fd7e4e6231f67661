// Migration Manager Port

use crate::error::Result;
use crate::port::TransactionManager;
use async_trait::async_trait;

/// Brings the outbox schema to the version this crate expects.
///
/// Must be idempotent: it runs on every process start. A failure is fatal for
/// the dependent system.
#[async_trait]
pub trait MigrationManager: Send + Sync {
    async fn migrate(&self, transactions: &dyn TransactionManager) -> Result<()>;
}

// Persistor Port (Interface)

use crate::domain::OutboxEntry;
use crate::error::Result;
use crate::port::{TransactionContext, TransactionManager};
use async_trait::async_trait;

/// Durable store and dequeue protocol for outbox entries.
///
/// Every operation runs on a transaction supplied by the caller; none of them
/// begins, commits or rolls back.
#[async_trait]
pub trait Persistor: Send + Sync {
    /// Bring the backing schema up to date (idempotent)
    async fn migrate(&self, transactions: &dyn TransactionManager) -> Result<()>;

    /// Queue the insert of a new entry on the caller's batch
    async fn save(&self, tx: &mut dyn TransactionContext, entry: &OutboxEntry) -> Result<()>;

    /// Remove an entry, proving the current version
    async fn delete(&self, tx: &mut dyn TransactionContext, entry: &OutboxEntry) -> Result<()>;

    /// Write attempts, next attempt time and blacklist flag if `entry.version`
    /// is still current; bumps `entry.version` on success
    async fn update(&self, tx: &mut dyn TransactionContext, entry: &mut OutboxEntry)
        -> Result<()>;

    /// Try to take the row lock on `(id, version)` without waiting.
    ///
    /// `Ok(false)` means "skip this entry this round", not an error.
    async fn lock(&self, tx: &mut dyn TransactionContext, entry: &OutboxEntry) -> Result<bool>;

    /// Up to `batch_size` due, non-blacklisted entries (unlocked read)
    async fn select_batch(
        &self,
        tx: &mut dyn TransactionContext,
        batch_size: usize,
    ) -> Result<Vec<OutboxEntry>>;
}

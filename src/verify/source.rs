//! Anything verification can read entries from.

use async_trait::async_trait;

use crate::error::Result;
use crate::ledger::{ChainedLedger, LedgerEntry};
use crate::store::LedgerStore;

/// Ordered, positional read access to a chain of entries
#[async_trait]
pub trait EntrySource: Send + Sync {
    async fn entry_count(&self) -> Result<u64>;

    /// Up to `limit` entries starting at position `cursor`.
    async fn read_entries(&self, cursor: u64, limit: usize) -> Result<Vec<LedgerEntry>>;
}

#[async_trait]
impl EntrySource for ChainedLedger {
    async fn entry_count(&self) -> Result<u64> {
        Ok(self.len().await)
    }

    async fn read_entries(&self, cursor: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
        Ok(self.read_range(cursor, limit).await)
    }
}

#[async_trait]
impl<'a> EntrySource for dyn LedgerStore + 'a {
    async fn entry_count(&self) -> Result<u64> {
        LedgerStore::entry_count(self).await
    }

    async fn read_entries(&self, cursor: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.load_entries(cursor, limit).await
    }
}

#[async_trait]
impl EntrySource for Vec<LedgerEntry> {
    async fn entry_count(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }

    async fn read_entries(&self, cursor: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(self.len());
        let end = start.saturating_add(limit).min(self.len());
        Ok(self[start..end].to_vec())
    }
}

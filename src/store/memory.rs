//! In-memory ledger store
//!
//! Useful for tests and embedding. Supports fault injection (outage, slow
//! writes) and raw row overwrites that bypass every check, to simulate
//! tampering at the storage layer.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{LedgerError, Result};
use crate::ledger::LedgerEntry;
use crate::store::{check_append, LedgerStore};

#[derive(Default)]
struct Faults {
    unavailable: bool,
    write_delay: Option<Duration>,
}

/// Volatile store holding rows in a vector
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<LedgerEntry>>,
    faults: RwLock<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StorageUnavailable` until cleared.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.faults.write().await.unavailable = unavailable;
    }

    /// Delay each write by `delay` before it is applied.
    pub async fn set_write_delay(&self, delay: Option<Duration>) {
        self.faults.write().await.write_delay = delay;
    }

    /// Replace the stored row at `position` with `f(row)`, skipping all
    /// invariant checks. Returns `false` if there is no such row.
    pub async fn overwrite_entry<F>(&self, position: usize, f: F) -> bool
    where
        F: FnOnce(&mut LedgerEntry),
    {
        let mut rows = self.rows.write().await;
        match rows.get_mut(position) {
            Some(row) => {
                f(row);
                warn!("Stored ledger row {} overwritten in place", position);
                true
            }
            None => false,
        }
    }

    /// Push a row without any checks.
    pub async fn insert_raw(&self, entry: LedgerEntry) {
        self.rows.write().await.push(entry);
    }

    pub async fn rows(&self) -> Vec<LedgerEntry> {
        self.rows.read().await.clone()
    }

    async fn ensure_available(&self) -> Result<()> {
        if self.faults.read().await.unavailable {
            return Err(LedgerError::StorageUnavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn persist_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.ensure_available().await?;

        let delay = self.faults.read().await.write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut rows = self.rows.write().await;
        check_append(rows.last(), entry)?;
        rows.push(entry.clone());
        Ok(())
    }

    async fn load_entries(&self, cursor: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.ensure_available().await?;
        let rows = self.rows.read().await;
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(rows.len());
        let end = start.saturating_add(limit).min(rows.len());
        Ok(rows[start..end].to_vec())
    }

    async fn load_tail(&self) -> Result<Option<LedgerEntry>> {
        self.ensure_available().await?;
        Ok(self.rows.read().await.last().cloned())
    }

    async fn entry_count(&self) -> Result<u64> {
        self.ensure_available().await?;
        Ok(self.rows.read().await.len() as u64)
    }
}

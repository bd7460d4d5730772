//! Ledger Persistence
//!
//! Storage boundary for the chained ledger. Adapters re-check sequence
//! continuity and hash linkage before writing, independent of the ledger.

pub mod file;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{LedgerError, Result};
use crate::ledger::{LedgerEntry, GENESIS_HASH};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Durable home for ledger entries
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one entry. Must reject a sequence other than `tail + 1` and a
    /// `previous_hash` that does not match the stored tail.
    async fn persist_entry(&self, entry: &LedgerEntry) -> Result<()>;

    /// Up to `limit` stored rows starting at position `cursor`, in append order.
    async fn load_entries(&self, cursor: u64, limit: usize) -> Result<Vec<LedgerEntry>>;

    /// Last stored entry, if any.
    async fn load_tail(&self) -> Result<Option<LedgerEntry>>;

    /// Number of stored rows.
    async fn entry_count(&self) -> Result<u64>;
}

/// Run a storage call with a deadline, mapping expiry to `StorageTimeout`.
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| LedgerError::StorageTimeout(timeout))?
}

/// Storage-layer linkage check shared by the bundled adapters.
pub(crate) fn check_append(tail: Option<&LedgerEntry>, entry: &LedgerEntry) -> Result<()> {
    let expected = tail.map_or(0, |t| t.sequence + 1);
    if entry.sequence != expected {
        return Err(LedgerError::SequenceConflict {
            expected,
            found: entry.sequence,
        });
    }

    let expected_previous = tail.map_or(GENESIS_HASH, |t| t.entry_hash);
    if entry.previous_hash != expected_previous {
        return Err(LedgerError::StorageRejected(format!(
            "previous_hash of entry {} does not match stored entry {}",
            entry.sequence,
            expected.saturating_sub(1)
        )));
    }

    Ok(())
}

/// Build the configured storage adapter. `None` for the memory backend,
/// which keeps the ledger purely in process.
pub async fn open_store(config: &StorageConfig) -> Result<Option<Arc<dyn LedgerStore>>> {
    let store: Arc<dyn LedgerStore> = match config.backend {
        StorageBackend::Memory => return Ok(None),
        StorageBackend::File => {
            let path = config.path.as_ref().ok_or_else(|| {
                LedgerError::ConfigError("file backend requires storage.path".to_string())
            })?;
            Arc::new(FileStore::open(path).await?)
        }
        StorageBackend::Sqlite => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                LedgerError::ConfigError("sqlite backend requires storage.database_url".to_string())
            })?;
            Arc::new(SqliteStore::connect(url).await?)
        }
    };

    info!("Opened {:?} ledger store", config.backend);
    Ok(Some(store))
}

//! Chained Ledger
//!
//! Append-only ledger whose entries link to their predecessor by hash and
//! record the Merkle root over every entry hash at append time.
//!
//! Appends are serialized per instance. The new entry is persisted (when a
//! store is configured) before it becomes visible, and it becomes visible
//! together with its root under one write lock. A failed write leaves the
//! in-memory view untouched and puts the ledger in a fail-closed state
//! until [`ChainedLedger::resync`] re-reads storage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::ledger::checkpoint::Checkpoint;
use crate::ledger::digest::{Digest, EMPTY_ROOT, GENESIS_HASH};
use crate::ledger::entry::{truncate_to_micros, LedgerEntry};
use crate::ledger::merkle::MerkleFrontier;
use crate::store::{bounded, LedgerStore};
use crate::verify::service::Cursor;
use crate::verify::ReasonCode;

/// One page of a forward scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPage {
    pub entries: Vec<LedgerEntry>,
    /// Cursor for the next page, `None` once the scan reached the tail.
    pub next_cursor: Option<u64>,
}

struct ChainState {
    entries: Vec<LedgerEntry>,
    frontier: MerkleFrontier,
    root: Digest,
    failure: Option<String>,
}

impl ChainState {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            frontier: MerkleFrontier::new(),
            root: EMPTY_ROOT,
            failure: None,
        }
    }

    fn next_entry(&self, payload_hash: Digest) -> LedgerEntry {
        let tail = self.entries.last();
        let sequence = self.entries.len() as u64;
        let previous_hash = tail.map_or(GENESIS_HASH, |t| t.entry_hash);

        // Timestamps never go backward, even if the wall clock does.
        let now = truncate_to_micros(Utc::now());
        let timestamp: DateTime<Utc> = tail.map_or(now, |t| now.max(t.timestamp));

        let entry_hash = LedgerEntry::hash_fields(sequence, &payload_hash, &previous_hash, &timestamp);
        let merkle_root_snapshot = self.frontier.root_with(entry_hash);

        LedgerEntry {
            sequence,
            payload_hash,
            previous_hash,
            entry_hash,
            merkle_root_snapshot,
            timestamp,
        }
    }

    fn commit(&mut self, entry: LedgerEntry) {
        self.frontier.push(entry.entry_hash);
        self.root = entry.merkle_root_snapshot;
        self.entries.push(entry);
    }

    fn checkpoint(&self) -> Option<Checkpoint> {
        self.entries.last().map(|tail| Checkpoint {
            sequence: tail.sequence,
            entry_hash: tail.entry_hash,
            merkle_root: self.root,
            timestamp: tail.timestamp,
            frontier: self.frontier.clone(),
        })
    }
}

/// Append-only, hash-chained ledger
pub struct ChainedLedger {
    state: RwLock<ChainState>,
    writer: Mutex<()>,
    store: Option<Arc<dyn LedgerStore>>,
    storage_timeout: Duration,
    max_page_size: usize,
}

impl ChainedLedger {
    /// Create an empty in-memory ledger with default settings
    pub fn new() -> Self {
        Self::in_memory(&LedgerConfig::default())
    }

    /// Create an empty ledger with no persistence collaborator
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self {
            state: RwLock::new(ChainState::empty()),
            writer: Mutex::new(()),
            store: None,
            storage_timeout: config.storage.timeout(),
            max_page_size: config.ledger.max_page_size.max(1),
        }
    }

    /// Open a ledger backed by `store`, resuming from whatever it holds
    pub async fn open(store: Arc<dyn LedgerStore>, config: &LedgerConfig) -> Result<Self> {
        let storage_timeout = config.storage.timeout();
        let max_page_size = config.ledger.max_page_size.max(1);
        let state = Self::load_state(store.as_ref(), storage_timeout, max_page_size).await?;

        info!(
            "Opened ledger with {} entries (root {})",
            state.entries.len(),
            state.root
        );

        Ok(Self {
            state: RwLock::new(state),
            writer: Mutex::new(()),
            store: Some(store),
            storage_timeout,
            max_page_size,
        })
    }

    /// Rebuild the in-memory chain from storage, re-verifying every entry
    /// (sequence, link, timestamp order, entry hash, root snapshot) and the
    /// stored tail.
    async fn load_state(
        store: &dyn LedgerStore,
        timeout: Duration,
        page_size: usize,
    ) -> Result<ChainState> {
        let tail = bounded(timeout, store.load_tail()).await?;
        let mut state = ChainState::empty();
        let mut cursor = Cursor::genesis();

        loop {
            let page = bounded(timeout, store.load_entries(cursor.next_sequence(), page_size)).await?;
            let page_len = page.len();

            for entry in page {
                let sequence = cursor.next_sequence();
                if let Some((reason, detail)) = cursor.check(&entry, true).into_iter().next() {
                    error!(
                        "Stored ledger failed verification at #{}: {} ({})",
                        sequence, reason, detail
                    );
                    return Err(LedgerError::ChainIntegrity {
                        sequence,
                        reason,
                        detail,
                    });
                }
                state.entries.push(entry);
            }

            if page_len < page_size {
                break;
            }
        }

        match (tail.as_ref(), state.entries.last()) {
            (None, None) => {}
            (Some(stored), Some(scanned)) if stored == scanned => {}
            (stored, scanned) => {
                return Err(LedgerError::ChainIntegrity {
                    sequence: scanned.map_or(0, |e| e.sequence),
                    reason: ReasonCode::SequenceGap,
                    detail: format!(
                        "stored tail {:?} disagrees with scanned tail {:?}",
                        stored.map(|e| e.sequence),
                        scanned.map(|e| e.sequence)
                    ),
                });
            }
        }

        state.frontier = cursor.into_frontier();
        state.root = state.frontier.root();
        Ok(state)
    }

    /// Append a new entry committing to `payload_hash`
    pub async fn append(&self, payload_hash: Digest) -> Result<LedgerEntry> {
        let _writer = self.writer.lock().await;

        let entry = {
            let state = self.state.read().await;
            if let Some(reason) = &state.failure {
                return Err(LedgerError::FailedClosed(reason.clone()));
            }
            state.next_entry(payload_hash)
        };

        if let Some(store) = &self.store {
            if let Err(e) = bounded(self.storage_timeout, store.persist_entry(&entry)).await {
                error!(
                    "Failed to persist ledger entry {}: {}; refusing further appends",
                    entry.sequence, e
                );
                self.state.write().await.failure = Some(e.to_string());
                return Err(e);
            }
        }

        self.state.write().await.commit(entry.clone());
        debug!("Appended ledger entry: {}", entry.summary());
        Ok(entry)
    }

    /// Hash a raw payload with SHA-256 and append it
    pub async fn append_payload(&self, payload: &[u8]) -> Result<LedgerEntry> {
        self.append(Digest::of(payload)).await
    }

    /// Hash the JSON encoding of `record` and append it
    pub async fn append_record<T: Serialize>(&self, record: &T) -> Result<LedgerEntry> {
        let bytes = serde_json::to_vec(record)?;
        self.append(Digest::of(&bytes)).await
    }

    /// Re-read and re-verify state from storage, clearing a fail-closed state.
    /// Storage that fails verification leaves the ledger fail-closed.
    pub async fn resync(&self) -> Result<()> {
        let _writer = self.writer.lock().await;

        let Some(store) = &self.store else {
            self.state.write().await.failure = None;
            return Ok(());
        };

        let rebuilt =
            match Self::load_state(store.as_ref(), self.storage_timeout, self.max_page_size).await {
                Ok(rebuilt) => rebuilt,
                Err(e) => {
                    self.state.write().await.failure = Some(e.to_string());
                    return Err(e);
                }
            };
        let mut state = self.state.write().await;
        info!(
            "Resynced ledger from storage: {} entries (was {})",
            rebuilt.entries.len(),
            state.entries.len()
        );
        *state = rebuilt;
        Ok(())
    }

    /// Current Merkle root
    pub async fn get_root(&self) -> Digest {
        self.state.read().await.root
    }

    pub async fn get_entry(&self, sequence: u64) -> Result<LedgerEntry> {
        let state = self.state.read().await;
        usize::try_from(sequence)
            .ok()
            .and_then(|i| state.entries.get(i))
            .cloned()
            .ok_or(LedgerError::NotFound(sequence))
    }

    /// Forward scan starting at `cursor`. `limit` is clamped to
    /// `1..=max_page_size`.
    pub async fn list_entries(&self, cursor: u64, limit: usize) -> EntryPage {
        let limit = limit.clamp(1, self.max_page_size);
        let state = self.state.read().await;
        let len = state.entries.len() as u64;

        if cursor >= len {
            return EntryPage {
                entries: Vec::new(),
                next_cursor: None,
            };
        }

        let start = cursor as usize;
        let end = (start + limit).min(state.entries.len());
        let entries = state.entries[start..end].to_vec();
        let next_cursor = (end < state.entries.len()).then_some(end as u64);

        EntryPage {
            entries,
            next_cursor,
        }
    }

    pub async fn len(&self) -> u64 {
        self.state.read().await.entries.len() as u64
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn tail(&self) -> Option<LedgerEntry> {
        self.state.read().await.entries.last().cloned()
    }

    /// Checkpoint of the current tail
    pub async fn checkpoint(&self) -> Option<Checkpoint> {
        self.state.read().await.checkpoint()
    }

    pub async fn is_failed_closed(&self) -> bool {
        self.state.read().await.failure.is_some()
    }

    /// Copy of every entry hash in sequence order
    pub async fn leaf_hashes(&self) -> Vec<Digest> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|e| e.entry_hash)
            .collect()
    }

    /// Copy of up to `limit` entries starting at position `cursor`, taken
    /// under one read lock.
    pub(crate) async fn read_range(&self, cursor: u64, limit: usize) -> Vec<LedgerEntry> {
        let state = self.state.read().await;
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(state.entries.len());
        let end = start.saturating_add(limit).min(state.entries.len());
        state.entries[start..end].to_vec()
    }
}

impl Default for ChainedLedger {
    fn default() -> Self {
        Self::new()
    }
}

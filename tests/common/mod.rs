#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use vault_ledger::config::LedgerConfig;
use vault_ledger::ledger::{ChainedLedger, LedgerEntry};
use vault_ledger::store::{LedgerStore, MemoryStore};

/// Configuration with a short storage timeout for fault tests
pub fn test_config(timeout_ms: u64) -> LedgerConfig {
    let mut config = LedgerConfig::default();
    config.storage.timeout_ms = timeout_ms;
    config
}

/// In-memory ledger holding `count` payloads `event-0`, `event-1`, ...
pub async fn ledger_with(count: usize) -> ChainedLedger {
    let ledger = ChainedLedger::new();
    for i in 0..count {
        ledger
            .append_payload(format!("event-{}", i).as_bytes())
            .await
            .expect("append to in-memory ledger");
    }
    ledger
}

/// Ledger backed by a fault-injectable memory store
pub async fn ledger_on_memory_store(count: usize) -> (ChainedLedger, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = ChainedLedger::open(store.clone(), &test_config(200))
        .await
        .expect("open ledger on memory store");
    for i in 0..count {
        ledger
            .append_payload(format!("event-{}", i).as_bytes())
            .await
            .expect("append to store-backed ledger");
    }
    (ledger, store)
}

/// Every entry of `ledger` in sequence order
pub async fn all_entries(ledger: &ChainedLedger) -> Vec<LedgerEntry> {
    let mut entries = Vec::new();
    let mut cursor = Some(0);
    while let Some(next) = cursor {
        let page = ledger.list_entries(next, 100).await;
        entries.extend(page.entries);
        cursor = page.next_cursor;
    }
    entries
}

pub fn as_store(store: &Arc<MemoryStore>) -> &dyn LedgerStore {
    store.as_ref()
}

pub const SLOW_WRITE: Duration = Duration::from_millis(500);

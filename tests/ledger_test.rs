//! Integration tests for the chained ledger

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use vault_ledger::ledger::{merkle_root, ChainedLedger, Digest, EMPTY_ROOT, GENESIS_HASH};
use vault_ledger::verify::{ReasonCode, VerificationService};
use vault_ledger::LedgerError;

use common::{all_entries, ledger_on_memory_store, ledger_with, SLOW_WRITE};

#[tokio::test]
async fn test_empty_ledger() {
    let ledger = ChainedLedger::new();
    assert_eq!(ledger.get_root().await, EMPTY_ROOT);
    assert!(ledger.is_empty().await);
    assert!(ledger.checkpoint().await.is_none());

    let page = ledger.list_entries(0, 10).await;
    assert!(page.entries.is_empty());
    assert_eq!(page.next_cursor, None);
}

#[tokio::test]
async fn test_appends_verify() {
    let ledger = ledger_with(25).await;
    let result = VerificationService::default()
        .verify_chain(&ledger)
        .await
        .unwrap();

    assert!(result.valid, "{}", result.summary());
    assert_eq!(result.entries_checked, 25);
    assert_eq!(result.checkpoint.unwrap().merkle_root, ledger.get_root().await);
}

#[tokio::test]
async fn test_entries_link_and_snapshot() {
    let ledger = ledger_with(5).await;
    let entries = all_entries(&ledger).await;

    assert_eq!(entries[0].previous_hash, GENESIS_HASH);
    for pair in entries.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].entry_hash);
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64);
        assert!(entry.verify_hash());
        let leaves: Vec<Digest> = entries[..=i].iter().map(|e| e.entry_hash).collect();
        assert_eq!(entry.merkle_root_snapshot, merkle_root(&leaves));
    }
}

#[tokio::test]
async fn test_list_entries_from_zero_returns_everything() {
    let ledger = ledger_with(3).await;
    let page = ledger.list_entries(0, 10).await;

    assert_eq!(page.entries.len(), 3);
    assert_eq!(
        page.entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(page.next_cursor, None);
}

#[tokio::test]
async fn test_root_depends_on_order() {
    let a = Digest::of(b"A");
    let b = Digest::of(b"B");

    let forward = ChainedLedger::new();
    forward.append(a).await.unwrap();
    forward.append(b).await.unwrap();

    let reversed = ChainedLedger::new();
    reversed.append(b).await.unwrap();
    reversed.append(a).await.unwrap();

    assert_ne!(forward.get_root().await, reversed.get_root().await);
    assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
}

#[tokio::test]
async fn test_get_entry_out_of_range() {
    let ledger = ledger_with(2).await;
    assert_eq!(ledger.get_entry(1).await.unwrap().sequence, 1);
    assert!(matches!(
        ledger.get_entry(2).await,
        Err(LedgerError::NotFound(2))
    ));
}

#[tokio::test]
async fn test_append_record_commits_to_json() {
    let ledger = ChainedLedger::new();
    let record = json!({"vault": "alpha", "action": "withdraw", "amount": 5});
    let entry = ledger.append_record(&record).await.unwrap();

    assert_eq!(
        entry.payload_hash,
        Digest::of(&serde_json::to_vec(&record).unwrap())
    );
}

#[tokio::test]
async fn test_concurrent_appends_do_not_fork() {
    let ledger = Arc::new(ChainedLedger::new());

    let mut handles = Vec::new();
    for task in 0..8 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                ledger
                    .append_payload(format!("task-{}-{}", task, i).as_bytes())
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let entries = all_entries(&ledger).await;
    assert_eq!(entries.len(), 200);
    let previous: HashSet<Digest> = entries.iter().map(|e| e.previous_hash).collect();
    assert_eq!(previous.len(), 200, "two entries share a predecessor");

    let result = VerificationService::default()
        .verify_chain(ledger.as_ref())
        .await
        .unwrap();
    assert!(result.valid);
    assert_eq!(result.entries_checked, 200);
}

#[tokio::test]
async fn test_storage_outage_fails_closed() {
    let (ledger, store) = ledger_on_memory_store(3).await;
    let root = ledger.get_root().await;

    store.set_unavailable(true).await;
    assert!(matches!(
        ledger.append_payload(b"lost").await,
        Err(LedgerError::StorageUnavailable(_))
    ));
    assert!(ledger.is_failed_closed().await);
    assert_eq!(ledger.len().await, 3);
    assert_eq!(ledger.get_root().await, root);

    store.set_unavailable(false).await;
    assert!(matches!(
        ledger.append_payload(b"still refused").await,
        Err(LedgerError::FailedClosed(_))
    ));

    ledger.resync().await.unwrap();
    assert!(!ledger.is_failed_closed().await);
    let entry = ledger.append_payload(b"after recovery").await.unwrap();
    assert_eq!(entry.sequence, 3);
    assert_eq!(store.rows().await.len(), 4);
}

#[tokio::test]
async fn test_storage_timeout_fails_closed() {
    let (ledger, store) = ledger_on_memory_store(2).await;

    store.set_write_delay(Some(SLOW_WRITE)).await;
    assert!(matches!(
        ledger.append_payload(b"slow").await,
        Err(LedgerError::StorageTimeout(_))
    ));
    assert!(ledger.is_failed_closed().await);

    store.set_write_delay(None).await;
    ledger.resync().await.unwrap();
    assert_eq!(ledger.len().await, store.rows().await.len() as u64);

    let entry = ledger.append_payload(b"fast").await.unwrap();
    assert_eq!(entry.sequence, ledger.len().await - 1);
}

#[tokio::test]
async fn test_resync_detects_tampered_storage() {
    let (ledger, store) = ledger_on_memory_store(4).await;
    assert!(
        store
            .overwrite_entry(2, |entry| entry.previous_hash = Digest::of(b"forged"))
            .await
    );

    match ledger.resync().await {
        Err(LedgerError::ChainIntegrity {
            sequence, reason, ..
        }) => {
            assert_eq!(sequence, 2);
            assert_eq!(reason, ReasonCode::LinkBroken);
        }
        other => panic!("expected integrity error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resync_refuses_rewritten_payload() {
    let (ledger, store) = ledger_on_memory_store(4).await;
    assert!(
        store
            .overwrite_entry(1, |entry| entry.payload_hash = Digest::of(b"forged"))
            .await
    );

    match ledger.resync().await {
        Err(LedgerError::ChainIntegrity {
            sequence, reason, ..
        }) => {
            assert_eq!(sequence, 1);
            assert_eq!(reason, ReasonCode::HashMismatch);
        }
        other => panic!("expected integrity error, got {:?}", other),
    }
    assert!(ledger.is_failed_closed().await);
    assert!(matches!(
        ledger.append_payload(b"on top of forgery").await,
        Err(LedgerError::FailedClosed(_))
    ));
    assert_eq!(store.rows().await.len(), 4);

    let reopened = ChainedLedger::open(store.clone(), &common::test_config(200)).await;
    assert!(matches!(
        reopened,
        Err(LedgerError::ChainIntegrity { sequence: 1, .. })
    ));
}

#[tokio::test]
async fn test_resync_refuses_rewritten_snapshot_and_timestamp() {
    let (ledger, store) = ledger_on_memory_store(4).await;
    store
        .overwrite_entry(2, |entry| entry.merkle_root_snapshot = Digest::of(b"forged"))
        .await;
    assert!(matches!(
        ledger.resync().await,
        Err(LedgerError::ChainIntegrity {
            sequence: 2,
            reason: ReasonCode::RootMismatch,
            ..
        })
    ));

    let (ledger, store) = ledger_on_memory_store(4).await;
    let earlier = store.rows().await[1].timestamp;
    store
        .overwrite_entry(2, |entry| {
            entry.timestamp = earlier - chrono::Duration::microseconds(1)
        })
        .await;
    assert!(matches!(
        ledger.resync().await,
        Err(LedgerError::ChainIntegrity {
            sequence: 2,
            reason: ReasonCode::TimestampRegression,
            ..
        })
    ));
}

#[tokio::test]
async fn test_reopen_resumes_chain() {
    let (ledger, store) = ledger_on_memory_store(5).await;
    let root = ledger.get_root().await;
    drop(ledger);

    let reopened = ChainedLedger::open(store.clone(), &common::test_config(200))
        .await
        .unwrap();
    assert_eq!(reopened.len().await, 5);
    assert_eq!(reopened.get_root().await, root);

    let entry = reopened.append_payload(b"next").await.unwrap();
    assert_eq!(entry.sequence, 5);
}

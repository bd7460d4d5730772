//! Ledger Entry
//!
//! Immutable, hash-chained ledger records. The entry hash commits to the
//! sequence number, the caller's payload digest, the predecessor's entry
//! hash and the append timestamp using a fixed 80-byte encoding:
//!
//! ```text
//! sequence          u64 BE      8
//! payload_hash               32
//! previous_hash              32
//! timestamp (µs)    i64 BE      8
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::digest::Digest;

const ENTRY_ENCODING_SIZE: usize = 80;

/// One record of the chained ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub payload_hash: Digest,
    pub previous_hash: Digest,
    pub entry_hash: Digest,
    pub merkle_root_snapshot: Digest,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Canonical byte encoding hashed into `entry_hash`
    pub fn canonical_bytes(
        sequence: u64,
        payload_hash: &Digest,
        previous_hash: &Digest,
        timestamp: &DateTime<Utc>,
    ) -> [u8; ENTRY_ENCODING_SIZE] {
        let mut buf = [0u8; ENTRY_ENCODING_SIZE];
        buf[0..8].copy_from_slice(&sequence.to_be_bytes());
        buf[8..40].copy_from_slice(payload_hash.as_bytes());
        buf[40..72].copy_from_slice(previous_hash.as_bytes());
        buf[72..80].copy_from_slice(&timestamp.timestamp_micros().to_be_bytes());
        buf
    }

    /// Entry hash for the given fields
    pub fn hash_fields(
        sequence: u64,
        payload_hash: &Digest,
        previous_hash: &Digest,
        timestamp: &DateTime<Utc>,
    ) -> Digest {
        Digest::of(&Self::canonical_bytes(
            sequence,
            payload_hash,
            previous_hash,
            timestamp,
        ))
    }

    /// Recompute this entry's hash from its stored fields
    pub fn compute_hash(&self) -> Digest {
        Self::hash_fields(
            self.sequence,
            &self.payload_hash,
            &self.previous_hash,
            &self.timestamp,
        )
    }

    /// Verify this entry's hash
    pub fn verify_hash(&self) -> bool {
        self.entry_hash == self.compute_hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence == 0
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {} (payload {}, root {})",
            self.sequence,
            self.entry_hash,
            self.payload_hash,
            self.merkle_root_snapshot
        )
    }
}

/// Truncate a timestamp to the microsecond precision the entry encoding keeps.
pub fn truncate_to_micros(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(timestamp.timestamp_micros()).unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::digest::GENESIS_HASH;
    use chrono::TimeZone;

    fn sample_entry() -> LedgerEntry {
        let timestamp = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let payload_hash = Digest::of(b"verdict:SEAL");
        let entry_hash = LedgerEntry::hash_fields(0, &payload_hash, &GENESIS_HASH, &timestamp);
        LedgerEntry {
            sequence: 0,
            payload_hash,
            previous_hash: GENESIS_HASH,
            entry_hash,
            merkle_root_snapshot: entry_hash,
            timestamp,
        }
    }

    #[test]
    fn test_hash_calculation() {
        let entry = sample_entry();
        assert!(entry.verify_hash());
        assert_eq!(entry.compute_hash(), entry.compute_hash());
        assert!(entry.is_genesis());
    }

    #[test]
    fn test_every_field_is_committed() {
        let entry = sample_entry();

        let mut tampered = entry.clone();
        tampered.sequence = 1;
        assert!(!tampered.verify_hash());

        let mut tampered = entry.clone();
        tampered.payload_hash = Digest::of(b"verdict:VOID");
        assert!(!tampered.verify_hash());

        let mut tampered = entry.clone();
        tampered.previous_hash = Digest::of(b"elsewhere");
        assert!(!tampered.verify_hash());

        let mut tampered = entry;
        tampered.timestamp += chrono::Duration::microseconds(1);
        assert!(!tampered.verify_hash());
    }

    #[test]
    fn test_canonical_layout() {
        let entry = sample_entry();
        let bytes = LedgerEntry::canonical_bytes(
            entry.sequence,
            &entry.payload_hash,
            &entry.previous_hash,
            &entry.timestamp,
        );
        assert_eq!(&bytes[0..8], &0u64.to_be_bytes());
        assert_eq!(&bytes[8..40], entry.payload_hash.as_bytes());
        assert_eq!(&bytes[40..72], GENESIS_HASH.as_bytes());
    }

    #[test]
    fn test_json_round_trip_keeps_hash_valid() {
        let entry = sample_entry();
        let json = serde_json::to_string(&entry).unwrap();
        let back: LedgerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
        assert!(back.verify_hash());
    }

    #[test]
    fn test_truncate_to_micros() {
        let ts = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let truncated = truncate_to_micros(ts);
        assert_eq!(truncated.timestamp_micros(), 1_700_000_000_123_456);
        assert_eq!(truncated.timestamp_subsec_nanos() % 1_000, 0);
    }
}

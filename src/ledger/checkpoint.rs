//! Verified checkpoints for incremental audits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::digest::Digest;
use crate::ledger::merkle::MerkleFrontier;

/// State of a chain at one verified entry
///
/// Carries the Merkle frontier so a later audit can resume the root
/// computation without touching the entries before `sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    pub entry_hash: Digest,
    pub merkle_root: Digest,
    pub timestamp: DateTime<Utc>,
    pub frontier: MerkleFrontier,
}

impl Checkpoint {
    /// Number of entries covered by this checkpoint.
    pub fn entry_count(&self) -> u64 {
        self.sequence + 1
    }

    pub fn summary(&self) -> String {
        format!(
            "Checkpoint at #{}: head {}, root {}",
            self.sequence, self.entry_hash, self.merkle_root
        )
    }
}

//! Verification Service
//!
//! Recomputes entry hashes, hash links, timestamps and Merkle roots from the
//! stored fields alone. Nothing cached by a ledger is trusted except an
//! explicit anchor (`verify_since`) or checkpoint (`verify_from_checkpoint`).
//!
//! Each entry is checked in this order, and the first failing check is the
//! reported reason: sequence, link to predecessor, timestamp order, entry
//! hash, root snapshot. A tampered `previous_hash` is therefore reported at
//! the tampered entry's own sequence.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::VerificationConfig;
use crate::error::{LedgerError, Result};
use crate::ledger::{inclusion_proof, Checkpoint, Digest, LedgerEntry, MerkleFrontier, MerkleProof, GENESIS_HASH};
use crate::verify::result::{AuditReport, Finding, ReasonCode, VerificationResult};
use crate::verify::source::EntrySource;

/// Rolling state carried from one verified entry to the next
pub(crate) struct Cursor {
    next_sequence: u64,
    previous_hash: Digest,
    previous_timestamp: Option<DateTime<Utc>>,
    frontier: MerkleFrontier,
    entry_hashes: u64,
    merkle_baseline: u64,
    last_good: Option<Checkpoint>,
}

impl Cursor {
    pub(crate) fn genesis() -> Self {
        Self {
            next_sequence: 0,
            previous_hash: GENESIS_HASH,
            previous_timestamp: None,
            frontier: MerkleFrontier::new(),
            entry_hashes: 0,
            merkle_baseline: 0,
            last_good: None,
        }
    }

    fn resume(checkpoint: &Checkpoint) -> Self {
        Self {
            next_sequence: checkpoint.sequence + 1,
            previous_hash: checkpoint.entry_hash,
            previous_timestamp: Some(checkpoint.timestamp),
            frontier: checkpoint.frontier.clone(),
            entry_hashes: 0,
            merkle_baseline: checkpoint.frontier.hashes_computed(),
            last_good: Some(checkpoint.clone()),
        }
    }

    /// Position the next entry must occupy. Findings are reported here,
    /// never at the entry's own (possibly forged) `sequence` field.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub(crate) fn into_frontier(self) -> MerkleFrontier {
        self.frontier
    }

    fn hashes_computed(&self) -> u64 {
        self.entry_hashes + self.frontier.hashes_computed() - self.merkle_baseline
    }

    /// Every check that fails for `entry`, in reporting order.
    pub(crate) fn check(
        &mut self,
        entry: &LedgerEntry,
        stop_at_first: bool,
    ) -> Vec<(ReasonCode, String)> {
        let position = self.next_sequence;
        let mut failures = Vec::new();

        if entry.sequence != self.next_sequence {
            failures.push((
                ReasonCode::SequenceGap,
                format!("expected sequence {}, found {}", self.next_sequence, entry.sequence),
            ));
            if stop_at_first {
                return failures;
            }
        }

        if entry.previous_hash != self.previous_hash {
            failures.push((
                ReasonCode::LinkBroken,
                format!(
                    "previous_hash {} does not match predecessor hash {}",
                    entry.previous_hash, self.previous_hash
                ),
            ));
            if stop_at_first {
                return failures;
            }
        }

        if let Some(previous) = self.previous_timestamp {
            if entry.timestamp < previous {
                failures.push((
                    ReasonCode::TimestampRegression,
                    format!("timestamp {} precedes {}", entry.timestamp, previous),
                ));
                if stop_at_first {
                    return failures;
                }
            }
        }

        let computed = entry.compute_hash();
        self.entry_hashes += 1;
        if computed != entry.entry_hash {
            failures.push((
                ReasonCode::HashMismatch,
                format!("stored hash {} but fields hash to {}", entry.entry_hash, computed),
            ));
            if stop_at_first {
                return failures;
            }
        }

        // Later entries committed to the stored hash, so that is what the
        // tree accumulates.
        self.frontier.push(entry.entry_hash);
        let root = self.frontier.root();
        if root != entry.merkle_root_snapshot {
            failures.push((
                ReasonCode::RootMismatch,
                format!(
                    "snapshot root {} but recomputed root is {}",
                    entry.merkle_root_snapshot, root
                ),
            ));
        }

        self.next_sequence += 1;
        self.previous_hash = entry.entry_hash;
        self.previous_timestamp = Some(entry.timestamp);
        if failures.is_empty() {
            self.last_good = Some(Checkpoint {
                sequence: position,
                entry_hash: entry.entry_hash,
                merkle_root: root,
                timestamp: entry.timestamp,
                frontier: self.frontier.clone(),
            });
        }
        failures
    }
}

/// Verifies chain invariants of any [`EntrySource`]
#[derive(Debug, Clone)]
pub struct VerificationService {
    page_size: usize,
    max_findings: usize,
}

impl VerificationService {
    pub fn new(config: &VerificationConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            max_findings: config.max_findings,
        }
    }

    /// Verify every entry from genesis
    pub async fn verify_chain<S>(&self, source: &S) -> Result<VerificationResult>
    where
        S: EntrySource + ?Sized,
    {
        info!("Verifying ledger chain from genesis");
        self.walk(source, Cursor::genesis()).await
    }

    /// Verify entries from `checkpoint_sequence` onward, trusting entry
    /// `checkpoint_sequence - 1` as anchor. The stored entry hashes before
    /// the anchor feed the Merkle frontier as given; they are not re-hashed.
    pub async fn verify_since<S>(&self, source: &S, checkpoint_sequence: u64) -> Result<VerificationResult>
    where
        S: EntrySource + ?Sized,
    {
        if checkpoint_sequence == 0 {
            return self.verify_chain(source).await;
        }

        let total = source.entry_count().await?;
        if checkpoint_sequence > total {
            return Err(LedgerError::NotFound(checkpoint_sequence - 1));
        }

        let mut frontier = MerkleFrontier::new();
        let mut anchor = None;
        let mut position = 0u64;
        while position < checkpoint_sequence {
            let limit = self.page_limit(checkpoint_sequence - position);
            let page = source.read_entries(position, limit).await?;
            if page.is_empty() {
                return Err(LedgerError::StorageUnavailable(format!(
                    "source ended at position {} before anchor {}",
                    position,
                    checkpoint_sequence - 1
                )));
            }
            position += page.len() as u64;
            for entry in page {
                frontier.push(entry.entry_hash);
                anchor = Some(entry);
            }
        }

        let anchor = anchor.ok_or(LedgerError::NotFound(checkpoint_sequence - 1))?;
        let prefix_frontier = frontier.clone();
        let checkpoint = Checkpoint {
            sequence: checkpoint_sequence - 1,
            entry_hash: anchor.entry_hash,
            merkle_root: frontier.root(),
            timestamp: anchor.timestamp,
            frontier: prefix_frontier,
        };
        let prefix_cost = frontier.hashes_computed();

        info!(
            "Verifying ledger chain since sequence {} (anchor {})",
            checkpoint_sequence, anchor.entry_hash
        );
        let mut result = self.walk(source, Cursor::resume(&checkpoint)).await?;
        result.hashes_computed += prefix_cost;
        Ok(result)
    }

    /// Resume an audit from a checkpoint produced by an earlier pass.
    /// Costs nothing for the entries the checkpoint already covers.
    pub async fn verify_from_checkpoint<S>(
        &self,
        source: &S,
        checkpoint: &Checkpoint,
    ) -> Result<VerificationResult>
    where
        S: EntrySource + ?Sized,
    {
        let stored = source
            .read_entries(checkpoint.sequence, 1)
            .await?
            .into_iter()
            .next()
            .ok_or(LedgerError::NotFound(checkpoint.sequence))?;

        if stored.entry_hash != checkpoint.entry_hash || stored.timestamp != checkpoint.timestamp {
            warn!(
                "Checkpointed entry {} changed since the checkpoint was taken",
                checkpoint.sequence
            );
            return Ok(VerificationResult {
                valid: false,
                entries_checked: 0,
                first_invalid_sequence: Some(checkpoint.sequence),
                reason: Some(ReasonCode::HashMismatch),
                detail: Some(format!(
                    "stored entry hash {} differs from checkpoint {}",
                    stored.entry_hash, checkpoint.entry_hash
                )),
                hashes_computed: 0,
                checkpoint: None,
            });
        }

        info!("Verifying ledger chain from {}", checkpoint.summary());
        self.walk(source, Cursor::resume(checkpoint)).await
    }

    /// Scan the whole chain without stopping, collecting every finding
    pub async fn audit_chain<S>(&self, source: &S) -> Result<AuditReport>
    where
        S: EntrySource + ?Sized,
    {
        let total = source.entry_count().await?;
        let mut cursor = Cursor::genesis();
        let mut report = AuditReport::default();
        let mut position = 0u64;

        while position < total {
            let page = source
                .read_entries(position, self.page_limit(total - position))
                .await?;
            if page.is_empty() {
                return Err(Self::short_read(position, total));
            }
            position += page.len() as u64;

            for entry in &page {
                let at = cursor.next_sequence();
                for (reason, detail) in cursor.check(entry, false) {
                    if report.findings.len() >= self.max_findings {
                        report.truncated = true;
                        continue;
                    }
                    warn!("Audit finding at #{}: {} ({})", at, reason, detail);
                    report.findings.push(Finding {
                        sequence: at,
                        reason,
                        detail,
                    });
                }
                report.entries_checked += 1;
            }
        }

        info!(
            "Audit scan finished: {} entries, {} findings",
            report.entries_checked,
            report.findings.len()
        );
        Ok(report)
    }

    /// Inclusion proof for `sequence` against the source's current root
    pub async fn generate_inclusion_proof<S>(&self, source: &S, sequence: u64) -> Result<MerkleProof>
    where
        S: EntrySource + ?Sized,
    {
        let total = source.entry_count().await?;
        self.generate_inclusion_proof_at(source, sequence, total).await
    }

    /// Inclusion proof for `sequence` against the root over the first
    /// `tree_size` entries, i.e. the snapshot recorded in entry
    /// `tree_size - 1`
    pub async fn generate_inclusion_proof_at<S>(
        &self,
        source: &S,
        sequence: u64,
        tree_size: u64,
    ) -> Result<MerkleProof>
    where
        S: EntrySource + ?Sized,
    {
        if sequence >= tree_size {
            return Err(LedgerError::NotFound(sequence));
        }
        let total = source.entry_count().await?;
        if tree_size > total {
            return Err(LedgerError::NotFound(tree_size - 1));
        }

        let leaves = self.collect_leaves(source, tree_size).await?;
        let index = usize::try_from(sequence).map_err(|_| LedgerError::NotFound(sequence))?;
        let proof = inclusion_proof(&leaves, index)?;
        debug!("{}", proof.summary());
        Ok(proof)
    }

    async fn collect_leaves<S>(&self, source: &S, count: u64) -> Result<Vec<Digest>>
    where
        S: EntrySource + ?Sized,
    {
        let mut leaves = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        let mut position = 0u64;
        while position < count {
            let page = source
                .read_entries(position, self.page_limit(count - position))
                .await?;
            if page.is_empty() {
                return Err(Self::short_read(position, count));
            }
            position += page.len() as u64;
            leaves.extend(page.iter().map(|e| e.entry_hash));
        }
        Ok(leaves)
    }

    async fn walk<S>(&self, source: &S, mut cursor: Cursor) -> Result<VerificationResult>
    where
        S: EntrySource + ?Sized,
    {
        let total = source.entry_count().await?;
        let mut position = cursor.next_sequence;
        let mut entries_checked = 0u64;

        while position < total {
            let page = source
                .read_entries(position, self.page_limit(total - position))
                .await?;
            if page.is_empty() {
                return Err(Self::short_read(position, total));
            }
            position += page.len() as u64;

            for entry in &page {
                entries_checked += 1;
                let at = cursor.next_sequence();
                if let Some((reason, detail)) = cursor.check(entry, true).into_iter().next() {
                    warn!(
                        "Ledger verification failed at #{}: {} ({})",
                        at, reason, detail
                    );
                    return Ok(VerificationResult {
                        valid: false,
                        entries_checked,
                        first_invalid_sequence: Some(at),
                        reason: Some(reason),
                        detail: Some(detail),
                        hashes_computed: cursor.hashes_computed(),
                        checkpoint: cursor.last_good,
                    });
                }
            }
        }

        info!(
            "Ledger verification successful: {} entries checked",
            entries_checked
        );
        Ok(VerificationResult {
            valid: true,
            entries_checked,
            first_invalid_sequence: None,
            reason: None,
            detail: None,
            hashes_computed: cursor.hashes_computed(),
            checkpoint: cursor.last_good,
        })
    }

    fn page_limit(&self, remaining: u64) -> usize {
        usize::try_from(remaining).map_or(self.page_size, |r| r.min(self.page_size))
    }

    fn short_read(position: u64, expected: u64) -> LedgerError {
        LedgerError::StorageUnavailable(format!(
            "source returned no entries at position {} of {}",
            position, expected
        ))
    }
}

impl Default for VerificationService {
    fn default() -> Self {
        Self::new(&VerificationConfig::default())
    }
}

//! Verification results and audit findings

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LedgerError, Result};
use crate::ledger::Checkpoint;
use crate::verify::exit::{EXIT_INVALID, EXIT_VALID};

/// Why an entry failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    HashMismatch,
    LinkBroken,
    RootMismatch,
    SequenceGap,
    TimestampRegression,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashMismatch => "HASH_MISMATCH",
            Self::LinkBroken => "LINK_BROKEN",
            Self::RootMismatch => "ROOT_MISMATCH",
            Self::SequenceGap => "SEQUENCE_GAP",
            Self::TimestampRegression => "TIMESTAMP_REGRESSION",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a chain verification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub entries_checked: u64,
    pub first_invalid_sequence: Option<u64>,
    pub reason: Option<ReasonCode>,
    pub detail: Option<String>,
    /// SHA-256 invocations spent on this pass, entry and Merkle hashes alike.
    pub hashes_computed: u64,
    /// Last entry known good after this pass, usable to resume later audits.
    pub checkpoint: Option<Checkpoint>,
}

impl VerificationResult {
    pub fn is_empty(&self) -> bool {
        self.valid && self.entries_checked == 0
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.valid {
            format!("✅ Ledger chain is valid ({} entries checked)", self.entries_checked)
        } else {
            format!(
                "❌ Ledger chain is invalid at sequence {} ({}): {}",
                self.first_invalid_sequence
                    .map_or_else(|| "?".to_string(), |s| s.to_string()),
                self.reason.map_or("UNKNOWN", |r| r.as_str()),
                self.detail.as_deref().unwrap_or("no detail")
            )
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.valid {
            EXIT_VALID
        } else {
            EXIT_INVALID
        }
    }

    /// Turn a tamper finding into `LedgerError::ChainIntegrity`.
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            return Ok(self);
        }
        Err(LedgerError::ChainIntegrity {
            sequence: self.first_invalid_sequence.unwrap_or_default(),
            reason: self.reason.unwrap_or(ReasonCode::HashMismatch),
            detail: self.detail.unwrap_or_default(),
        })
    }
}

/// One problem found by a full audit scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub sequence: u64,
    pub reason: ReasonCode,
    pub detail: String,
}

/// Every finding of a non-stopping audit scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub entries_checked: u64,
    pub findings: Vec<Finding>,
    /// More findings existed than the configured cap.
    pub truncated: bool,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Sequences with at least one finding, ascending and deduplicated.
    pub fn affected_sequences(&self) -> Vec<u64> {
        let mut sequences: Vec<u64> = self.findings.iter().map(|f| f.sequence).collect();
        sequences.sort_unstable();
        sequences.dedup();
        sequences
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            EXIT_VALID
        } else {
            EXIT_INVALID
        }
    }

    pub fn summary(&self) -> String {
        if self.is_clean() {
            return format!("✅ No findings in {} entries", self.entries_checked);
        }
        let mut lines = vec![format!(
            "❌ {} finding(s) in {} entries{}",
            self.findings.len(),
            self.entries_checked,
            if self.truncated { " (truncated)" } else { "" }
        )];
        for finding in &self.findings {
            lines.push(format!(
                "  #{} {}: {}",
                finding.sequence, finding.reason, finding.detail
            ));
        }
        lines.join("\n")
    }
}

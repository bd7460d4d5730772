use std::time::Duration;

use sqlx::error::ErrorKind;
use thiserror::Error;

use crate::verify::ReasonCode;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

/// Primary SQLite result code for constraint failures, trigger aborts included.
const SQLITE_CONSTRAINT: i32 = 19;

/// True when the database refused the statement itself, as opposed to being
/// busy, locked or otherwise unable to run it.
fn is_constraint_violation(kind: &ErrorKind, code: Option<&str>) -> bool {
    if !matches!(kind, ErrorKind::Other) {
        return true;
    }
    code.and_then(|c| c.parse::<i32>().ok())
        .map_or(false, |c| c & 0xff == SQLITE_CONSTRAINT)
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if is_constraint_violation(&db.kind(), db.code().as_deref()) => {
                Self::StorageRejected(db.message().to_string())
            }
            other => Self::StorageUnavailable(format!("Database error: {}", other)),
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(format!("I/O error: {}", err))
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Entry not found: sequence {0}")]
    NotFound(u64),

    #[error("Sequence conflict: expected {expected}, got {found}")]
    SequenceConflict { expected: u64, found: u64 },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage operation timed out after {0:?}")]
    StorageTimeout(Duration),

    #[error("Storage rejected entry: {0}")]
    StorageRejected(String),

    #[error("Ledger is fail-closed until resynced: {0}")]
    FailedClosed(String),

    #[error("Chain integrity violation at sequence {sequence} ({reason}): {detail}")]
    ChainIntegrity {
        sequence: u64,
        reason: ReasonCode,
        detail: String,
    },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LedgerError {
    /// True for errors raised by the persistence collaborator.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_)
                | Self::StorageTimeout(_)
                | Self::StorageRejected(_)
                | Self::SequenceConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

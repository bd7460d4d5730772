//! Process exit codes for verification tooling.

use crate::error::{LedgerError, Result};
use crate::verify::result::VerificationResult;

/// Chain valid, including an empty ledger.
pub const EXIT_VALID: i32 = 0;
/// Tamper detected.
pub const EXIT_INVALID: i32 = 1;
/// Configuration or structural error; nothing was verified.
pub const EXIT_ERROR: i32 = 2;
/// Storage unreachable or timed out.
pub const EXIT_STORAGE: i32 = 3;

pub fn error_exit_code(err: &LedgerError) -> i32 {
    match err {
        LedgerError::ChainIntegrity { .. } => EXIT_INVALID,
        LedgerError::StorageUnavailable(_) | LedgerError::StorageTimeout(_) => EXIT_STORAGE,
        _ => EXIT_ERROR,
    }
}

/// Map a verification outcome to a process exit code.
pub fn exit_code(outcome: &Result<VerificationResult>) -> i32 {
    match outcome {
        Ok(result) => result.exit_code(),
        Err(err) => error_exit_code(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::ReasonCode;
    use std::time::Duration;

    fn result(valid: bool, entries_checked: u64) -> VerificationResult {
        VerificationResult {
            valid,
            entries_checked,
            first_invalid_sequence: (!valid).then_some(0),
            reason: (!valid).then_some(ReasonCode::HashMismatch),
            detail: None,
            hashes_computed: 0,
            checkpoint: None,
        }
    }

    #[test]
    fn test_valid_and_empty_exit_zero() {
        assert_eq!(exit_code(&Ok(result(true, 0))), EXIT_VALID);
        assert_eq!(exit_code(&Ok(result(true, 12))), EXIT_VALID);
    }

    #[test]
    fn test_invalid_exit_nonzero() {
        assert_eq!(exit_code(&Ok(result(false, 3))), EXIT_INVALID);
    }

    #[test]
    fn test_errors_exit_nonzero() {
        assert_eq!(
            exit_code(&Err(LedgerError::StorageTimeout(Duration::from_secs(1)))),
            EXIT_STORAGE
        );
        assert_eq!(
            exit_code(&Err(LedgerError::StorageUnavailable("down".to_string()))),
            EXIT_STORAGE
        );
        assert_eq!(exit_code(&Err(LedgerError::NotFound(9))), EXIT_ERROR);
        assert_eq!(
            exit_code(&Err(LedgerError::ConfigError("bad".to_string()))),
            EXIT_ERROR
        );
    }
}

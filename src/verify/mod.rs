//! Verification
//!
//! Independent re-validation of a ledger's chain, tamper reporting and
//! exit-code mapping for tooling.

pub mod exit;
pub mod result;
pub mod service;
pub mod source;

pub use exit::{error_exit_code, exit_code, EXIT_ERROR, EXIT_INVALID, EXIT_STORAGE, EXIT_VALID};
pub use result::{AuditReport, Finding, ReasonCode, VerificationResult};
pub use service::VerificationService;
pub use source::EntrySource;
